//! Mapping between documents, keys and queries and their SQLite form.
//!
//! Every document table is `t_<name>(pk PRIMARY KEY, body TEXT)`. The `pk`
//! column has no declared type, so integer keys stay integers and order
//! numerically. Compound keys are stored as their JSON array text. Index
//! paths are read with `json_extract`; multi-valued indices are evaluated
//! with `json_each` and have no physical index.

use std::ops::Bound;

use rusqlite::types::Value as SqlValue;
use serde_json::Value;
use tahfeez_core::{
  Document, Error, IndexQuery, Key, Matcher,
  schema::{IndexSpec, IndexTarget, KeyPath, TableSchema},
};

type CoreResult<T> = tahfeez_core::Result<T>;

/// Upper sentinel for prefix scans: sorts after every valid string.
const PREFIX_END: char = '\u{10FFFF}';

// ─── Identifiers ─────────────────────────────────────────────────────────────

pub fn table_ident(table: &str) -> String { format!("\"t_{table}\"") }

pub fn field_expr(field: &str) -> String { format!("json_extract(body, '$.{field}')") }

pub fn index_name(table: &str, spec: &IndexSpec) -> String {
  let prefix = if spec.unique { "ux" } else { "ix" };
  let fields: Vec<String> = spec.path.fields().iter().map(|f| f.replace('.', "_")).collect();
  format!("{prefix}_{table}_{}", fields.join("__"))
}

/// `CREATE INDEX` for `spec`; `None` for multi-valued indices.
pub fn index_ddl(table: &str, spec: &IndexSpec) -> Option<String> {
  if spec.multi_entry {
    return None;
  }
  let columns: Vec<String> = spec.path.fields().iter().map(|f| field_expr(f)).collect();
  Some(format!(
    "CREATE {}INDEX IF NOT EXISTS \"{}\" ON {} ({})",
    if spec.unique { "UNIQUE " } else { "" },
    index_name(table, spec),
    table_ident(table),
    columns.join(", "),
  ))
}

// ─── Values ──────────────────────────────────────────────────────────────────

/// The SQL value `json_extract` yields for `value`.
pub fn value_to_sql(value: &Value) -> SqlValue {
  match value {
    Value::Null => SqlValue::Null,
    Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
    Value::Number(n) => match (n.as_i64(), n.as_f64()) {
      (Some(i), _) => SqlValue::Integer(i),
      (None, Some(f)) => SqlValue::Real(f),
      (None, None) => SqlValue::Text(n.to_string()),
    },
    Value::String(s) => SqlValue::Text(s.clone()),
    other => SqlValue::Text(other.to_string()),
  }
}

pub fn key_to_sql(key: &Key) -> SqlValue {
  match key {
    Key::Int(n) => SqlValue::Integer(*n),
    Key::Text(s) => SqlValue::Text(s.clone()),
    Key::Compound(_) => SqlValue::Text(key.to_value().to_string()),
  }
}

pub fn encode_body(doc: &Document) -> CoreResult<String> { Ok(serde_json::to_string(doc)?) }

pub fn decode_body(body: &str) -> CoreResult<Document> { Ok(serde_json::from_str(body)?) }

// ─── Query plans ─────────────────────────────────────────────────────────────

/// SQL for one [`IndexQuery`], with its positional parameters.
#[derive(Debug)]
pub struct QueryPlan {
  table:      String,
  filter:     Option<String>,
  order:      String,
  limit:      Option<usize>,
  pub params: Vec<SqlValue>,
}

impl QueryPlan {
  pub fn select_sql(&self) -> String {
    let mut sql = format!("SELECT body FROM {}", self.table);
    if let Some(filter) = &self.filter {
      sql.push_str(" WHERE ");
      sql.push_str(filter);
    }
    sql.push_str(" ORDER BY ");
    sql.push_str(&self.order);
    if let Some(limit) = self.limit {
      sql.push_str(&format!(" LIMIT {limit}"));
    }
    sql
  }

  pub fn count_sql(&self) -> String {
    let filter = self
      .filter
      .as_ref()
      .map(|f| format!(" WHERE {f}"))
      .unwrap_or_default();
    match self.limit {
      Some(limit) => {
        format!("SELECT count(*) FROM (SELECT 1 FROM {}{filter} LIMIT {limit})", self.table)
      }
      None => format!("SELECT count(*) FROM {}{filter}", self.table),
    }
  }
}

pub fn plan(schema: &TableSchema, query: &IndexQuery) -> CoreResult<QueryPlan> {
  let index_label = query.index.clone().unwrap_or_default();
  let target = schema.resolve_index(query.index.as_deref()).ok_or_else(|| {
    Error::UnknownIndex { table: query.table.clone(), index: index_label.clone() }
  })?;
  let dir = if query.reverse { " DESC" } else { "" };
  let mut params = Vec::new();

  let (filter, order) = match target {
    IndexTarget::Primary(pk) => {
      let filter = match &pk.path {
        KeyPath::Field(_) => scalar_filter("pk", &query.matcher, false, &mut params),
        KeyPath::Compound(_) => compound_key_filter(&query.matcher, &index_label, &mut params)?,
      };
      (filter, format!("pk{dir}"))
    }
    IndexTarget::Secondary(spec) => match &spec.path {
      KeyPath::Field(field) if spec.multi_entry => {
        let source = format!("json_each(body, '$.{field}')");
        let filter = match scalar_filter("value", &query.matcher, true, &mut params) {
          Some(cond) => format!("EXISTS (SELECT 1 FROM {source} WHERE {cond})"),
          None => format!("EXISTS (SELECT 1 FROM {source})"),
        };
        (Some(filter), format!("pk{dir}"))
      }
      KeyPath::Field(field) => {
        let expr = field_expr(field);
        let filter = scalar_filter(&expr, &query.matcher, true, &mut params);
        (filter, format!("{expr}{dir}, pk{dir}"))
      }
      KeyPath::Compound(fields) => {
        let exprs: Vec<String> = fields.iter().map(|f| field_expr(f)).collect();
        let filter = compound_filter(&exprs, &query.matcher, &index_label, &mut params)?;
        let mut order: Vec<String> = exprs.iter().map(|e| format!("{e}{dir}")).collect();
        order.push(format!("pk{dir}"));
        (Some(filter), order.join(", "))
      }
    },
  };

  Ok(QueryPlan {
    table: table_ident(&query.table),
    filter,
    order,
    limit: query.limit,
    params,
  })
}

/// Condition over one scalar expression. Secondary indices do not contain
/// documents lacking the indexed value, hence `require_present`.
fn scalar_filter(
  expr: &str,
  matcher: &Matcher,
  require_present: bool,
  params: &mut Vec<SqlValue>,
) -> Option<String> {
  match matcher {
    Matcher::All => require_present.then(|| format!("{expr} IS NOT NULL")),
    Matcher::Equals(Value::Null) => Some(format!("{expr} IS NULL")),
    Matcher::Equals(value) => {
      params.push(value_to_sql(value));
      Some(format!("{expr} = ?"))
    }
    Matcher::AnyOf(values) => {
      let mut placeholders = Vec::new();
      let mut with_null = false;
      for value in values {
        if value.is_null() {
          with_null = true;
        } else {
          params.push(value_to_sql(value));
          placeholders.push("?");
        }
      }
      let mut parts = Vec::new();
      if !placeholders.is_empty() {
        parts.push(format!("{expr} IN ({})", placeholders.join(", ")));
      }
      if with_null {
        parts.push(format!("{expr} IS NULL"));
      }
      if parts.is_empty() {
        Some("0".to_owned())
      } else {
        Some(format!("({})", parts.join(" OR ")))
      }
    }
    Matcher::Range { lower, upper } => {
      let mut parts = Vec::new();
      match lower {
        Bound::Included(v) => {
          params.push(value_to_sql(v));
          parts.push(format!("{expr} >= ?"));
        }
        Bound::Excluded(v) => {
          params.push(value_to_sql(v));
          parts.push(format!("{expr} > ?"));
        }
        Bound::Unbounded => {}
      }
      match upper {
        Bound::Included(v) => {
          params.push(value_to_sql(v));
          parts.push(format!("{expr} <= ?"));
        }
        Bound::Excluded(v) => {
          params.push(value_to_sql(v));
          parts.push(format!("{expr} < ?"));
        }
        Bound::Unbounded => {}
      }
      if parts.is_empty() {
        require_present.then(|| format!("{expr} IS NOT NULL"))
      } else {
        Some(parts.join(" AND "))
      }
    }
    Matcher::StartsWith(prefix) => {
      params.push(SqlValue::Text(prefix.clone()));
      params.push(SqlValue::Text(format!("{prefix}{PREFIX_END}")));
      Some(format!("{expr} >= ? AND {expr} < ?"))
    }
  }
}

/// Condition over a compound secondary index. Values are arrays with one
/// element per component.
fn compound_filter(
  exprs: &[String],
  matcher: &Matcher,
  index: &str,
  params: &mut Vec<SqlValue>,
) -> CoreResult<String> {
  let row = format!("({})", exprs.join(", "));
  match matcher {
    Matcher::All => {
      let parts: Vec<String> = exprs.iter().map(|e| format!("{e} IS NOT NULL")).collect();
      Ok(parts.join(" AND "))
    }
    Matcher::Equals(value) => {
      let items = tuple(value, exprs.len(), index)?;
      Ok(tuple_equals(exprs, items, params))
    }
    Matcher::AnyOf(values) => {
      if values.is_empty() {
        return Ok("0".to_owned());
      }
      let mut groups = Vec::new();
      for value in values {
        let items = tuple(value, exprs.len(), index)?;
        groups.push(tuple_equals(exprs, items, params));
      }
      Ok(format!("({})", groups.join(" OR ")))
    }
    Matcher::Range { lower, upper } => {
      let mut parts = Vec::new();
      for (bound, inclusive_op, exclusive_op) in [(lower, ">=", ">"), (upper, "<=", "<")] {
        let (value, op) = match bound {
          Bound::Included(v) => (v, inclusive_op),
          Bound::Excluded(v) => (v, exclusive_op),
          Bound::Unbounded => continue,
        };
        let items = tuple(value, exprs.len(), index)?;
        params.extend(items.iter().map(value_to_sql));
        let placeholders = vec!["?"; items.len()].join(", ");
        parts.push(format!("{row} {op} ({placeholders})"));
      }
      if parts.is_empty() {
        parts.extend(exprs.iter().map(|e| format!("{e} IS NOT NULL")));
      }
      Ok(parts.join(" AND "))
    }
    Matcher::StartsWith(_) => Err(Error::UnsupportedMatcher {
      index:  index.to_owned(),
      reason: "prefix matching needs a single-field index".into(),
    }),
  }
}

fn compound_key_filter(
  matcher: &Matcher,
  index: &str,
  params: &mut Vec<SqlValue>,
) -> CoreResult<Option<String>> {
  let encode = |value: &Value| {
    Key::from_value(value)
      .filter(|k| matches!(k, Key::Compound(_)))
      .map(|k| key_to_sql(&k))
      .ok_or_else(|| Error::UnsupportedMatcher {
        index:  index.to_owned(),
        reason: format!("{value} is not a compound key"),
      })
  };
  match matcher {
    Matcher::All => Ok(None),
    Matcher::Equals(value) => {
      params.push(encode(value)?);
      Ok(Some("pk = ?".to_owned()))
    }
    Matcher::AnyOf(values) if values.is_empty() => Ok(Some("0".to_owned())),
    Matcher::AnyOf(values) => {
      for value in values {
        params.push(encode(value)?);
      }
      Ok(Some(format!("pk IN ({})", vec!["?"; values.len()].join(", "))))
    }
    Matcher::Range { .. } | Matcher::StartsWith(_) => Err(Error::UnsupportedMatcher {
      index:  index.to_owned(),
      reason: "compound primary keys support equality only".into(),
    }),
  }
}

fn tuple<'v>(value: &'v Value, arity: usize, index: &str) -> CoreResult<&'v [Value]> {
  match value {
    Value::Array(items) if items.len() == arity => Ok(items),
    other => Err(Error::UnsupportedMatcher {
      index:  index.to_owned(),
      reason: format!("expected an array of {arity} values, got {other}"),
    }),
  }
}

fn tuple_equals(exprs: &[String], items: &[Value], params: &mut Vec<SqlValue>) -> String {
  let parts: Vec<String> = exprs
    .iter()
    .zip(items)
    .map(|(expr, item)| {
      if item.is_null() {
        format!("{expr} IS NULL")
      } else {
        params.push(value_to_sql(item));
        format!("{expr} = ?")
      }
    })
    .collect();
  format!("({})", parts.join(" AND "))
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn schema() -> TableSchema {
    TableSchema::parse("++id, [student_id+date], date, *schedule_days, &reference_id").unwrap()
  }

  #[test]
  fn secondary_range_orders_by_index_then_key() {
    let query = IndexQuery::new("attendance", "date", Matcher::between("2025-03-01", "2025-04-01"))
      .reverse()
      .limit(5);
    let plan = plan(&schema(), &query).unwrap();
    assert_eq!(
      plan.select_sql(),
      "SELECT body FROM \"t_attendance\" WHERE json_extract(body, '$.date') >= ? AND \
       json_extract(body, '$.date') < ? ORDER BY json_extract(body, '$.date') DESC, pk DESC \
       LIMIT 5"
    );
    assert_eq!(plan.params.len(), 2);
  }

  #[test]
  fn multi_entry_uses_json_each() {
    let query = IndexQuery::new("classes", "schedule_days", Matcher::equals(3));
    let plan = plan(&schema(), &query).unwrap();
    assert!(plan.select_sql().contains(
      "EXISTS (SELECT 1 FROM json_each(body, '$.schedule_days') WHERE value = ?)"
    ));
    assert_eq!(plan.params, vec![SqlValue::Integer(3)]);
  }

  #[test]
  fn compound_index_rejects_prefix_and_bad_arity() {
    let s = schema();
    let prefix = IndexQuery::new("attendance", "[student_id+date]", Matcher::starts_with("s"));
    assert!(matches!(plan(&s, &prefix), Err(Error::UnsupportedMatcher { .. })));
    let arity = IndexQuery::new("attendance", "[student_id+date]", Matcher::equals(json!(["s1"])));
    assert!(matches!(plan(&s, &arity), Err(Error::UnsupportedMatcher { .. })));
    let ok = IndexQuery::new(
      "attendance",
      "[student_id+date]",
      Matcher::equals(json!(["s1", "2025-03-02"])),
    );
    assert_eq!(plan(&s, &ok).unwrap().params.len(), 2);
  }

  #[test]
  fn unknown_index() {
    let query = IndexQuery::new("attendance", "status", Matcher::All);
    assert!(matches!(plan(&schema(), &query), Err(Error::UnknownIndex { .. })));
  }

  #[test]
  fn index_names_encode_uniqueness() {
    let s = schema();
    let unique = s.index("reference_id").unwrap();
    assert_eq!(index_name("notifications", unique), "ux_notifications_reference_id");
    let compound = s.index("[student_id+date]").unwrap();
    assert_eq!(index_name("attendance", compound), "ix_attendance_student_id__date");
    assert!(index_ddl("classes", s.index("schedule_days").unwrap()).is_none());
  }
}
