//! The authoritative remote copy, and its PostgREST implementation.

use std::{future::Future, time::Duration};

use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tahfeez_core::Document;

use crate::error::RemoteError;

/// A table service that can hand out full-table snapshots.
pub trait RemoteSource: Send + Sync {
  /// Whether credentials are present at all.
  fn is_configured(&self) -> bool;

  /// Cheap connectivity probe. Never errors; unreachable is `false`.
  fn is_reachable(&self) -> impl Future<Output = bool> + Send + '_;

  /// Every row of `table`.
  fn fetch_table<'a>(
    &'a self,
    table: &'a str,
  ) -> impl Future<Output = Result<Vec<Document>, RemoteError>> + Send + 'a;
}

// ─── REST remote ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteConfig {
  /// Project base URL, e.g. `https://xyz.supabase.co`.
  #[serde(default)]
  pub url:     Option<String>,
  #[serde(default)]
  pub api_key: Option<String>,
}

impl RemoteConfig {
  fn credentials(&self) -> Option<(&str, &str)> {
    let url = self.url.as_deref().map(str::trim).filter(|u| !u.is_empty())?;
    let key = self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty())?;
    Some((url.trim_end_matches('/'), key))
  }
}

/// PostgREST (Supabase) table endpoint.
///
/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct RestRemote {
  client: Client,
  config: RemoteConfig,
}

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

impl RestRemote {
  pub fn new(config: RemoteConfig) -> Result<Self, RemoteError> {
    let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
    Ok(Self { client, config })
  }

  fn table_url(base: &str, table: &str) -> String { format!("{base}/rest/v1/{table}") }

  fn authorized(&self, req: reqwest::RequestBuilder, key: &str) -> reqwest::RequestBuilder {
    req.header("apikey", key).bearer_auth(key)
  }
}

impl RemoteSource for RestRemote {
  fn is_configured(&self) -> bool { self.config.credentials().is_some() }

  async fn is_reachable(&self) -> bool {
    let Some((base, key)) = self.config.credentials() else {
      return false;
    };
    let probe = self
      .authorized(self.client.head(format!("{base}/rest/v1/")), key)
      .timeout(PROBE_TIMEOUT)
      .send()
      .await;
    match probe {
      // Any HTTP answer means the network path works.
      Ok(_) => true,
      Err(e) => {
        tracing::debug!(error = %e, "remote probe failed");
        false
      }
    }
  }

  async fn fetch_table(&self, table: &str) -> Result<Vec<Document>, RemoteError> {
    let (base, key) = self.config.credentials().ok_or(RemoteError::NotConfigured)?;
    let resp = self
      .authorized(self.client.get(Self::table_url(base, table)), key)
      .query(&[("select", "*")])
      .send()
      .await?;

    if !resp.status().is_success() {
      return Err(RemoteError::Status {
        table:  table.to_owned(),
        status: resp.status().as_u16(),
      });
    }

    let rows: Vec<Value> = resp.json().await?;
    rows
      .into_iter()
      .map(|row| match row {
        Value::Object(doc) => Ok(doc),
        other => Err(RemoteError::Shape {
          table:  table.to_owned(),
          reason: format!("expected an object row, got {other}"),
        }),
      })
      .collect()
  }
}
