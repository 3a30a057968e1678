//! `tahfeez`: operate a school's local store from the command line.
//!
//! Reads `tahfeez.toml` (or the path given with `--config`), opens the
//! SQLite store (migrating it to the newest schema), and then runs the
//! requested command.
//!
//! ```
//! tahfeez run                 # periodic sync + reminder checks until ^C
//! tahfeez sync                # one manual sync
//! tahfeez notifications --unread
//! tahfeez read --all
//! ```

mod app_config;

use std::{path::PathBuf, time::Duration};

use anyhow::{Context as _, bail};
use clap::{Parser, Subcommand};
use tahfeez_core::{IndexQuery, Key, LocalStore, SchoolDb, notification::Notification};
use tahfeez_notify::{NotificationEngine, Notifier};
use tahfeez_store_sqlite::SqliteStore;
use tahfeez_sync::{RemoteSource, RestRemote, SyncEngine, Trigger};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;

use crate::app_config::AppConfig;

#[derive(Parser)]
#[command(author, version, about = "Tahfeez school data layer")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "tahfeez.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Sync and check reminders periodically until interrupted.
  Run,
  /// Replace local data with the remote copy once.
  Sync,
  /// Evaluate every reminder rule once.
  Check,
  /// List notifications, newest first.
  Notifications {
    #[arg(long)]
    unread: bool,
  },
  /// Mark a notification, or all of them, read.
  Read {
    #[arg(required_unless_present = "all")]
    id:  Option<String>,
    #[arg(long, conflicts_with = "id")]
    all: bool,
  },
  /// Print the schema version, row counts and unread count.
  Status,
}

// ─── Application ─────────────────────────────────────────────────────────────

struct App {
  config:   AppConfig,
  db:       SchoolDb<SqliteStore>,
  notifier: Notifier<SqliteStore>,
}

impl App {
  async fn open(config: AppConfig) -> anyhow::Result<Self> {
    let path = &config.store_path;
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)
        .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let store = SqliteStore::open(path)
      .await
      .with_context(|| format!("failed to open store at {path:?}"))?;
    let report = store.migration();
    if !report.is_noop() {
      info!(from = report.from, to = report.to, "store migrated");
    }

    let db = SchoolDb::new(store);
    let notifier = Notifier::new(db.clone())
      .await
      .context("failed to read notifications")?;
    Ok(Self { config, db, notifier })
  }

  fn sync_engine(&self) -> anyhow::Result<SyncEngine<SqliteStore, RestRemote>> {
    let remote = RestRemote::new(self.config.sync.remote()).context("failed to build http client")?;
    Ok(match &self.config.sync.tables {
      Some(tables) => SyncEngine::with_tables(self.db.clone(), remote, tables.clone()),
      None => SyncEngine::new(self.db.clone(), remote),
    })
  }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let config = app_config::load(&cli.config)?;
  let app = App::open(config).await?;

  match cli.command {
    Command::Run => run(&app).await,
    Command::Sync => sync_once(&app).await,
    Command::Check => check(&app).await,
    Command::Notifications { unread } => list_notifications(&app, unread).await,
    Command::Read { id, all } => mark_read(&app, id, all).await,
    Command::Status => status(&app).await,
  }
}

// ─── Commands ────────────────────────────────────────────────────────────────

async fn run(app: &App) -> anyhow::Result<()> {
  let sync = app.sync_engine()?;
  let checks = NotificationEngine::new(app.notifier.clone());
  let sync_every = Duration::from_secs(app.config.sync.interval_secs.max(1));
  let check_every = Duration::from_secs(app.config.notifications.interval_secs.max(1));

  if !sync.remote().is_configured() {
    warn!("no remote configured; running offline");
  }

  let mut changes = sync.subscribe();
  let mut added = app.notifier.subscribe();
  let notifier = app.notifier.clone();
  let listener = async move {
    loop {
      tokio::select! {
        event = changes.recv() => match event {
          Ok(event) => {
            info!(rows = event.rows(), "local data replaced by remote copy");
            if let Err(e) = notifier.refresh().await {
              warn!(error = %e, "failed to recount notifications");
            }
          }
          Err(RecvError::Lagged(_)) => {}
          Err(RecvError::Closed) => break,
        },
        note = added.recv() => match note {
          Ok(note) => info!(category = %note.category, "{}", note.message),
          Err(RecvError::Lagged(n)) => warn!(missed = n, "notification listener lagged"),
          Err(RecvError::Closed) => break,
        },
      }
    }
  };

  info!(
    sync_secs = sync_every.as_secs(),
    check_secs = check_every.as_secs(),
    "running; press ctrl-c to stop"
  );
  tokio::select! {
    () = sync.run_periodic(sync_every) => {}
    () = checks.run_periodic(check_every) => {}
    () = listener => {}
    signal = tokio::signal::ctrl_c() => {
      signal.context("failed to listen for ctrl-c")?;
      info!("shutting down");
    }
  }
  Ok(())
}

async fn sync_once(app: &App) -> anyhow::Result<()> {
  let event = app
    .sync_engine()?
    .sync(Trigger::Manual)
    .await
    .context("sync failed")?;
  app.notifier.refresh().await?;
  for (table, rows) in &event.tables {
    println!("{table:<16} {rows}");
  }
  println!("{} rows synced at {}", event.rows(), event.at.to_rfc3339());
  Ok(())
}

async fn check(app: &App) -> anyhow::Result<()> {
  let emitted = NotificationEngine::new(app.notifier.clone())
    .run_checks()
    .await
    .context("reminder checks failed")?;
  if emitted.is_empty() {
    println!("nothing new");
  }
  for note in &emitted {
    print_notification(note);
  }
  Ok(())
}

async fn list_notifications(app: &App, unread: bool) -> anyhow::Result<()> {
  let notes = if unread {
    app.notifier.list_unread().await?
  } else {
    app.notifier.list().await?
  };
  for note in &notes {
    print_notification(note);
  }
  println!("{} unread", app.notifier.unread_count().await?);
  Ok(())
}

async fn mark_read(app: &App, id: Option<String>, all: bool) -> anyhow::Result<()> {
  if all {
    let n = app.notifier.mark_all_read().await?;
    println!("marked {n} read");
    return Ok(());
  }
  let Some(raw) = id else {
    bail!("pass a notification id or --all");
  };
  let key = match raw.parse::<i64>() {
    Ok(n) => Key::Int(n),
    Err(_) => Key::Text(raw),
  };
  if !app.notifier.mark_read(&key).await? {
    bail!("no notification {key}");
  }
  Ok(())
}

async fn status(app: &App) -> anyhow::Result<()> {
  let store = app.db.store();
  println!("store          {}", app.config.store_path.display());
  println!("schema version {}", store.schema_version().await?);
  let mut tables: Vec<&str> = app.db.schema().table_names().collect();
  tables.sort_unstable();
  for table in tables {
    let rows = store.count(&IndexQuery::all(table)).await?;
    println!("  {table:<14} {rows}");
  }
  println!("unread         {}", app.notifier.unread_count().await?);
  let remote = RestRemote::new(app.config.sync.remote())?;
  let state = if !remote.is_configured() {
    "not configured"
  } else if remote.is_reachable().await {
    "reachable"
  } else {
    "offline"
  };
  println!("remote         {state}");
  Ok(())
}

fn print_notification(note: &Notification) {
  let id = note.id.as_ref().map(Key::to_string).unwrap_or_default();
  let mark = if note.is_read { ' ' } else { '*' };
  println!(
    "{id:>5} {mark} {} [{}] {}",
    note.timestamp.format("%Y-%m-%d %H:%M"),
    note.category,
    note.message
  );
}
