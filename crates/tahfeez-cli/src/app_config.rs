//! Runtime configuration: an optional TOML file under `TAHFEEZ_*`
//! environment overrides.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Deserialize;
use tahfeez_sync::RemoteConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  #[serde(default = "default_store_path")]
  pub store_path:    PathBuf,
  #[serde(default)]
  pub sync:          SyncConfig,
  #[serde(default)]
  pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  pub url:           Option<String>,
  pub api_key:       Option<String>,
  pub interval_secs: u64,
  /// Overrides the default sync list.
  pub tables:        Option<Vec<String>>,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      url:           None,
      api_key:       None,
      interval_secs: 300,
      tables:        None,
    }
  }
}

impl SyncConfig {
  pub fn remote(&self) -> RemoteConfig {
    RemoteConfig { url: self.url.clone(), api_key: self.api_key.clone() }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  pub interval_secs: u64,
}

impl Default for NotificationConfig {
  fn default() -> Self { Self { interval_secs: 60 } }
}

fn default_store_path() -> PathBuf { PathBuf::from("~/.local/share/tahfeez/school.db") }

/// Read `path` (if it exists) and layer `TAHFEEZ_*` variables over it;
/// nested keys use `__`, e.g. `TAHFEEZ_SYNC__API_KEY`.
pub fn load(path: &Path) -> anyhow::Result<AppConfig> {
  let settings = config::Config::builder()
    .add_source(config::File::from(path).required(false))
    .add_source(
      config::Environment::with_prefix("TAHFEEZ")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("sync.tables"),
    )
    .build()
    .context("failed to read config file")?;

  let mut cfg: AppConfig = settings
    .try_deserialize()
    .context("failed to deserialise configuration")?;
  cfg.store_path = expand_tilde(&cfg.store_path);
  Ok(cfg)
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use std::io::Write;

  use super::*;

  #[test]
  fn missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = load(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(cfg.sync.interval_secs, 300);
    assert_eq!(cfg.notifications.interval_secs, 60);
    assert!(cfg.sync.tables.is_none());
    assert!(cfg.store_path.ends_with("tahfeez/school.db"));
  }

  #[test]
  fn file_values_are_read() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
      file,
      r#"
store_path = "/srv/school.db"

[sync]
url = "https://school.example.co"
api_key = "anon"
tables = ["students", "classes"]

[notifications]
interval_secs = 15
"#
    )
    .unwrap();

    let cfg = load(file.path()).unwrap();
    assert_eq!(cfg.store_path, PathBuf::from("/srv/school.db"));
    assert_eq!(cfg.sync.remote().url.as_deref(), Some("https://school.example.co"));
    assert_eq!(cfg.sync.tables.as_deref(), Some(&["students".to_owned(), "classes".to_owned()][..]));
    assert_eq!(cfg.sync.interval_secs, 300);
    assert_eq!(cfg.notifications.interval_secs, 15);
  }

  #[test]
  fn tilde_expands_to_home() {
    let Ok(home) = std::env::var("HOME") else {
      return;
    };
    assert_eq!(expand_tilde(Path::new("~/a.db")), PathBuf::from(home).join("a.db"));
    assert_eq!(expand_tilde(Path::new("/abs.db")), PathBuf::from("/abs.db"));
  }
}
