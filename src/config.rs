use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin that relative request paths are resolved against
  pub origin: String,
  /// Cache generation; bump on every deployment that changes cached assets
  #[serde(default = "default_version")]
  pub version: u64,
  /// Critical paths pre-warmed into the static partition at install
  #[serde(default = "default_manifest")]
  pub manifest: Vec<String>,
  /// Document served when a page is neither reachable nor cached
  #[serde(default = "default_offline_page")]
  pub offline_page: String,
  #[serde(default)]
  pub classifier: ClassifierConfig,
  #[serde(default = "default_network_timeout_ms")]
  pub network_timeout_ms: u64,
  /// Whole-manifest attempts before an install is declared failed
  #[serde(default = "default_install_attempts")]
  pub install_attempts: u32,
  #[serde(default)]
  pub normalization: NormalizationConfig,
  #[serde(default)]
  pub queue: QueueConfig,
  #[serde(default)]
  pub notifications: NotificationConfig,
  /// SQLite database path (default: $XDG_DATA_HOME/offsync/cache.db)
  pub storage_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
  /// File extensions served cache-first (case-insensitive)
  #[serde(
    default = "default_static_extensions",
    deserialize_with = "deserialize_lowercase_set"
  )]
  pub static_extensions: BTreeSet<String>,
  #[serde(default = "default_api_prefix")]
  pub api_prefix: String,
  /// Regular expressions matched against the URL path
  #[serde(default = "default_data_endpoints")]
  pub data_endpoints: Vec<String>,
  /// Application route prefixes handled as pages
  #[serde(default = "default_page_routes")]
  pub page_routes: Vec<String>,
}

impl Default for ClassifierConfig {
  fn default() -> Self {
    Self {
      static_extensions: default_static_extensions(),
      api_prefix: default_api_prefix(),
      data_endpoints: default_data_endpoints(),
      page_routes: default_page_routes(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NormalizationConfig {
  /// Query parameters dropped from cache keys (cache-busting tokens)
  #[serde(default)]
  pub ignored_query_params: BTreeSet<String>,
  /// Drop the entire query string from cache keys
  #[serde(default)]
  pub ignore_query: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
  /// Replay attempts before a mutation is moved to the dead-letter table.
  /// Unset keeps mutations queued forever.
  #[serde(default)]
  pub max_attempts: Option<u32>,
  /// Period of the background retry tick in `serve` mode
  #[serde(default = "default_retry_interval_secs")]
  pub retry_interval_secs: u64,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      max_attempts: None,
      retry_interval_secs: default_retry_interval_secs(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
  #[serde(default = "default_notification_title")]
  pub default_title: String,
  #[serde(default = "default_notification_body")]
  pub default_body: String,
  #[serde(default = "default_icon")]
  pub icon: String,
  #[serde(default = "default_badge")]
  pub badge: String,
  /// Target of a bare notification click
  #[serde(default = "default_route")]
  pub default_route: String,
  /// Action id to route; `null` dismisses without navigating
  #[serde(default = "default_action_routes")]
  pub actions: BTreeMap<String, Option<String>>,
  /// Actions shown when a push payload carries none
  #[serde(default = "default_actions")]
  pub default_actions: Vec<ActionConfig>,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      default_title: default_notification_title(),
      default_body: default_notification_body(),
      icon: default_icon(),
      badge: default_badge(),
      default_route: default_route(),
      actions: default_action_routes(),
      default_actions: default_actions(),
    }
  }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ActionConfig {
  pub id: String,
  pub label: String,
}

fn deserialize_lowercase_set<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Vec<String> = Vec::deserialize(deserializer)?;
  Ok(
    v.into_iter()
      .map(|s| s.trim_start_matches('.').to_lowercase())
      .collect(),
  )
}

fn default_version() -> u64 {
  1
}

fn default_manifest() -> Vec<String> {
  [
    "/",
    "/dashboard",
    "/issues",
    "/map",
    "/analytics",
    "/comments",
    "/settings",
    "/manifest.json",
    "/offline.html",
  ]
  .iter()
  .map(|s| s.to_string())
  .collect()
}

fn default_offline_page() -> String {
  "/offline.html".to_string()
}

fn default_static_extensions() -> BTreeSet<String> {
  [
    "js", "css", "png", "jpg", "jpeg", "gif", "svg", "ico", "woff", "woff2", "ttf", "eot",
  ]
  .iter()
  .map(|s| s.to_string())
  .collect()
}

fn default_api_prefix() -> String {
  "/api/".to_string()
}

fn default_data_endpoints() -> Vec<String> {
  [
    r"/api/issues",
    r"/api/analytics",
    r"/api/departments",
    r"/api/comments",
  ]
  .iter()
  .map(|s| s.to_string())
  .collect()
}

fn default_page_routes() -> Vec<String> {
  [
    "/dashboard",
    "/issues",
    "/map",
    "/analytics",
    "/comments",
    "/settings",
  ]
  .iter()
  .map(|s| s.to_string())
  .collect()
}

fn default_network_timeout_ms() -> u64 {
  8_000
}

fn default_install_attempts() -> u32 {
  3
}

fn default_retry_interval_secs() -> u64 {
  30
}

fn default_notification_title() -> String {
  "Civic Issues Update".to_string()
}

fn default_notification_body() -> String {
  "New update available".to_string()
}

fn default_icon() -> String {
  "/icons/icon-192x192.png".to_string()
}

fn default_badge() -> String {
  "/icons/badge-72x72.png".to_string()
}

fn default_route() -> String {
  "/dashboard".to_string()
}

fn default_action_routes() -> BTreeMap<String, Option<String>> {
  BTreeMap::from([
    ("explore".to_string(), Some("/dashboard".to_string())),
    ("close".to_string(), None),
  ])
}

fn default_actions() -> Vec<ActionConfig> {
  vec![
    ActionConfig {
      id: "explore".to_string(),
      label: "View Details".to_string(),
    },
    ActionConfig {
      id: "close".to_string(),
      label: "Close".to_string(),
    },
  ]
}

impl Config {
  /// Configuration with every default applied for the given origin.
  pub fn with_origin(origin: impl Into<String>) -> Self {
    Self {
      origin: origin.into(),
      version: default_version(),
      manifest: default_manifest(),
      offline_page: default_offline_page(),
      classifier: ClassifierConfig::default(),
      network_timeout_ms: default_network_timeout_ms(),
      install_attempts: default_install_attempts(),
      normalization: NormalizationConfig::default(),
      queue: QueueConfig::default(),
      notifications: NotificationConfig::default(),
      storage_path: None,
    }
  }

  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offsync/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/offsync/config.yaml\n\
                 At minimum it needs an `origin:` entry."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("offsync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.install_attempts == 0 {
      return Err(eyre!("install_attempts must be at least 1"));
    }
    Ok(config)
  }

  pub fn network_timeout(&self) -> Duration {
    Duration::from_millis(self.network_timeout_ms)
  }

  /// Resolve the SQLite path, falling back to the per-user data directory.
  pub fn resolved_storage_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.storage_path {
      return Ok(path.clone());
    }
    Ok(Self::data_dir()?.join("cache.db"))
  }

  /// Directory for the database and log files.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("offsync"))
  }
}
