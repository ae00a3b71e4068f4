use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::connectivity::OfflineViews;
use crate::db::Database;
use crate::interceptor::ClassifierRules;
use crate::session::{SessionToken, DEFAULT_TTL_DAYS};
use crate::upload::{DEFAULT_CREDENTIAL_HEADER, DEFAULT_THRESHOLD_BYTES};

/// Environment variable holding the live session token.
pub const SESSION_TOKEN_VAR: &str = "CAMPUS_SESSION_TOKEN";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub server: ServerConfig,
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub interceptor: InterceptorConfig,
  #[serde(default)]
  pub connectivity: ConnectivityConfig,
  #[serde(default)]
  pub upload: UploadConfig,
  #[serde(default)]
  pub session: SessionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  /// Origin of the campus application, e.g. https://campus.example.edu
  pub base_url: String,
  #[serde(default = "default_relay_path")]
  pub relay_path: String,
  #[serde(default = "default_mint_path")]
  pub mint_path: String,
}

fn default_relay_path() -> String {
  "/api/upload".to_string()
}

fn default_mint_path() -> String {
  "/api/upload/sign".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  /// Defaults to the platform data directory
  pub data_dir: Option<PathBuf>,
  /// Hard cap on the database file
  pub quota_bytes: Option<u64>,
  /// Byte budget for downloaded media; unset means no eviction
  pub media_budget_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InterceptorConfig {
  pub cache_version: String,
  /// Routes cached at install time
  pub manifest: Vec<String>,
  pub fallback_route: String,
  #[serde(flatten)]
  pub rules: ClassifierRules,
}

impl Default for InterceptorConfig {
  fn default() -> Self {
    Self {
      cache_version: "v1".to_string(),
      manifest: vec!["/".to_string(), "/offline".to_string()],
      fallback_route: "/offline".to_string(),
      rules: ClassifierRules::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
  #[serde(flatten)]
  pub views: OfflineViews,
  /// Wait after reconnecting before restoring the previous view
  pub settle_delay_ms: u64,
  /// How often `serve` checks that the server is reachable
  pub probe_interval_ms: u64,
}

impl Default for ConnectivityConfig {
  fn default() -> Self {
    Self {
      views: OfflineViews::default(),
      settle_delay_ms: 1500,
      probe_interval_ms: 10_000,
    }
  }
}

impl ConnectivityConfig {
  pub fn settle_delay(&self) -> Duration {
    Duration::from_millis(self.settle_delay_ms)
  }

  pub fn probe_interval(&self) -> Duration {
    Duration::from_millis(self.probe_interval_ms)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
  /// Files at or above this size upload directly to storage
  pub threshold_bytes: u64,
  /// Header carrying the short-lived storage credential
  pub credential_header: String,
}

impl Default for UploadConfig {
  fn default() -> Self {
    Self {
      threshold_bytes: DEFAULT_THRESHOLD_BYTES,
      credential_header: DEFAULT_CREDENTIAL_HEADER.to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
  pub ttl_days: i64,
}

impl Default for SessionConfig {
  fn default() -> Self {
    Self {
      ttl_days: DEFAULT_TTL_DAYS,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./campus-offline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/campus-offline/config.yaml
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
        "No configuration file found. Create one at ~/.config/campus-offline/config.yaml\n\
                 It needs at least `server.base_url`."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("campus-offline.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("campus-offline").join("config.yaml");
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
    config.base_url()?;
    Ok(config)
  }

  pub fn base_url(&self) -> Result<Url> {
    Url::parse(&self.server.base_url)
      .map_err(|e| eyre!("Invalid server.base_url {}: {}", self.server.base_url, e))
  }

  /// Resolve a server path against the base URL.
  pub fn endpoint(&self, path: &str) -> Result<Url> {
    self
      .base_url()?
      .join(path)
      .map_err(|e| eyre!("Invalid endpoint path {}: {}", path, e))
  }

  pub fn data_dir(&self) -> Result<PathBuf> {
    match &self.storage.data_dir {
      Some(dir) => Ok(dir.clone()),
      None => Ok(Database::data_dir()?),
    }
  }

  pub fn database_path(&self) -> Result<PathBuf> {
    Ok(self.data_dir()?.join("offline.db"))
  }

  /// Get the live session token from the environment, if signed in.
  pub fn session_token() -> Option<SessionToken> {
    std::env::var(SESSION_TOKEN_VAR)
      .ok()
      .filter(|t| !t.is_empty())
      .map(SessionToken::new)
  }
}
