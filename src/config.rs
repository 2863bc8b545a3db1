use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub forge: ForgeConfig,
  /// Repositories tracked by the background refresh scheduler.
  #[serde(default)]
  pub repos: Vec<String>,
  #[serde(default)]
  pub refresh: RefreshConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  /// Directory for daily-rolling daemon logs (stderr only if unset)
  pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForgeConfig {
  /// Base URL of the forge query API, e.g. "https://forge.example.com/api/v1"
  pub url: String,
  /// Per-request timeout in seconds
  #[serde(default = "default_http_timeout")]
  pub http_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
  /// Seconds between scheduler cycles
  #[serde(default = "default_interval")]
  pub interval_secs: u64,
  /// Fixed delay between repositories within one cycle
  #[serde(default = "default_repo_delay")]
  pub repo_delay_secs: u64,
  /// Skip a cycle entirely when the remaining quota is at or below this
  #[serde(default = "default_quota_floor")]
  pub quota_floor: i64,
}

impl Default for RefreshConfig {
  fn default() -> Self {
    Self {
      interval_secs: default_interval(),
      repo_delay_secs: default_repo_delay(),
      quota_floor: default_quota_floor(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
  /// Override for the shared cache database path
  pub path: Option<PathBuf>,
}

fn default_http_timeout() -> u64 {
  30
}

fn default_interval() -> u64 {
  600
}

fn default_repo_delay() -> u64 {
  5
}

fn default_quota_floor() -> i64 {
  250
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./forgeboard.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/forgeboard/config.yaml
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
        "No configuration file found. Create one at ~/.config/forgeboard/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("forgeboard.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("forgeboard").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Resolved cache database path (config override or the XDG data dir).
  pub fn cache_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.cache.path {
      return Ok(path.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("forgeboard").join("cache.db"))
  }

  /// Get the forge API token from environment variables.
  ///
  /// Checks FORGEBOARD_TOKEN first, then FORGE_API_TOKEN as fallback.
  pub fn api_token() -> Result<String> {
    std::env::var("FORGEBOARD_TOKEN")
      .or_else(|_| std::env::var("FORGE_API_TOKEN"))
      .map_err(|_| {
        eyre!(
          "Forge API token not found. Set FORGEBOARD_TOKEN or FORGE_API_TOKEN environment variable."
        )
      })
  }

  /// Get the shared secret for signed invalidation events.
  pub fn webhook_secret() -> Result<String> {
    std::env::var("FORGEBOARD_WEBHOOK_SECRET").map_err(|_| {
      eyre!("Webhook secret not found. Set FORGEBOARD_WEBHOOK_SECRET environment variable.")
    })
  }
}
