use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::auth::DEFAULT_SESSION_COOKIE;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub database: DatabaseConfig,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base url of the profile API (e.g. "https://example.com/api")
  #[serde(default = "default_api_url")]
  pub url: String,
  /// Cookie that carries the session token
  #[serde(default = "default_session_cookie")]
  pub session_cookie: String,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      url: default_api_url(),
      session_cookie: default_session_cookie(),
    }
  }
}

fn default_api_url() -> String {
  "http://localhost:3000/api".to_string()
}

fn default_session_cookie() -> String {
  DEFAULT_SESSION_COOKIE.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Seconds before cached reads are considered stale
  #[serde(default = "default_stale_time_secs")]
  pub stale_time_secs: u32,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_time_secs: default_stale_time_secs(),
    }
  }
}

impl CacheConfig {
  pub fn stale_time(&self) -> chrono::Duration {
    chrono::Duration::seconds(self.stale_time_secs.into())
  }
}

fn default_stale_time_secs() -> u32 {
  60
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
  /// SQLite file for local mode (defaults to the data directory)
  pub path: Option<PathBuf>,
  /// Lifetime of sessions issued by `login`
  #[serde(default = "default_session_ttl_days")]
  pub session_ttl_days: u32,
}

impl Default for DatabaseConfig {
  fn default() -> Self {
    Self {
      path: None,
      session_ttl_days: default_session_ttl_days(),
    }
  }
}

fn default_session_ttl_days() -> u32 {
  30
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
  /// Default filter directive, overridden by LINKDECK_LOG
  #[serde(default = "default_log_level", deserialize_with = "deserialize_lowercase")]
  pub level: String,
  /// Directory for log files (defaults to the data directory)
  pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      dir: None,
    }
  }
}

fn default_log_level() -> String {
  "info".to_string()
}

fn deserialize_lowercase<'de, D>(deserializer: D) -> Result<String, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let s = String::deserialize(deserializer)?;
  Ok(s.trim().to_lowercase())
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided (must exist)
  /// 2. ./linkdeck.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/linkdeck/config.yaml
  ///
  /// Without any file, defaults are used.
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
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("linkdeck.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("linkdeck").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    Ok(serde_yaml::from_str(contents)?)
  }

  /// Get the session token from the environment.
  ///
  /// Checks LINKDECK_SESSION_TOKEN.
  pub fn get_session_token() -> Result<String> {
    std::env::var("LINKDECK_SESSION_TOKEN")
      .map_err(|_| eyre!("Session token not found. Set LINKDECK_SESSION_TOKEN or run `linkdeck login`."))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_document_uses_defaults() {
    let config = Config::parse("{}").unwrap();
    assert_eq!(config.api.url, "http://localhost:3000/api");
    assert_eq!(config.api.session_cookie, DEFAULT_SESSION_COOKIE);
    assert_eq!(config.cache.stale_time(), chrono::Duration::seconds(60));
    assert_eq!(config.database.session_ttl_days, 30);
    assert_eq!(config.log.level, "info");
  }

  #[test]
  fn test_partial_sections_fill_in_defaults() {
    let config = Config::parse(
      r#"
api:
  url: https://links.example.com/api
cache:
  stale_time_secs: 5
log:
  level: " DEBUG "
"#,
    )
    .unwrap();

    assert_eq!(config.api.url, "https://links.example.com/api");
    assert_eq!(config.api.session_cookie, DEFAULT_SESSION_COOKIE);
    assert_eq!(config.cache.stale_time(), chrono::Duration::seconds(5));
    assert_eq!(config.log.level, "debug");
    assert!(config.database.path.is_none());
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    assert!(Config::load(Some(Path::new("/definitely/not/here.yaml"))).is_err());
  }

  #[test]
  fn test_invalid_yaml_is_an_error() {
    assert!(Config::parse("cache: [1, 2").is_err());
  }
}
