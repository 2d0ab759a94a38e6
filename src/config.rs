use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::intercept::{InterceptorOptions, RouteRule};
use crate::orchestrator::OrchestratorOptions;
use crate::queue::EnqueueOptions;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub service: ServiceConfig,
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub queue: QueueConfig,
  #[serde(default)]
  pub intercept: InterceptConfig,
  /// Log filter directive, e.g. "syncvault=debug" (overridden by RUST_LOG)
  pub log: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
  pub url: String,
  /// Request timeout in seconds
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
  /// Database file (defaults to the platform data directory)
  pub path: Option<PathBuf>,
  /// Local data older than this many minutes is reported as stale
  #[serde(default = "default_stale_minutes")]
  pub stale_minutes: i64,
}

impl Default for StorageConfig {
  fn default() -> Self {
    Self {
      path: None,
      stale_minutes: default_stale_minutes(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
  #[serde(default = "default_max_retries")]
  pub max_retries: u32,
  /// Seconds between background agent passes
  #[serde(default = "default_interval_secs")]
  pub interval_secs: u64,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      max_retries: default_max_retries(),
      interval_secs: default_interval_secs(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InterceptConfig {
  /// Bump to discard every previously cached response on activation
  #[serde(default = "default_cache_version")]
  pub cache_version: String,
  #[serde(default = "default_shell_path")]
  pub shell_path: String,
  /// Lifetime of cached responses in minutes; unset keeps them until replaced
  pub response_ttl_minutes: Option<i64>,
  /// Rules consulted before the built-in route table
  #[serde(default)]
  pub routes: Vec<RouteRule>,
}

impl Default for InterceptConfig {
  fn default() -> Self {
    Self {
      cache_version: default_cache_version(),
      shell_path: default_shell_path(),
      response_ttl_minutes: None,
      routes: Vec::new(),
    }
  }
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_stale_minutes() -> i64 {
  5
}

fn default_max_retries() -> u32 {
  3
}

fn default_interval_secs() -> u64 {
  60
}

fn default_cache_version() -> String {
  "v1".to_string()
}

fn default_shell_path() -> String {
  "/".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./syncvault.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/syncvault/config.yaml
  ///
  /// Without a file, SYNCVAULT_URL alone is enough. When set it also
  /// overrides the file's service URL.
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

    let env_url = std::env::var("SYNCVAULT_URL").ok();
    let mut config = match (path, env_url.as_deref()) {
      (Some(p), _) => Self::load_from_path(&p)?,
      (None, Some(url)) => Self::with_url(url),
      (None, None) => {
        return Err(eyre!(
          "No configuration found. Set SYNCVAULT_URL or create ~/.config/syncvault/config.yaml"
        ))
      }
    };
    if let Some(url) = env_url {
      config.service.url = url;
    }
    Ok(config)
  }

  /// Defaults for everything but the service URL.
  pub fn with_url(url: &str) -> Self {
    Self {
      service: ServiceConfig {
        url: url.to_string(),
        timeout_secs: default_timeout_secs(),
      },
      storage: StorageConfig::default(),
      queue: QueueConfig::default(),
      intercept: InterceptConfig::default(),
      log: None,
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("syncvault.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("syncvault").join("config.yaml");
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

  fn parse(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  /// Get the API token from the environment, if any.
  ///
  /// Checks SYNCVAULT_TOKEN.
  pub fn get_api_token() -> Option<String> {
    std::env::var("SYNCVAULT_TOKEN").ok().filter(|t| !t.is_empty())
  }

  /// Get the login password from environment variables.
  ///
  /// Checks SYNCVAULT_PASSWORD.
  pub fn get_password() -> Result<String> {
    std::env::var("SYNCVAULT_PASSWORD")
      .map_err(|_| eyre!("Password not found. Set SYNCVAULT_PASSWORD environment variable."))
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.service.timeout_secs)
  }

  pub fn agent_interval(&self) -> Duration {
    Duration::from_secs(self.queue.interval_secs.max(1))
  }

  pub fn interceptor_options(&self) -> InterceptorOptions {
    InterceptorOptions {
      cache_version: self.intercept.cache_version.clone(),
      shell_path: self.intercept.shell_path.clone(),
      response_ttl: self.intercept.response_ttl_minutes.map(chrono::Duration::minutes),
      ..InterceptorOptions::default()
    }
  }

  pub fn orchestrator_options(&self) -> OrchestratorOptions {
    OrchestratorOptions {
      enqueue: EnqueueOptions::default().with_max_retries(self.queue.max_retries),
      ..OrchestratorOptions::default()
    }
    .with_stale_time(chrono::Duration::minutes(self.storage.stale_minutes))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::intercept::{PathMatch, Strategy};

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::parse("service:\n  url: https://tools.example.com/api\n").unwrap();
    assert_eq!(config.service.timeout_secs, 30);
    assert_eq!(config.queue.max_retries, 3);
    assert_eq!(config.intercept.cache_version, "v1");
    assert!(config.storage.path.is_none());
    assert_eq!(config.agent_interval(), Duration::from_secs(60));
  }

  #[test]
  fn test_full_config() {
    let yaml = r#"
service:
  url: http://localhost:8080
  timeout_secs: 5
storage:
  path: /tmp/sv.db
  stale_minutes: 1
queue:
  max_retries: 7
  interval_secs: 15
intercept:
  cache_version: v2
  response_ttl_minutes: 60
  routes:
    - match:
        prefix: /docs
      strategy: cache-first
log: syncvault=debug
"#;
    let config = Config::parse(yaml).unwrap();
    assert_eq!(config.timeout(), Duration::from_secs(5));
    assert_eq!(config.orchestrator_options().enqueue.max_retries, 7);
    assert_eq!(
      config.interceptor_options().response_ttl,
      Some(chrono::Duration::minutes(60))
    );
    assert_eq!(
      config.intercept.routes,
      vec![RouteRule::new(PathMatch::Prefix("/docs".into()), Strategy::CacheFirst)]
    );
    assert_eq!(config.log.as_deref(), Some("syncvault=debug"));
  }

  #[test]
  fn test_missing_explicit_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.yaml");
    assert!(Config::load(Some(&missing)).is_err());
  }
}
