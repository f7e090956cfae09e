use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::upstream::FetchOptions;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub upstream: UpstreamConfig,
  pub astronomy: AstronomyConfig,
  pub jwst: JwstConfig,
  pub cache: CacheConfig,
  pub logging: LoggingConfig,
}

/// Telemetry backend serving ISS position, trend and OSDR catalog data.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
  pub base_url: String,
  pub timeout_secs: u64,
  pub max_attempts: u32,
  pub retry_delay_ms: u64,
  /// Timeout of the single health probe
  pub health_timeout_secs: u64,
  pub position_ttl_secs: u64,
  pub catalog_ttl_secs: u64,
}

impl Default for UpstreamConfig {
  fn default() -> Self {
    Self {
      base_url: "http://rust_iss:3000".to_string(),
      timeout_secs: 10,
      max_attempts: 3,
      retry_delay_ms: 100,
      health_timeout_secs: 5,
      position_ttl_secs: 60,
      catalog_ttl_secs: 300,
    }
  }
}

impl UpstreamConfig {
  pub fn fetch_options(&self) -> FetchOptions {
    fetch_options(self.timeout_secs, self.max_attempts, self.retry_delay_ms)
  }
}

/// Credentialed astronomy events API.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AstronomyConfig {
  pub base_url: String,
  pub timeout_secs: u64,
  pub max_attempts: u32,
  pub retry_delay_ms: u64,
  pub ttl_secs: u64,
  /// Usually supplied through ASTRO_APP_ID rather than the file
  pub app_id: Option<String>,
  /// Usually supplied through ASTRO_APP_SECRET rather than the file
  pub app_secret: Option<String>,
}

impl Default for AstronomyConfig {
  fn default() -> Self {
    Self {
      base_url: "https://api.astronomyapi.com/api/v2".to_string(),
      timeout_secs: 15,
      max_attempts: 2,
      retry_delay_ms: 200,
      ttl_secs: 3600,
      app_id: None,
      app_secret: None,
    }
  }
}

impl AstronomyConfig {
  pub fn fetch_options(&self) -> FetchOptions {
    fetch_options(self.timeout_secs, self.max_attempts, self.retry_delay_ms)
  }

  /// Both credential halves, or `None` if either is missing or empty.
  pub fn credentials(&self) -> Option<(&str, &str)> {
    let id = self.app_id.as_deref().filter(|s| !s.is_empty())?;
    let secret = self.app_secret.as_deref().filter(|s| !s.is_empty())?;
    Some((id, secret))
  }
}

/// JWST image catalog.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JwstConfig {
  pub base_url: String,
  pub timeout_secs: u64,
  pub max_attempts: u32,
  pub retry_delay_ms: u64,
  pub ttl_secs: u64,
  /// Sent as `x-api-key` when set. Usually supplied through JWST_API_KEY
  pub api_key: Option<String>,
}

impl Default for JwstConfig {
  fn default() -> Self {
    Self {
      base_url: "https://api.jwstapi.com".to_string(),
      timeout_secs: 15,
      max_attempts: 2,
      retry_delay_ms: 200,
      ttl_secs: 300,
      api_key: None,
    }
  }
}

impl JwstConfig {
  pub fn fetch_options(&self) -> FetchOptions {
    fetch_options(self.timeout_secs, self.max_attempts, self.retry_delay_ms)
  }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
  /// In-process map, lost on exit
  #[default]
  Memory,
  /// SQLite file, survives restarts
  Sqlite,
  /// Every call goes upstream
  Disabled,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub backend: CacheBackend,
  /// SQLite file location (default: $XDG_DATA_HOME/orbitcache/cache.db)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  pub level: String,
  pub dir: PathBuf,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      dir: PathBuf::from("logs"),
    }
  }
}

fn fetch_options(timeout_secs: u64, max_attempts: u32, retry_delay_ms: u64) -> FetchOptions {
  FetchOptions {
    timeout: Duration::from_secs(timeout_secs),
    max_attempts,
    retry_delay: Duration::from_millis(retry_delay_ms),
  }
}

impl Config {
  /// Load configuration from file, then apply environment overrides.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./orbitcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/orbitcache/config.yaml
  ///
  /// With no file found the built-in defaults are used.
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

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };
    config.apply_env(|name| std::env::var(name).ok());

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("orbitcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("orbitcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    // An empty file deserializes to null
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents)
  }

  /// Overlay deployment variables. Empty values are ignored.
  ///
  /// RUST_BASE, ASTRO_APP_ID, ASTRO_APP_SECRET, JWST_HOST, JWST_API_KEY
  fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
    let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(base) = var("RUST_BASE") {
      self.upstream.base_url = base;
    }
    if let Some(id) = var("ASTRO_APP_ID") {
      self.astronomy.app_id = Some(id);
    }
    if let Some(secret) = var("ASTRO_APP_SECRET") {
      self.astronomy.app_secret = Some(secret);
    }
    if let Some(host) = var("JWST_HOST") {
      self.jwst.base_url = host;
    }
    if let Some(key) = var("JWST_API_KEY") {
      self.jwst.api_key = Some(key);
    }
  }
}
