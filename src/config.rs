use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::cache::{EvictionPolicy, NamespaceRegistry, DEFAULT_MAX_ENTRIES};
use crate::controller::ControllerSettings;
use crate::router::Router;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Base URL that relative bootstrap entries resolve against
  pub origin: String,
  pub caches: CachesConfig,
  pub routes: RoutesConfig,
  /// Entry bound for the immutable namespace
  pub max_immutable_entries: usize,
  /// Resources seeded into the static namespace on install
  pub bootstrap: Vec<String>,
  pub storage: StorageKind,
  /// SQLite file (defaults to $XDG_DATA_HOME/precache/cache.db)
  pub database: Option<PathBuf>,
  pub user_agent: String,
  pub request_timeout_secs: u64,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost/".to_string(),
      caches: CachesConfig::default(),
      routes: RoutesConfig::default(),
      max_immutable_entries: DEFAULT_MAX_ENTRIES,
      bootstrap: DEFAULT_BOOTSTRAP.iter().map(|s| s.to_string()).collect(),
      storage: StorageKind::default(),
      database: None,
      user_agent: concat!("precache/", env!("CARGO_PKG_VERSION")).to_string(),
      request_timeout_secs: 30,
    }
  }
}

const DEFAULT_BOOTSTRAP: &[&str] = &[
  "/",
  "/favicon.ico",
  "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.2.1/css/all.min.css",
  "https://cdnjs.cloudflare.com/ajax/libs/screenfull.js/5.2.0/screenfull.min.js",
  "https://cdnjs.cloudflare.com/ajax/libs/jszip/3.10.1/jszip.min.js",
  "https://cdnjs.cloudflare.com/ajax/libs/FileSaver.js/2.0.0/FileSaver.min.js",
];

/// A versioned cache name; the physical cache is `<name>-v<version>`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CacheName {
  pub name: String,
  pub version: u32,
}

impl CacheName {
  fn new(name: &str, version: u32) -> Self {
    Self {
      name: name.to_string(),
      version,
    }
  }

  pub fn physical_name(&self) -> String {
    format!("{}-v{}", self.name, self.version)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CachesConfig {
  #[serde(rename = "static")]
  pub static_assets: CacheName,
  pub immutable: CacheName,
  pub remote_api: CacheName,
}

impl Default for CachesConfig {
  fn default() -> Self {
    Self {
      static_assets: CacheName::new("harness", 1),
      immutable: CacheName::new("game-data", 1),
      remote_api: CacheName::new("github-api", 1),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoutesConfig {
  /// URL prefix of content that never changes
  pub immutable_prefix: String,
  /// URL prefix of the remote API
  pub remote_api_prefix: String,
}

impl Default for RoutesConfig {
  fn default() -> Self {
    Self {
      immutable_prefix: "https://raw.githubusercontent.com/".to_string(),
      remote_api_prefix: "https://api.github.com/".to_string(),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
  /// SQLite database on disk
  #[default]
  Sqlite,
  /// Process memory; nothing survives exit
  Memory,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./precache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/precache/config.yaml
  ///
  /// Built-in defaults apply when no file is found.
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

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };
    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("precache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("precache").join("config.yaml");
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
    Ok(serde_yaml::from_str(contents)?)
  }

  pub fn validate(&self) -> Result<()> {
    if self.max_immutable_entries == 0 {
      return Err(eyre!("max_immutable_entries must be at least 1"));
    }
    for prefix in [&self.routes.immutable_prefix, &self.routes.remote_api_prefix] {
      Url::parse(prefix).map_err(|e| eyre!("Invalid route prefix {}: {}", prefix, e))?;
    }
    self.registry()?;
    self.bootstrap_urls()?;
    Ok(())
  }

  pub fn registry(&self) -> Result<NamespaceRegistry> {
    Ok(NamespaceRegistry::new(
      &self.caches.static_assets.physical_name(),
      &self.caches.immutable.physical_name(),
      &self.caches.remote_api.physical_name(),
    )?)
  }

  /// Bootstrap entries as absolute URLs, relative ones resolved against `origin`.
  pub fn bootstrap_urls(&self) -> Result<Vec<Url>> {
    let origin =
      Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin {}: {}", self.origin, e))?;

    self
      .bootstrap
      .iter()
      .map(|entry| {
        origin
          .join(entry)
          .map_err(|e| eyre!("Invalid bootstrap URL {}: {}", entry, e))
      })
      .collect()
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_secs)
  }

  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.database {
      Some(path) => Ok(path.clone()),
      None => crate::cache::SqliteStorage::default_path(),
    }
  }

  pub fn controller_settings(&self) -> Result<ControllerSettings> {
    Ok(ControllerSettings {
      registry: self.registry()?,
      router: Router::new(
        self.routes.immutable_prefix.clone(),
        self.routes.remote_api_prefix.clone(),
      ),
      eviction: EvictionPolicy::new(self.max_immutable_entries),
      bootstrap: self.bootstrap_urls()?,
    })
  }
}
