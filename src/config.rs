use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use url::Url;

use crate::cache::Namespace;
use crate::policy::RouteTable;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "MARKETSYNC_CONFIG";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin the client is served from; requests elsewhere bypass the cache
  pub origin: Url,
  /// Deployed asset set. Changing it is the only trigger for eviction.
  #[serde(default = "default_version")]
  pub version: String,
  /// Used as the fallback notification title
  #[serde(default = "default_app_name")]
  pub app_name: String,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub routes: RoutesConfig,
  /// Must-have asset paths fetched at install time
  #[serde(default = "default_precache")]
  pub precache: Vec<String>,
  #[serde(default)]
  pub lifecycle: LifecycleConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub notifications: NotificationsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Namespace name prefix; namespaces with other prefixes are never evicted
  #[serde(default = "default_prefix")]
  pub prefix: String,
  /// When false every store call fails as unavailable and requests go to the network
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Bodies above this size are rejected with a quota error
  #[serde(default = "default_max_entry_bytes")]
  pub max_entry_bytes: usize,
  /// Database file (default: $XDG_DATA_HOME/marketsync/engine.db)
  pub database: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: default_prefix(),
      enabled: true,
      max_entry_bytes: default_max_entry_bytes(),
      database: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoutesConfig {
  /// Path prefixes of idempotent API reads served network-first
  #[serde(default = "default_api_prefixes")]
  pub api_prefixes: Vec<String>,
  /// File extensions served cache-first (case-insensitive, without the dot)
  #[serde(default = "default_static_extensions", deserialize_with = "deserialize_lowercase_set")]
  pub static_extensions: BTreeSet<String>,
  #[serde(default = "default_offline_page")]
  pub offline_page: String,
  /// Mutation paths that are queued for replay when the network is down
  #[serde(default = "default_queueable_paths")]
  pub queueable_paths: Vec<String>,
}

impl Default for RoutesConfig {
  fn default() -> Self {
    Self {
      api_prefixes: default_api_prefixes(),
      static_extensions: default_static_extensions(),
      offline_page: default_offline_page(),
      queueable_paths: default_queueable_paths(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleConfig {
  /// Activate immediately after a successful install
  #[serde(default = "default_true")]
  pub skip_waiting: bool,
}

impl Default for LifecycleConfig {
  fn default() -> Self {
    Self { skip_waiting: true }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  #[serde(default = "default_bets_tag")]
  pub bets_tag: String,
  /// Path queued operations are POSTed to on replay
  #[serde(default = "default_bets_endpoint")]
  pub bets_endpoint: String,
  #[serde(default = "default_markets_tag")]
  pub markets_tag: String,
  /// Path (with query) fetched by the periodic refresh
  #[serde(default = "default_markets_url")]
  pub markets_url: String,
  /// Path the periodic refresh result is stored under
  #[serde(default = "default_markets_cache_key")]
  pub markets_cache_key: String,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      bets_tag: default_bets_tag(),
      bets_endpoint: default_bets_endpoint(),
      markets_tag: default_markets_tag(),
      markets_url: default_markets_url(),
      markets_cache_key: default_markets_cache_key(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationsConfig {
  #[serde(default = "default_icon")]
  pub icon: String,
  #[serde(default = "default_icon")]
  pub badge: String,
}

impl Default for NotificationsConfig {
  fn default() -> Self {
    Self {
      icon: default_icon(),
      badge: default_icon(),
    }
  }
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

fn default_true() -> bool {
  true
}

fn default_version() -> String {
  "v1".to_string()
}

fn default_app_name() -> String {
  "Market".to_string()
}

fn default_prefix() -> String {
  "marketsync".to_string()
}

fn default_max_entry_bytes() -> usize {
  8 * 1024 * 1024
}

fn default_api_prefixes() -> Vec<String> {
  vec!["/api/".to_string()]
}

fn default_static_extensions() -> BTreeSet<String> {
  [
    "js", "mjs", "css", "png", "jpg", "jpeg", "gif", "svg", "webp", "ico", "woff", "woff2", "ttf",
    "otf",
  ]
  .iter()
  .map(|s| s.to_string())
  .collect()
}

fn default_offline_page() -> String {
  "/offline.html".to_string()
}

fn default_queueable_paths() -> Vec<String> {
  vec!["/api/bets".to_string()]
}

fn default_precache() -> Vec<String> {
  ["/", "/index.html", "/offline.html", "/manifest.json"]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_bets_tag() -> String {
  "sync-bets".to_string()
}

fn default_bets_endpoint() -> String {
  "/api/bets".to_string()
}

fn default_markets_tag() -> String {
  "update-markets".to_string()
}

fn default_markets_url() -> String {
  "/api/markets?limit=20".to_string()
}

fn default_markets_cache_key() -> String {
  "/api/markets".to_string()
}

fn default_icon() -> String {
  "/icons/icon-192.png".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. $MARKETSYNC_CONFIG
  /// 3. ./marketsync.yaml (current directory)
  /// 4. $XDG_CONFIG_HOME/marketsync/config.yaml
  ///
  /// A path named by 1 or 2 must exist; the others are only candidates.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let required = explicit_path
      .map(Path::to_path_buf)
      .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

    if let Some(path) = required {
      if !path.is_file() {
        return Err(eyre!("Config file not found: {}", path.display()));
      }
      return Self::load_from_path(&path);
    }

    match Self::candidates().into_iter().find(|p| p.is_file()) {
      Some(path) => Self::load_from_path(&path),
      None => Err(eyre!(
        "No configuration file found. Pass --config, set {}, or create \
         ~/.config/marketsync/config.yaml with at least `origin: https://...`",
        CONFIG_ENV
      )),
    }
  }

  fn candidates() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("marketsync.yaml")];
    if let Some(config_dir) = dirs::config_dir() {
      paths.push(config_dir.join("marketsync").join("config.yaml"));
    }
    paths
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.validate()?;
    Ok(config)
  }

  /// Reject settings that would make namespaces or routes ambiguous.
  fn validate(&self) -> Result<()> {
    if !matches!(self.origin.scheme(), "http" | "https") {
      return Err(eyre!("origin must be http or https, got {}", self.origin));
    }
    if self.origin.path() != "/" {
      return Err(eyre!("origin must not carry a path, got {}", self.origin));
    }
    if self.version.is_empty() || self.version.contains('/') {
      return Err(eyre!("version must be non-empty and contain no '/'"));
    }
    let prefix = &self.cache.prefix;
    if prefix.is_empty() || prefix.contains("-precache-") || prefix.contains("-runtime-") {
      return Err(eyre!("cache prefix '{}' is not usable as a namespace prefix", prefix));
    }
    if let Some(path) = self
      .routes
      .api_prefixes
      .iter()
      .chain(&self.routes.queueable_paths)
      .find(|p| !p.starts_with('/'))
    {
      return Err(eyre!("route path '{}' must start with '/'", path));
    }
    Ok(())
  }

  /// Configuration with every default and the given origin.
  pub fn with_origin(origin: Url) -> Self {
    Self {
      origin,
      version: default_version(),
      app_name: default_app_name(),
      cache: CacheConfig::default(),
      routes: RoutesConfig::default(),
      precache: default_precache(),
      lifecycle: LifecycleConfig::default(),
      sync: SyncConfig::default(),
      notifications: NotificationsConfig::default(),
    }
  }

  /// Database path: configured, or under the platform data directory.
  pub fn database_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.cache.database {
      return Ok(path.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("marketsync").join("engine.db"))
  }

  pub fn precache_namespace(&self) -> Namespace {
    Namespace::precache(&self.cache.prefix, &self.version)
  }

  pub fn runtime_namespace(&self) -> Namespace {
    Namespace::runtime(&self.cache.prefix, &self.version)
  }

  pub fn route_table(&self) -> RouteTable {
    RouteTable {
      origin: self.origin.clone(),
      api_prefixes: self.routes.api_prefixes.clone(),
      static_extensions: self.routes.static_extensions.clone(),
      queueable_paths: self.routes.queueable_paths.clone(),
    }
  }

  /// Resolve an origin-relative path (or absolute URL) against the origin.
  pub fn resolve(&self, path: &str) -> std::result::Result<Url, url::ParseError> {
    self.origin.join(path)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_fills_defaults() {
    let config = Config::from_yaml("origin: https://bets.example/\n").unwrap();
    assert_eq!(config.version, "v1");
    assert_eq!(config.sync.bets_tag, "sync-bets");
    assert_eq!(config.sync.markets_url, "/api/markets?limit=20");
    assert!(config.routes.static_extensions.contains("woff2"));
    assert!(config.precache.contains(&"/offline.html".to_string()));
    assert!(config.lifecycle.skip_waiting);
  }

  #[test]
  fn test_static_extensions_are_normalized() {
    let config = Config::from_yaml(
      "origin: https://bets.example/\nroutes:\n  static_extensions: ['.JS', 'Png']\n",
    )
    .unwrap();
    let exts: Vec<_> = config.routes.static_extensions.iter().cloned().collect();
    assert_eq!(exts, vec!["js".to_string(), "png".to_string()]);
  }

  #[test]
  fn test_namespace_names_follow_version() {
    let config = Config::from_yaml("origin: https://bets.example/\nversion: v7\n").unwrap();
    assert_eq!(config.precache_namespace().as_str(), "marketsync-precache-v7");
    assert_eq!(config.runtime_namespace().as_str(), "marketsync-runtime-v7");
  }

  #[test]
  fn test_missing_origin_is_rejected() {
    assert!(Config::from_yaml("version: v1\n").is_err());
  }

  #[test]
  fn test_origin_with_path_is_rejected() {
    let err = Config::from_yaml("origin: https://bets.example/app/\n").unwrap_err();
    assert!(err.to_string().contains("path"));
  }

  #[test]
  fn test_relative_route_paths_are_rejected() {
    let yaml = "origin: https://bets.example/\nroutes:\n  queueable_paths: ['api/bets']\n";
    assert!(Config::from_yaml(yaml).is_err());
  }

  #[test]
  fn test_load_reads_explicit_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("marketsync.yaml");
    std::fs::write(&path, "origin: https://bets.example/\nversion: v4\n").unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.version, "v4");
  }

  #[test]
  fn test_explicit_missing_path_errors() {
    let err = Config::load(Some(Path::new("/nonexistent/marketsync.yaml"))).unwrap_err();
    assert!(err.to_string().contains("not found"));
  }
}
