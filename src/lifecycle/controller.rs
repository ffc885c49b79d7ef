//! Install, activation and takeover for one deployed version.

use futures::future::join_all;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use super::registry::{VersionState, VersionStore};
use crate::cache::{CacheEntry, CacheStore, Namespace};
use crate::error::EngineError;
use crate::fetch::Fetcher;
use crate::http::Request;
use crate::notify::Clients;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
  pub version: String,
  pub assets: usize,
  /// Version that was active when this one finished installing
  pub superseded: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationReport {
  pub version: String,
  /// Namespaces deleted because they belong to other versions
  pub evicted: Vec<String>,
}

pub struct LifecycleController {
  cache: Arc<dyn CacheStore>,
  versions: Arc<dyn VersionStore>,
  fetcher: Arc<dyn Fetcher>,
  clients: Arc<dyn Clients>,
  prefix: String,
  version: String,
  manifest: Vec<Url>,
}

impl LifecycleController {
  pub fn new(
    cache: Arc<dyn CacheStore>,
    versions: Arc<dyn VersionStore>,
    fetcher: Arc<dyn Fetcher>,
    clients: Arc<dyn Clients>,
    prefix: impl Into<String>,
    version: impl Into<String>,
    manifest: Vec<Url>,
  ) -> Self {
    Self {
      cache,
      versions,
      fetcher,
      clients,
      prefix: prefix.into(),
      version: version.into(),
      manifest,
    }
  }

  fn precache(&self) -> Namespace {
    Namespace::precache(&self.prefix, &self.version)
  }

  fn runtime(&self) -> Namespace {
    Namespace::runtime(&self.prefix, &self.version)
  }

  /// Populate this version's precache namespace with the whole manifest.
  ///
  /// All-or-nothing: the namespace is swapped in one store call once every
  /// asset has been fetched. A first install that fails is forgotten and
  /// never becomes current. A failed reinstall of a version that already
  /// finished installing leaves its precache and state untouched.
  pub async fn install(&self) -> Result<InstallReport, EngineError> {
    let previous = self.versions.state(&self.version)?;
    let reinstall = matches!(
      previous,
      Some(VersionState::Installed | VersionState::Active | VersionState::Superseded)
    );
    info!(version = %self.version, assets = self.manifest.len(), reinstall, "installing");
    if !reinstall {
      self
        .versions
        .set_state(&self.version, VersionState::Installing)?;
    }

    let requests: Vec<Request> = self.manifest.iter().cloned().map(Request::get).collect();
    let results = join_all(requests.iter().map(|r| self.fetcher.fetch(r))).await;

    let mut entries = Vec::with_capacity(results.len());
    for (request, result) in requests.iter().zip(results) {
      let failure = match result {
        Ok(response) => match CacheEntry::capture(request.fingerprint(), response) {
          Some(entry) => {
            entries.push(entry);
            continue;
          }
          None => "unsuccessful response".to_string(),
        },
        Err(e) => e.to_string(),
      };
      return Err(self.abort_install(reinstall, request.url.path(), failure));
    }

    let precache = self.precache();
    if let Err(e) = self.cache.replace(&precache, &entries) {
      return Err(self.abort_install(reinstall, precache.as_str(), e.to_string()));
    }

    let superseded = self.versions.active_version()?.filter(|v| *v != self.version);
    if let Some(previous) = &superseded {
      self
        .versions
        .set_state(previous, VersionState::Superseded)?;
    }
    let state = match previous {
      Some(VersionState::Active) => VersionState::Active,
      _ => VersionState::Installed,
    };
    self.versions.set_state(&self.version, state)?;

    info!(version = %self.version, assets = entries.len(), %state, "installed");
    Ok(InstallReport {
      version: self.version.clone(),
      assets: entries.len(),
      superseded,
    })
  }

  fn abort_install(&self, reinstall: bool, path: &str, reason: String) -> EngineError {
    if reinstall {
      warn!(version = %self.version, path, %reason, "reinstall aborted, keeping installed precache");
    } else {
      warn!(version = %self.version, path, %reason, "installation aborted");
      if let Err(e) = self.cache.delete(&self.precache()) {
        warn!(error = %e, "could not remove partial precache");
      }
      if let Err(e) = self.versions.forget(&self.version) {
        warn!(error = %e, "could not clear installing state");
      }
    }
    EngineError::InstallationIncomplete {
      path: path.to_string(),
      reason,
    }
  }

  /// Make this version current: evict other versions' namespaces, record the
  /// version as active and take over open clients.
  pub async fn activate(&self) -> Result<ActivationReport, EngineError> {
    match self.versions.state(&self.version)? {
      Some(VersionState::Installed) | Some(VersionState::Active) => {}
      _ => return Err(EngineError::NotInstalled(self.version.clone())),
    }

    let keep = [self.precache(), self.runtime()];
    if let Err(e) = self.cache.open(&keep[1]) {
      warn!(error = %e, "could not open runtime namespace");
    }

    let mut evicted = Vec::new();
    for name in self.cache.list_namespaces()? {
      let namespace = Namespace::from(name);
      if !namespace.is_owned_by(&self.prefix) || keep.contains(&namespace) {
        continue;
      }
      match self.cache.delete(&namespace) {
        Ok(_) => evicted.push(namespace.to_string()),
        Err(e) => warn!(%namespace, error = %e, "could not evict namespace"),
      }
    }

    for (version, _) in self.versions.versions()? {
      if version != self.version {
        self.versions.forget(&version)?;
      }
    }
    self
      .versions
      .set_state(&self.version, VersionState::Active)?;

    self.clients.claim().await;
    info!(version = %self.version, evicted = evicted.len(), "activated");

    Ok(ActivationReport {
      version: self.version.clone(),
      evicted,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::db::Database;
  use crate::http::{Method, Response};
  use crate::lifecycle::SqliteVersions;
  use crate::test_support::{url, FakeClients, ScriptedFetcher};

  struct Harness {
    cache: Arc<SqliteStorage>,
    versions: Arc<SqliteVersions>,
    fetcher: Arc<ScriptedFetcher>,
    clients: Arc<FakeClients>,
  }

  impl Harness {
    fn new() -> Self {
      let db = Database::open_in_memory().unwrap();
      Self {
        cache: Arc::new(SqliteStorage::new(db.clone(), 1 << 20)),
        versions: Arc::new(SqliteVersions::new(db)),
        fetcher: ScriptedFetcher::new(),
        clients: Arc::new(FakeClients::default()),
      }
    }

    fn controller(&self, version: &str, manifest: &[&str]) -> LifecycleController {
      LifecycleController::new(
        self.cache.clone(),
        self.versions.clone(),
        self.fetcher.clone(),
        self.clients.clone(),
        "marketsync",
        version,
        manifest.iter().map(|p| url(p)).collect(),
      )
    }

    fn serve_assets(&self) {
      for path in ["/", "/offline.html", "/app.js"] {
        self
          .fetcher
          .respond(Method::Get, path, Response::new(200, format!("asset {}", path)));
      }
    }
  }

  #[tokio::test]
  async fn test_install_populates_precache() {
    let h = Harness::new();
    h.serve_assets();
    let c = h.controller("v1", &["/", "/offline.html"]);

    let report = c.install().await.unwrap();
    assert_eq!(report.assets, 2);
    assert_eq!(h.versions.state("v1").unwrap(), Some(VersionState::Installed));

    let entry = h
      .cache
      .get(
        &Namespace::precache("marketsync", "v1"),
        &Request::get(url("/offline.html")).fingerprint(),
      )
      .unwrap()
      .unwrap();
    assert_eq!(entry.response.body_text(), "asset /offline.html");
  }

  #[tokio::test]
  async fn test_install_is_all_or_nothing() {
    let h = Harness::new();
    h.serve_assets();
    h.controller("v1", &["/"]).install().await.unwrap();
    h.controller("v1", &["/"]).activate().await.unwrap();

    let err = h
      .controller("v2", &["/", "/missing.css"])
      .install()
      .await
      .unwrap_err();

    assert!(matches!(
      err,
      EngineError::InstallationIncomplete { ref path, .. } if path == "/missing.css"
    ));
    assert!(!h
      .cache
      .list_namespaces()
      .unwrap()
      .contains("marketsync-precache-v2"));
    assert_eq!(h.versions.state("v2").unwrap(), None);
    assert_eq!(h.versions.state("v1").unwrap(), Some(VersionState::Active));
  }

  #[tokio::test]
  async fn test_failed_reinstall_keeps_active_precache() {
    let h = Harness::new();
    h.serve_assets();
    let v1 = h.controller("v1", &["/", "/offline.html"]);
    v1.install().await.unwrap();
    v1.activate().await.unwrap();

    h.fetcher.fail(Method::Get, "/offline.html");
    let err = v1.install().await.unwrap_err();
    assert!(matches!(err, EngineError::InstallationIncomplete { .. }));

    assert!(h
      .cache
      .list_namespaces()
      .unwrap()
      .contains("marketsync-precache-v1"));
    assert_eq!(h.versions.state("v1").unwrap(), Some(VersionState::Active));
    let entry = h
      .cache
      .get(
        &Namespace::precache("marketsync", "v1"),
        &Request::get(url("/offline.html")).fingerprint(),
      )
      .unwrap();
    assert!(entry.is_some());
  }

  #[tokio::test]
  async fn test_reinstall_of_active_version_stays_active() {
    let h = Harness::new();
    h.serve_assets();
    h.controller("v1", &["/", "/app.js"]).install().await.unwrap();
    h.controller("v1", &["/", "/app.js"]).activate().await.unwrap();

    let report = h.controller("v1", &["/"]).install().await.unwrap();

    assert_eq!(report.superseded, None);
    assert_eq!(h.versions.active_version().unwrap().as_deref(), Some("v1"));
    // The manifest is the whole precache: dropped assets go away.
    let dropped = h
      .cache
      .get(
        &Namespace::precache("marketsync", "v1"),
        &Request::get(url("/app.js")).fingerprint(),
      )
      .unwrap();
    assert!(dropped.is_none());
  }

  #[tokio::test]
  async fn test_install_rejects_error_status() {
    let h = Harness::new();
    h.fetcher
      .respond(Method::Get, "/", Response::new(500, "oops"));
    let err = h.controller("v1", &["/"]).install().await.unwrap_err();
    assert!(matches!(err, EngineError::InstallationIncomplete { .. }));
  }

  #[tokio::test]
  async fn test_new_install_supersedes_without_evicting() {
    let h = Harness::new();
    h.serve_assets();
    h.controller("v1", &["/"]).install().await.unwrap();
    h.controller("v1", &["/"]).activate().await.unwrap();

    let report = h.controller("v2", &["/app.js"]).install().await.unwrap();

    assert_eq!(report.superseded.as_deref(), Some("v1"));
    assert_eq!(h.versions.state("v1").unwrap(), Some(VersionState::Superseded));
    assert!(h
      .cache
      .list_namespaces()
      .unwrap()
      .contains("marketsync-precache-v1"));
  }

  #[tokio::test]
  async fn test_activation_evicts_old_versions_and_claims() {
    let h = Harness::new();
    h.serve_assets();
    h.controller("v1", &["/"]).install().await.unwrap();
    h.controller("v1", &["/"]).activate().await.unwrap();
    h.cache
      .open(&Namespace::runtime("marketsync", "v1"))
      .unwrap();
    h.cache.open(&Namespace::from("someone-else")).unwrap();

    let v2 = h.controller("v2", &["/app.js"]);
    v2.install().await.unwrap();
    let report = v2.activate().await.unwrap();

    let names = h.cache.list_namespaces().unwrap();
    assert!(!names.iter().any(|n| n.ends_with("-v1")));
    assert!(names.contains("marketsync-precache-v2"));
    assert!(names.contains("marketsync-runtime-v2"));
    assert!(names.contains("someone-else"));
    assert_eq!(report.evicted.len(), 2);
    assert_eq!(h.versions.active_version().unwrap().as_deref(), Some("v2"));
    assert_eq!(h.versions.versions().unwrap().len(), 1);
    assert_eq!(*h.clients.claims.lock().unwrap(), 2);
  }

  #[tokio::test]
  async fn test_activation_requires_install() {
    let h = Harness::new();
    let err = h.controller("v3", &[]).activate().await.unwrap_err();
    assert!(matches!(err, EngineError::NotInstalled(v) if v == "v3"));
  }
}
