//! Event dispatch.
//!
//! Every external trigger is one [`Event`] variant handled by
//! [`Worker::dispatch`]. A worker holds no protocol state of its own; it can be
//! rebuilt from configuration and the durable stores before every event.

use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheStore, SqliteStorage, UnavailableStorage};
use crate::config::Config;
use crate::db::Database;
use crate::error::EngineError;
use crate::fetch::Fetcher;
use crate::http::{Fingerprint, Method, Request};
use crate::lifecycle::{
  ActivationReport, InstallReport, LifecycleController, ServingScope, SqliteVersions,
  VersionStore,
};
use crate::notify::{self, ClickOutcome, Clients, Notifier, PushMessage};
use crate::policy::{PolicyEngine, Served};
use crate::queue::{replay, OperationQueue, ReplayReport, SqliteQueue};

/// External triggers the engine reacts to.
#[derive(Debug, Clone)]
pub enum Event {
  /// Populate the precache for the configured version
  Install,
  /// Evict other versions and take over clients
  Activate,
  /// Intercepted outbound request
  Fetch(Request),
  /// Connectivity restored
  Sync { tag: String },
  /// Push message with an opaque payload
  Push { data: Vec<u8> },
  /// User interacted with a notification
  NotificationClick { action: Option<String>, url: String },
  /// Periodic background tick
  PeriodicSync { tag: String },
}

/// Result of handling one event.
#[derive(Debug)]
pub enum Outcome {
  Installed {
    install: InstallReport,
    /// Present when the install activated immediately
    activation: Option<ActivationReport>,
  },
  Activated(ActivationReport),
  Served(Served),
  Replayed(ReplayReport),
  Refreshed { stored: bool },
  Notified { title: String },
  Clicked(ClickOutcome),
  /// Event tag not handled by this engine
  Ignored,
}

/// The durable stores a worker is built on.
#[derive(Clone)]
pub struct Stores {
  pub cache: Arc<dyn CacheStore>,
  pub queue: Arc<dyn OperationQueue>,
  pub versions: Arc<dyn VersionStore>,
}

impl Stores {
  pub fn sqlite(db: Database, max_entry_bytes: usize) -> Self {
    Self {
      cache: Arc::new(SqliteStorage::new(db.clone(), max_entry_bytes)),
      queue: Arc::new(SqliteQueue::new(db.clone())),
      versions: Arc::new(SqliteVersions::new(db)),
    }
  }

  pub fn unavailable(reason: &str) -> Self {
    let storage = Arc::new(UnavailableStorage::new(reason));
    Self {
      cache: storage.clone(),
      queue: storage.clone(),
      versions: storage,
    }
  }

  /// Open the stores described by `config`.
  ///
  /// Never fails: an unopenable database leaves every store unavailable, and
  /// a disabled cache leaves only the cache store unavailable. The engine
  /// keeps serving from the network either way.
  pub fn open(config: &Config) -> Self {
    let path = match config.database_path() {
      Ok(path) => path,
      Err(e) => {
        warn!(error = %e, "no database location, running without storage");
        return Self::unavailable("no database location");
      }
    };

    let db = match Database::open(&path) {
      Ok(db) => db,
      Err(e) => {
        warn!(path = %path.display(), error = %e, "database unavailable, running without storage");
        return Self::unavailable(&e.to_string());
      }
    };

    let mut stores = Self::sqlite(db, config.cache.max_entry_bytes);
    if !config.cache.enabled {
      debug!("response cache disabled by configuration");
      stores.cache = Arc::new(UnavailableStorage::new("cache disabled"));
    }
    stores
  }
}

pub struct Worker {
  config: Config,
  stores: Stores,
  fetcher: Arc<dyn Fetcher>,
  notifier: Arc<dyn Notifier>,
  clients: Arc<dyn Clients>,
  engine: PolicyEngine,
  lifecycle: LifecycleController,
  bets_endpoint: Url,
}

fn resolve(config: &Config, path: &str) -> Result<Url, EngineError> {
  config
    .resolve(path)
    .map_err(|e| EngineError::InvalidRequest(format!("bad path '{}': {}", path, e)))
}

impl Worker {
  pub fn new(
    config: Config,
    stores: Stores,
    fetcher: Arc<dyn Fetcher>,
    notifier: Arc<dyn Notifier>,
    clients: Arc<dyn Clients>,
  ) -> Result<Self, EngineError> {
    let manifest = config
      .precache
      .iter()
      .map(|p| resolve(&config, p))
      .collect::<Result<Vec<_>, _>>()?;
    let offline_page = resolve(&config, &config.routes.offline_page)?;
    let bets_endpoint = resolve(&config, &config.sync.bets_endpoint)?;

    let engine = PolicyEngine::new(
      config.route_table(),
      stores.cache.clone(),
      stores.queue.clone(),
      fetcher.clone(),
      ServingScope::new(
        stores.versions.clone(),
        config.cache.prefix.clone(),
        config.version.clone(),
      ),
      offline_page,
    );
    let lifecycle = LifecycleController::new(
      stores.cache.clone(),
      stores.versions.clone(),
      fetcher.clone(),
      clients.clone(),
      config.cache.prefix.clone(),
      config.version.clone(),
      manifest,
    );

    Ok(Self {
      config,
      stores,
      fetcher,
      notifier,
      clients,
      engine,
      lifecycle,
      bets_endpoint,
    })
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn stores(&self) -> &Stores {
    &self.stores
  }

  pub async fn dispatch(&self, event: Event) -> Result<Outcome, EngineError> {
    match event {
      Event::Install => {
        let install = self.lifecycle.install().await?;
        let activation = if self.config.lifecycle.skip_waiting {
          Some(self.lifecycle.activate().await?)
        } else {
          None
        };
        Ok(Outcome::Installed {
          install,
          activation,
        })
      }
      Event::Activate => Ok(Outcome::Activated(self.lifecycle.activate().await?)),
      Event::Fetch(request) => Ok(Outcome::Served(self.engine.handle(request).await?)),
      Event::Sync { tag } => {
        if tag != self.config.sync.bets_tag {
          debug!(%tag, "ignoring sync tag");
          return Ok(Outcome::Ignored);
        }
        let report = replay::run(
          self.stores.queue.as_ref(),
          self.fetcher.as_ref(),
          &self.bets_endpoint,
        )
        .await?;
        Ok(Outcome::Replayed(report))
      }
      Event::Push { data } => {
        let message = PushMessage::parse(&data);
        let (title, options) = message.into_notification(
          &self.config.app_name,
          &self.config.notifications.icon,
          &self.config.notifications.badge,
        );
        self.notifier.show(&title, &options).await;
        info!(%title, "notification shown");
        Ok(Outcome::Notified { title })
      }
      Event::NotificationClick { action, url } => {
        let target = resolve(&self.config, &url)?;
        let outcome = notify::route_click(self.clients.as_ref(), action.as_deref(), &target).await;
        Ok(Outcome::Clicked(outcome))
      }
      Event::PeriodicSync { tag } => {
        if tag != self.config.sync.markets_tag {
          debug!(%tag, "ignoring periodic sync tag");
          return Ok(Outcome::Ignored);
        }
        Ok(Outcome::Refreshed {
          stored: self.refresh_markets().await?,
        })
      }
    }
  }

  /// Best-effort refresh of the market listing. Failures are logged, never returned.
  async fn refresh_markets(&self) -> Result<bool, EngineError> {
    let source = resolve(&self.config, &self.config.sync.markets_url)?;
    let key = Fingerprint::new(
      Method::Get,
      &resolve(&self.config, &self.config.sync.markets_cache_key)?,
    );

    match self.fetcher.fetch(&Request::get(source)).await {
      Ok(response) if response.is_success() => {
        self.engine.store(&key, &response);
        debug!(%key, "market listing refreshed");
        Ok(true)
      }
      Ok(response) => {
        warn!(status = response.status, "market refresh rejected");
        Ok(false)
      }
      Err(e) => {
        warn!(error = %e, "market refresh failed");
        Ok(false)
      }
    }
  }
}
