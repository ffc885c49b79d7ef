//! Executes a route's plan against the cache store, the network and the outbox.

use serde_json::json;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use super::plan::{Fallback, Step};
use super::route::{Route, RouteTable};
use crate::cache::{CacheEntry, CacheStore, Namespace};
use crate::error::{EngineError, NetworkError};
use crate::fetch::Fetcher;
use crate::http::{Fingerprint, Method, Request, Response};
use crate::lifecycle::{ServingNamespaces, ServingScope};
use crate::queue::OperationQueue;

const OFFLINE_HTML: &str = "<!doctype html><html><head><meta charset=\"utf-8\">\
<title>Offline</title></head><body><h1>You are offline</h1>\
<p>Check your connection and try again.</p></body></html>";

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedFrom {
  /// Fresh from the network
  Network,
  /// Cache hit without asking the network first
  Cache,
  /// Cached data used because the network failed
  Offline,
  /// Engine-generated fallback
  Synthetic,
  /// Mutation persisted in the outbox
  Queued,
}

/// A response handed back to the intercepted caller.
#[derive(Debug)]
pub struct Served {
  pub response: Response,
  pub source: ServedFrom,
  /// Background refresh started by a stale-while-revalidate hit
  pub revalidation: Option<JoinHandle<()>>,
}

impl Served {
  fn new(response: Response, source: ServedFrom) -> Self {
    Self {
      response,
      source,
      revalidation: None,
    }
  }
}

/// Stateless coordinator over the injected stores and fetcher.
#[derive(Clone)]
pub struct PolicyEngine {
  routes: RouteTable,
  cache: Arc<dyn CacheStore>,
  queue: Arc<dyn OperationQueue>,
  fetcher: Arc<dyn Fetcher>,
  scope: ServingScope,
  offline_page: Url,
}

impl PolicyEngine {
  pub fn new(
    routes: RouteTable,
    cache: Arc<dyn CacheStore>,
    queue: Arc<dyn OperationQueue>,
    fetcher: Arc<dyn Fetcher>,
    scope: ServingScope,
    offline_page: Url,
  ) -> Self {
    Self {
      routes,
      cache,
      queue,
      fetcher,
      scope,
      offline_page,
    }
  }

  /// Serve one intercepted request.
  ///
  /// Cache-first and network-first routes always produce a response. Bypassed
  /// requests, and stale-while-revalidate requests with nothing cached, return
  /// the network error instead.
  pub async fn handle(&self, request: Request) -> Result<Served, EngineError> {
    let route = self.routes.classify(&request);
    let plan = route.plan();
    let fingerprint = request.fingerprint();
    let serving = self.scope.resolve();
    debug!(?route, %fingerprint, version = %serving.version, "routing request");

    let mut network_error: Option<NetworkError> = None;

    for step in plan.steps {
      match step {
        Step::Cache => {
          if let Some(entry) = self.lookup(&serving, &fingerprint) {
            let source = if network_error.is_some() {
              ServedFrom::Offline
            } else {
              ServedFrom::Cache
            };
            let mut served = Served::new(entry.response, source);
            if plan.revalidate {
              served.revalidation =
                Some(self.spawn_revalidation(serving.runtime.clone(), request.clone()));
            }
            return Ok(served);
          }
        }
        Step::Network => match self.fetcher.fetch(&request).await {
          Ok(response) => {
            if plan.store {
              write_back(self.cache.as_ref(), &serving.runtime, &fingerprint, &response);
            }
            return Ok(Served::new(response, ServedFrom::Network));
          }
          Err(e) => {
            debug!(%fingerprint, error = %e, "network attempt failed");
            network_error = Some(e);
          }
        },
      }
    }

    let network_error = network_error
      .unwrap_or_else(|| NetworkError::Unavailable("no network attempt was made".to_string()));

    match plan.fallback {
      Fallback::ServiceUnavailable => Ok(Served::new(
        Response::text(503, "Service Unavailable"),
        ServedFrom::Synthetic,
      )),
      Fallback::ServiceUnavailableJson => Ok(Served::new(
        offline_json(&network_error),
        ServedFrom::Synthetic,
      )),
      Fallback::NotQueued => Ok(Served::new(
        not_queued_json(&network_error),
        ServedFrom::Synthetic,
      )),
      Fallback::OfflineDocument => Ok(self.offline_document(&serving)),
      Fallback::Enqueue => Ok(self.enqueue(&request, &network_error)),
      Fallback::Propagate => Err(network_error.into()),
    }
  }

  /// Route chosen for `request`.
  pub fn classify(&self, request: &Request) -> Route {
    self.routes.classify(request)
  }

  /// Runtime entry, then precache entry. Store failures count as a miss.
  fn lookup(&self, serving: &ServingNamespaces, fingerprint: &Fingerprint) -> Option<CacheEntry> {
    [&serving.runtime, &serving.precache]
      .into_iter()
      .find_map(|ns| match self.cache.get(ns, fingerprint) {
        Ok(entry) => entry,
        Err(e) => {
          warn!(namespace = %ns, %fingerprint, error = %e, "cache read failed, treating as miss");
          None
        }
      })
  }

  /// Write a successful response to the serving runtime namespace under `fingerprint`.
  pub(crate) fn store(&self, fingerprint: &Fingerprint, response: &Response) {
    let serving = self.scope.resolve();
    write_back(self.cache.as_ref(), &serving.runtime, fingerprint, response);
  }

  fn spawn_revalidation(&self, runtime: Namespace, request: Request) -> JoinHandle<()> {
    let cache = Arc::clone(&self.cache);
    let fetcher = Arc::clone(&self.fetcher);

    tokio::spawn(async move {
      let fingerprint = request.fingerprint();
      match fetcher.fetch(&request).await {
        Ok(response) => write_back(cache.as_ref(), &runtime, &fingerprint, &response),
        Err(e) => debug!(%fingerprint, error = %e, "revalidation failed, keeping cached entry"),
      }
    })
  }

  fn offline_document(&self, serving: &ServingNamespaces) -> Served {
    let fingerprint = Fingerprint::new(Method::Get, &self.offline_page);
    match self.lookup(serving, &fingerprint) {
      Some(entry) => Served::new(entry.response, ServedFrom::Offline),
      None => Served::new(Response::html(503, OFFLINE_HTML), ServedFrom::Synthetic),
    }
  }

  fn enqueue(&self, request: &Request, cause: &NetworkError) -> Served {
    let payload = request.body.as_deref().unwrap_or_default();
    match self.queue.enqueue(payload) {
      Ok(id) => {
        debug!(id, url = %request.url, "mutation queued for replay");
        Served::new(
          Response::json(
            202,
            &json!({
              "queued": true,
              "id": id,
              "message": "You are offline. The request will be sent when the connection is restored.",
            }),
          ),
          ServedFrom::Queued,
        )
      }
      Err(e) => {
        warn!(url = %request.url, error = %e, "mutation could not be queued");
        Served::new(not_queued_json(cause), ServedFrom::Synthetic)
      }
    }
  }
}

fn write_back(
  cache: &dyn CacheStore,
  namespace: &Namespace,
  fingerprint: &Fingerprint,
  response: &Response,
) {
  let Some(entry) = CacheEntry::capture(fingerprint.clone(), response.clone()) else {
    debug!(%fingerprint, status = response.status, "not caching unsuccessful response");
    return;
  };
  if let Err(e) = cache.put(namespace, &entry) {
    warn!(%namespace, %fingerprint, error = %e, "cache write failed");
  }
}

fn offline_json(cause: &NetworkError) -> Response {
  Response::json(
    503,
    &json!({
      "error": "offline",
      "message": format!("Network unavailable and no cached response: {}", cause),
    }),
  )
}

/// Offline answer for a mutation the outbox does not accept.
fn not_queued_json(cause: &NetworkError) -> Response {
  Response::json(
    503,
    &json!({
      "error": "offline",
      "queued": false,
      "message": format!(
        "Network unavailable and this request is not queued for replay, resend it when back online: {}",
        cause
      ),
    }),
  )
}
