//! Static route classification.

use std::collections::BTreeSet;
use url::Url;

use super::plan::{Fallback, Plan, Step};
use crate::http::Request;

/// How an intercepted request is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Non-safe method: straight to the network. On failure only `queueable`
  /// mutations reach the outbox, since replay delivers every record to the
  /// single bets endpoint. The rest are answered `"queued": false`.
  Mutation { queueable: bool },
  /// Foreign origin or scheme: network only, nothing cached
  Bypass,
  /// API reads
  NetworkFirst,
  /// Static assets
  CacheFirst,
  /// Page navigations
  NetworkFirstOffline,
  StaleWhileRevalidate,
}

impl Route {
  pub fn plan(self) -> Plan {
    match self {
      Route::Mutation { queueable } => Plan {
        steps: &[Step::Network],
        fallback: if queueable {
          Fallback::Enqueue
        } else {
          Fallback::NotQueued
        },
        store: false,
        revalidate: false,
      },
      Route::Bypass => Plan {
        steps: &[Step::Network],
        fallback: Fallback::Propagate,
        store: false,
        revalidate: false,
      },
      Route::NetworkFirst => Plan {
        steps: &[Step::Network, Step::Cache],
        fallback: Fallback::ServiceUnavailableJson,
        store: true,
        revalidate: false,
      },
      Route::CacheFirst => Plan {
        steps: &[Step::Cache, Step::Network],
        fallback: Fallback::ServiceUnavailable,
        store: true,
        revalidate: false,
      },
      Route::NetworkFirstOffline => Plan {
        steps: &[Step::Network, Step::Cache],
        fallback: Fallback::OfflineDocument,
        store: true,
        revalidate: false,
      },
      Route::StaleWhileRevalidate => Plan {
        steps: &[Step::Cache, Step::Network],
        fallback: Fallback::Propagate,
        store: true,
        revalidate: true,
      },
    }
  }
}

/// Classification inputs. First matching rule wins:
///
/// 1. non-safe method
/// 2. cross-origin or non-http(s) scheme
/// 3. path under an API prefix
/// 4. static asset extension
/// 5. `Accept: text/html`
/// 6. everything else
#[derive(Debug, Clone)]
pub struct RouteTable {
  pub origin: Url,
  pub api_prefixes: Vec<String>,
  /// Lowercase, without the dot
  pub static_extensions: BTreeSet<String>,
  /// Mutation paths eligible for the outbox
  pub queueable_paths: Vec<String>,
}

impl RouteTable {
  pub fn classify(&self, request: &Request) -> Route {
    let url = &request.url;

    if !request.method.is_safe() {
      let queueable = self.is_same_origin(url)
        && self
          .queueable_paths
          .iter()
          .any(|p| url.path().trim_end_matches('/') == p.trim_end_matches('/'));
      return Route::Mutation { queueable };
    }

    if !matches!(url.scheme(), "http" | "https") || !self.is_same_origin(url) {
      return Route::Bypass;
    }

    let path = url.path();
    if self.api_prefixes.iter().any(|p| path.starts_with(p.as_str())) {
      return Route::NetworkFirst;
    }

    if self.is_static_asset(path) {
      return Route::CacheFirst;
    }

    if request
      .header("accept")
      .is_some_and(|accept| accept.contains("text/html"))
    {
      return Route::NetworkFirstOffline;
    }

    Route::StaleWhileRevalidate
  }

  fn is_same_origin(&self, url: &Url) -> bool {
    url.origin() == self.origin.origin()
  }

  fn is_static_asset(&self, path: &str) -> bool {
    let file = path.rsplit('/').next().unwrap_or_default();
    match file.rsplit_once('.') {
      Some((stem, ext)) if !stem.is_empty() => {
        self.static_extensions.contains(&ext.to_ascii_lowercase())
      }
      _ => false,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::Config;
  use crate::http::Method;
  use crate::test_support::{url, ORIGIN};

  fn table() -> RouteTable {
    Config::with_origin(Url::parse(ORIGIN).unwrap()).route_table()
  }

  fn get(path: &str) -> Request {
    Request::get(url(path))
  }

  #[test]
  fn test_mutation_wins_over_everything() {
    let t = table();
    let post = Request::new(Method::Post, url("/api/bets"));
    assert_eq!(t.classify(&post), Route::Mutation { queueable: true });

    let other = Request::new(Method::Delete, url("/api/markets/3"));
    assert_eq!(t.classify(&other), Route::Mutation { queueable: false });

    let foreign = Request::new(Method::Post, Url::parse("https://other.example/api/bets").unwrap());
    assert_eq!(t.classify(&foreign), Route::Mutation { queueable: false });
  }

  #[test]
  fn test_cross_origin_and_scheme_bypass() {
    let t = table();
    assert_eq!(
      t.classify(&Request::get(Url::parse("https://cdn.example/app.js").unwrap())),
      Route::Bypass
    );
    assert_eq!(
      t.classify(&Request::get(Url::parse("chrome-extension://abc/app.js").unwrap())),
      Route::Bypass
    );
  }

  #[test]
  fn test_api_before_static_extension() {
    let t = table();
    assert_eq!(t.classify(&get("/api/markets")), Route::NetworkFirst);
    assert_eq!(t.classify(&get("/api/export.json.js")), Route::NetworkFirst);
  }

  #[test]
  fn test_static_assets_are_cache_first() {
    let t = table();
    assert_eq!(t.classify(&get("/static/app.js")), Route::CacheFirst);
    assert_eq!(t.classify(&get("/fonts/Inter.WOFF2")), Route::CacheFirst);
    assert_eq!(t.classify(&get("/logo.png?v=3")), Route::CacheFirst);
    assert_eq!(t.classify(&get("/.js")), Route::StaleWhileRevalidate);
  }

  #[test]
  fn test_documents_and_rest() {
    let t = table();
    let page = get("/markets/42").with_header("Accept", "text/html,application/xhtml+xml");
    assert_eq!(t.classify(&page), Route::NetworkFirstOffline);
    assert_eq!(t.classify(&get("/manifest.json")), Route::StaleWhileRevalidate);
  }

  #[test]
  fn test_plans_are_ordered_as_declared() {
    assert_eq!(Route::CacheFirst.plan().steps, &[Step::Cache, Step::Network]);
    assert_eq!(Route::NetworkFirst.plan().steps, &[Step::Network, Step::Cache]);
    assert_eq!(
      Route::NetworkFirstOffline.plan().fallback,
      Fallback::OfflineDocument
    );
    assert!(Route::StaleWhileRevalidate.plan().revalidate);
    assert!(!Route::Bypass.plan().store);
  }
}
