//! Core types for the cache store.

use chrono::{DateTime, Utc};
use std::fmt;

use crate::http::{Fingerprint, Response};

/// Name of a cache partition.
///
/// The engine names its partitions `{prefix}-precache-{version}` and
/// `{prefix}-runtime-{version}`; any other name is foreign and left alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace(String);

/// The two kinds of partition the engine owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespaceKind {
  /// Install-time assets, written once per version
  Precache,
  /// Populated by live traffic
  Runtime,
}

impl NamespaceKind {
  fn label(self) -> &'static str {
    match self {
      NamespaceKind::Precache => "precache",
      NamespaceKind::Runtime => "runtime",
    }
  }
}

impl Namespace {
  pub fn new(prefix: &str, kind: NamespaceKind, version: &str) -> Self {
    Self(format!("{}-{}-{}", prefix, kind.label(), version))
  }

  pub fn precache(prefix: &str, version: &str) -> Self {
    Self::new(prefix, NamespaceKind::Precache, version)
  }

  pub fn runtime(prefix: &str, version: &str) -> Self {
    Self::new(prefix, NamespaceKind::Runtime, version)
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// Whether this partition was created by an engine using `prefix`.
  pub fn is_owned_by(&self, prefix: &str) -> bool {
    [NamespaceKind::Precache, NamespaceKind::Runtime]
      .iter()
      .any(|kind| self.0.starts_with(&format!("{}-{}-", prefix, kind.label())))
  }
}

impl From<String> for Namespace {
  fn from(name: String) -> Self {
    Self(name)
  }
}

impl From<&str> for Namespace {
  fn from(name: &str) -> Self {
    Self(name.to_string())
  }
}

impl fmt::Display for Namespace {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// A stored response snapshot.
///
/// Only successful responses can become entries; entries are replaced
/// wholesale, never patched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
  pub fingerprint: Fingerprint,
  pub response: Response,
  /// When the response was captured
  pub cached_at: DateTime<Utc>,
}

impl CacheEntry {
  /// Capture `response` now. Returns `None` for non-2xx responses.
  pub fn capture(fingerprint: Fingerprint, response: Response) -> Option<Self> {
    if !response.is_success() {
      return None;
    }
    Some(Self {
      fingerprint,
      response,
      cached_at: Utc::now(),
    })
  }
}
