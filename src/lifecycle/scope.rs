//! Which version's namespaces answer requests right now.

use std::sync::Arc;
use tracing::warn;

use super::registry::VersionStore;
use crate::cache::Namespace;

/// Namespaces of the version currently serving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServingNamespaces {
  pub version: String,
  pub runtime: Namespace,
  pub precache: Namespace,
}

/// Resolves the serving version from the durable registry on every call.
///
/// A configured version that has not been activated yet never serves while an
/// older version is active or superseded. With nothing recorded, or with the
/// registry unreadable, the configured version is used.
#[derive(Clone)]
pub struct ServingScope {
  versions: Arc<dyn VersionStore>,
  prefix: String,
  configured: String,
}

impl ServingScope {
  pub fn new(
    versions: Arc<dyn VersionStore>,
    prefix: impl Into<String>,
    configured: impl Into<String>,
  ) -> Self {
    Self {
      versions,
      prefix: prefix.into(),
      configured: configured.into(),
    }
  }

  pub fn resolve(&self) -> ServingNamespaces {
    let version = match self.versions.serving_version() {
      Ok(Some(version)) => version,
      Ok(None) => self.configured.clone(),
      Err(e) => {
        warn!(error = %e, version = %self.configured, "version registry unreadable, using configured version");
        self.configured.clone()
      }
    };

    ServingNamespaces {
      runtime: Namespace::runtime(&self.prefix, &version),
      precache: Namespace::precache(&self.prefix, &version),
      version,
    }
  }
}
