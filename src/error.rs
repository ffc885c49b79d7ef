//! Error taxonomy for the engine.
//!
//! Cache misses are not errors. Store failures degrade to misses at the call
//! site, network failures are recovered by the policy engine where a strategy
//! allows it, and only the variants below ever reach a caller.

use thiserror::Error;

/// The fetch capability could not produce a response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
  #[error("network unavailable: {0}")]
  Unavailable(String),
}

/// A durable store operation failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
  /// Storage backend absent or broken (disabled cache, unreadable database).
  #[error("store unavailable: {0}")]
  Unavailable(String),

  /// The write would exceed the storage quota.
  #[error("quota exceeded: {0}")]
  QuotaExceeded(String),
}

/// Errors surfaced by [`crate::worker::Worker::dispatch`].
#[derive(Error, Debug)]
pub enum EngineError {
  #[error(transparent)]
  Network(#[from] NetworkError),

  #[error(transparent)]
  Store(#[from] StoreError),

  /// A precache manifest entry could not be fetched; the version was not installed.
  #[error("installation incomplete: {path}: {reason}")]
  InstallationIncomplete { path: String, reason: String },

  /// Activation requested for a version whose install never completed.
  #[error("version {0} is not installed")]
  NotInstalled(String),

  /// One queued operation could not be delivered.
  #[error("delivery of operation {id} failed: {reason}")]
  DeliveryFailed { id: i64, reason: String },

  #[error("invalid request: {0}")]
  InvalidRequest(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl From<rusqlite::Error> for StoreError {
  fn from(err: rusqlite::Error) -> Self {
    match err {
      rusqlite::Error::SqliteFailure(ref e, _) if e.code == rusqlite::ErrorCode::DiskFull => {
        StoreError::QuotaExceeded(err.to_string())
      }
      other => StoreError::Unavailable(other.to_string()),
    }
  }
}

impl From<serde_json::Error> for StoreError {
  fn from(err: serde_json::Error) -> Self {
    StoreError::Unavailable(format!("serialization failed: {}", err))
  }
}
