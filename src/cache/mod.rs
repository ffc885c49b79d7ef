//! Durable cache store.
//!
//! Namespaced key-value storage of response snapshots:
//! - one `precache` namespace per deployed version, written once at install
//! - one `runtime` namespace per version, filled by live traffic
//! - stale namespaces are only removed by version activation

mod storage;
mod traits;

pub use storage::{CacheStore, SqliteStorage, UnavailableStorage};
pub use traits::{CacheEntry, Namespace, NamespaceKind};
