//! Version lifecycle: installing -> installed -> active -> superseded.
//!
//! The state of every version lives in the durable store, so a restarted
//! process knows which version is current without any in-memory state.

mod controller;
mod registry;
mod scope;

pub use controller::{ActivationReport, InstallReport, LifecycleController};
pub use registry::{SqliteVersions, VersionState, VersionStore};
pub use scope::{ServingNamespaces, ServingScope};
