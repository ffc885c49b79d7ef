//! Durable operation queue (outbox) for mutations issued while offline.

pub mod replay;
mod storage;

pub use replay::ReplayReport;
pub use storage::{OperationQueue, PendingOperation, SqliteQueue};
