//! Offline-resilient request cache and bet outbox.
//!
//! Every outbound request of the trading client passes through
//! [`policy::PolicyEngine`], which serves it from the durable cache, the
//! network, or a synthetic fallback. Bets submitted while offline land in the
//! [`queue`] and are replayed when connectivity returns. [`worker::Worker`]
//! ties everything to a single event dispatch.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod fetch;
pub mod http;
pub mod lifecycle;
pub mod notify;
pub mod policy;
pub mod queue;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use error::{EngineError, NetworkError, StoreError};
pub use worker::{Event, Outcome, Stores, Worker};
