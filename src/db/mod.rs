pub mod schema;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::StoreError;

/// Shared SQLite connection backing the cache store, the operation queue and
/// the version registry.
///
/// Cloning is cheap; all clones talk to the same connection.
#[derive(Clone)]
pub struct Database {
  conn: Arc<Mutex<Connection>>,
}

impl Database {
  /// Open or create the database at `path`.
  pub fn open(path: &Path) -> Result<Self, StoreError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        StoreError::Unavailable(format!("Failed to create database directory: {}", e))
      })?;
    }

    let conn = Connection::open(path).map_err(|e| {
      StoreError::Unavailable(format!(
        "Failed to open database at {}: {}",
        path.display(),
        e
      ))
    })?;

    Self::from_connection(conn)
  }

  /// Private, process-local database. Used by tests.
  pub fn open_in_memory() -> Result<Self, StoreError> {
    Self::from_connection(Connection::open_in_memory()?)
  }

  fn from_connection(conn: Connection) -> Result<Self, StoreError> {
    let db = Self {
      conn: Arc::new(Mutex::new(conn)),
    };
    db.run_migrations()?;
    Ok(db)
  }

  fn run_migrations(&self) -> Result<(), StoreError> {
    self.with_conn(|conn| {
      conn
        .execute_batch(schema::SCHEMA)
        .map_err(|e| StoreError::Unavailable(format!("Failed to run migrations: {}", e)))
    })
  }

  /// Run `f` with exclusive access to the connection.
  pub fn with_conn<T>(
    &self,
    f: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
  ) -> Result<T, StoreError> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| StoreError::Unavailable(format!("Lock poisoned: {}", e)))?;
    f(&mut conn)
  }
}

/// Format timestamps the way they are stored.
pub(crate) fn format_timestamp(ts: chrono::DateTime<chrono::Utc>) -> String {
  ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// Parse a stored RFC 3339 timestamp.
pub(crate) fn parse_timestamp(s: &str) -> Result<chrono::DateTime<chrono::Utc>, StoreError> {
  chrono::DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&chrono::Utc))
    .map_err(|e| StoreError::Unavailable(format!("Failed to parse datetime '{}': {}", s, e)))
}
