//! Operation queue trait and SQLite implementation.

use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::cache::UnavailableStorage;
use crate::db::{format_timestamp, parse_timestamp, Database};
use crate::error::StoreError;

/// A mutation that has not been confirmed by the remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOperation {
  /// Assigned by the store, strictly increasing
  pub id: i64,
  /// Submission body, delivered as-is
  pub payload: Vec<u8>,
  pub created_at: DateTime<Utc>,
}

/// Durable, ordered outbox.
pub trait OperationQueue: Send + Sync {
  /// Persist `payload` and return its id once durable.
  fn enqueue(&self, payload: &[u8]) -> Result<i64, StoreError>;

  /// All pending operations, oldest first.
  fn list_all(&self) -> Result<Vec<PendingOperation>, StoreError>;

  /// Delete one operation. Removing an unknown id is not an error.
  fn remove(&self, id: i64) -> Result<(), StoreError>;

  fn len(&self) -> Result<usize, StoreError> {
    Ok(self.list_all()?.len())
  }
}

impl OperationQueue for UnavailableStorage {
  fn enqueue(&self, _payload: &[u8]) -> Result<i64, StoreError> {
    Err(self.error())
  }

  fn list_all(&self) -> Result<Vec<PendingOperation>, StoreError> {
    Err(self.error())
  }

  fn remove(&self, _id: i64) -> Result<(), StoreError> {
    Err(self.error())
  }
}

/// SQLite-backed queue. Ids come from `AUTOINCREMENT`, so they survive restarts
/// and are never handed out twice.
#[derive(Clone)]
pub struct SqliteQueue {
  db: Database,
}

impl SqliteQueue {
  pub fn new(db: Database) -> Self {
    Self { db }
  }
}

impl OperationQueue for SqliteQueue {
  fn enqueue(&self, payload: &[u8]) -> Result<i64, StoreError> {
    self.db.with_conn(|conn| {
      conn.execute(
        "INSERT INTO pending_operations (payload, created_at) VALUES (?, ?)",
        params![payload, format_timestamp(Utc::now())],
      )?;
      Ok(conn.last_insert_rowid())
    })
  }

  fn list_all(&self) -> Result<Vec<PendingOperation>, StoreError> {
    let rows: Vec<(i64, Vec<u8>, String)> = self.db.with_conn(|conn| {
      let mut stmt =
        conn.prepare("SELECT id, payload, created_at FROM pending_operations ORDER BY id")?;
      let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect::<Result<Vec<_>, _>>()?;
      Ok(rows)
    })?;

    rows
      .into_iter()
      .map(|(id, payload, created_at)| {
        Ok(PendingOperation {
          id,
          payload,
          created_at: parse_timestamp(&created_at)?,
        })
      })
      .collect()
  }

  fn remove(&self, id: i64) -> Result<(), StoreError> {
    self.db.with_conn(|conn| {
      conn.execute("DELETE FROM pending_operations WHERE id = ?", params![id])?;
      Ok(())
    })
  }

  fn len(&self) -> Result<usize, StoreError> {
    self.db.with_conn(|conn| {
      let count: i64 =
        conn.query_row("SELECT COUNT(*) FROM pending_operations", [], |row| row.get(0))?;
      Ok(count as usize)
    })
  }
}
