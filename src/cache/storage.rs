//! Cache storage trait and SQLite implementation.

use rusqlite::{params, OptionalExtension, Transaction};
use std::collections::BTreeSet;

use super::traits::{CacheEntry, Namespace};
use crate::db::{format_timestamp, parse_timestamp, Database};
use crate::error::StoreError;
use crate::http::{Fingerprint, Headers, Response};

/// Trait for cache storage backends.
///
/// Each call is independently atomic; nothing is ordered across keys and
/// concurrent writers to one key race with last-write-wins.
pub trait CacheStore: Send + Sync {
  /// Create the namespace if it does not exist.
  fn open(&self, namespace: &Namespace) -> Result<(), StoreError>;

  /// Look up an entry. Never touches the network.
  fn get(
    &self,
    namespace: &Namespace,
    fingerprint: &Fingerprint,
  ) -> Result<Option<CacheEntry>, StoreError>;

  /// Store an entry, replacing any previous one under the same fingerprint.
  /// Opens the namespace if needed.
  fn put(&self, namespace: &Namespace, entry: &CacheEntry) -> Result<(), StoreError>;

  /// Swap the whole contents of a namespace for `entries` in one step.
  /// On error the namespace is left exactly as it was.
  fn replace(&self, namespace: &Namespace, entries: &[CacheEntry]) -> Result<(), StoreError>;

  /// Remove a namespace and every entry in it. Returns whether it existed.
  fn delete(&self, namespace: &Namespace) -> Result<bool, StoreError>;

  fn list_namespaces(&self) -> Result<BTreeSet<String>, StoreError>;
}

/// Storage that is never available.
/// Stands in when caching is disabled or the database cannot be opened;
/// every read is a miss to the caller and every write is dropped.
pub struct UnavailableStorage {
  reason: String,
}

impl UnavailableStorage {
  pub fn new(reason: impl Into<String>) -> Self {
    Self {
      reason: reason.into(),
    }
  }

  pub(crate) fn error(&self) -> StoreError {
    StoreError::Unavailable(self.reason.clone())
  }
}

impl CacheStore for UnavailableStorage {
  fn open(&self, _namespace: &Namespace) -> Result<(), StoreError> {
    Err(self.error())
  }

  fn get(
    &self,
    _namespace: &Namespace,
    _fingerprint: &Fingerprint,
  ) -> Result<Option<CacheEntry>, StoreError> {
    Err(self.error())
  }

  fn put(&self, _namespace: &Namespace, _entry: &CacheEntry) -> Result<(), StoreError> {
    Err(self.error())
  }

  fn replace(&self, _namespace: &Namespace, _entries: &[CacheEntry]) -> Result<(), StoreError> {
    Err(self.error())
  }

  fn delete(&self, _namespace: &Namespace) -> Result<bool, StoreError> {
    Err(self.error())
  }

  fn list_namespaces(&self) -> Result<BTreeSet<String>, StoreError> {
    Err(self.error())
  }
}

/// SQLite-based cache storage implementation.
#[derive(Clone)]
pub struct SqliteStorage {
  db: Database,
  /// Largest body accepted by `put`
  max_entry_bytes: usize,
}

impl SqliteStorage {
  pub fn new(db: Database, max_entry_bytes: usize) -> Self {
    Self {
      db,
      max_entry_bytes,
    }
  }

  /// Enforce the size limit and serialize the headers column.
  fn row(&self, entry: &CacheEntry) -> Result<String, StoreError> {
    if entry.response.body.len() > self.max_entry_bytes {
      return Err(StoreError::QuotaExceeded(format!(
        "{} is {} bytes, limit is {}",
        entry.fingerprint,
        entry.response.body.len(),
        self.max_entry_bytes
      )));
    }
    Ok(serde_json::to_string(&entry.response.headers)?)
  }
}

fn insert_namespace(tx: &Transaction<'_>, namespace: &Namespace) -> rusqlite::Result<()> {
  tx.execute(
    "INSERT OR IGNORE INTO cache_namespaces (name) VALUES (?)",
    params![namespace.as_str()],
  )?;
  Ok(())
}

fn insert_entry(
  tx: &Transaction<'_>,
  namespace: &Namespace,
  entry: &CacheEntry,
  headers: &str,
) -> rusqlite::Result<()> {
  tx.execute(
    "INSERT OR REPLACE INTO cache_entries
       (namespace, key_hash, fingerprint, status, headers, body, cached_at)
     VALUES (?, ?, ?, ?, ?, ?, ?)",
    params![
      namespace.as_str(),
      entry.fingerprint.digest(),
      entry.fingerprint.as_str(),
      entry.response.status,
      headers,
      entry.response.body,
      format_timestamp(entry.cached_at),
    ],
  )?;
  Ok(())
}

impl CacheStore for SqliteStorage {
  fn open(&self, namespace: &Namespace) -> Result<(), StoreError> {
    self.db.with_conn(|conn| {
      conn.execute(
        "INSERT OR IGNORE INTO cache_namespaces (name) VALUES (?)",
        params![namespace.as_str()],
      )?;
      Ok(())
    })
  }

  fn get(
    &self,
    namespace: &Namespace,
    fingerprint: &Fingerprint,
  ) -> Result<Option<CacheEntry>, StoreError> {
    let row: Option<(u16, String, Vec<u8>, String)> = self.db.with_conn(|conn| {
      Ok(
        conn
          .query_row(
            "SELECT status, headers, body, cached_at FROM cache_entries
             WHERE namespace = ? AND key_hash = ?",
            params![namespace.as_str(), fingerprint.digest()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
          )
          .optional()?,
      )
    })?;

    match row {
      Some((status, headers, body, cached_at)) => {
        let headers: Headers = serde_json::from_str(&headers)?;
        Ok(Some(CacheEntry {
          fingerprint: fingerprint.clone(),
          response: Response {
            status,
            headers,
            body,
          },
          cached_at: parse_timestamp(&cached_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, namespace: &Namespace, entry: &CacheEntry) -> Result<(), StoreError> {
    let row = self.row(entry)?;
    self.db.with_conn(|conn| {
      let tx = conn.transaction()?;
      insert_namespace(&tx, namespace)?;
      insert_entry(&tx, namespace, entry, &row)?;
      tx.commit()?;
      Ok(())
    })
  }

  fn replace(&self, namespace: &Namespace, entries: &[CacheEntry]) -> Result<(), StoreError> {
    let rows = entries
      .iter()
      .map(|entry| self.row(entry))
      .collect::<Result<Vec<_>, _>>()?;

    self.db.with_conn(|conn| {
      let tx = conn.transaction()?;
      insert_namespace(&tx, namespace)?;
      tx.execute(
        "DELETE FROM cache_entries WHERE namespace = ?",
        params![namespace.as_str()],
      )?;
      for (entry, row) in entries.iter().zip(&rows) {
        insert_entry(&tx, namespace, entry, row)?;
      }
      tx.commit()?;
      Ok(())
    })
  }

  fn delete(&self, namespace: &Namespace) -> Result<bool, StoreError> {
    self.db.with_conn(|conn| {
      let tx = conn.transaction()?;
      tx.execute(
        "DELETE FROM cache_entries WHERE namespace = ?",
        params![namespace.as_str()],
      )?;
      let removed = tx.execute(
        "DELETE FROM cache_namespaces WHERE name = ?",
        params![namespace.as_str()],
      )?;
      tx.commit()?;
      Ok(removed > 0)
    })
  }

  fn list_namespaces(&self) -> Result<BTreeSet<String>, StoreError> {
    self.db.with_conn(|conn| {
      let mut stmt = conn.prepare("SELECT name FROM cache_namespaces")?;
      let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<BTreeSet<_>, _>>()?;
      Ok(names)
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::http::Method;
  use url::Url;

  fn storage() -> SqliteStorage {
    SqliteStorage::new(Database::open_in_memory().unwrap(), 1024)
  }

  fn entry(path: &str, body: &str) -> CacheEntry {
    let url = Url::parse("https://bets.example/").unwrap().join(path).unwrap();
    CacheEntry::capture(
      Fingerprint::new(Method::Get, &url),
      Response::new(200, body).with_header("content-type", "text/plain"),
    )
    .unwrap()
  }

  #[test]
  fn test_open_is_idempotent_and_listed() {
    let store = storage();
    let ns = Namespace::runtime("marketsync", "v1");
    store.open(&ns).unwrap();
    store.open(&ns).unwrap();
    let names = store.list_namespaces().unwrap();
    assert_eq!(names.len(), 1);
    assert!(names.contains("marketsync-runtime-v1"));
  }

  #[test]
  fn test_put_then_get() {
    let store = storage();
    let ns = Namespace::runtime("marketsync", "v1");
    let e = entry("/static/app.js", "console.log(1)");
    store.put(&ns, &e).unwrap();

    let found = store.get(&ns, &e.fingerprint).unwrap().unwrap();
    assert_eq!(found.response, e.response);
    assert_eq!(found.cached_at.timestamp_micros(), e.cached_at.timestamp_micros());
    assert!(store.list_namespaces().unwrap().contains(ns.as_str()));
  }

  #[test]
  fn test_put_overwrites_wholesale() {
    let store = storage();
    let ns = Namespace::runtime("marketsync", "v1");
    store.put(&ns, &entry("/api/markets", "old")).unwrap();
    let newer = entry("/api/markets", "new");
    store.put(&ns, &newer).unwrap();

    let found = store.get(&ns, &newer.fingerprint).unwrap().unwrap();
    assert_eq!(found.response.body_text(), "new");
  }

  #[test]
  fn test_namespaces_are_isolated() {
    let store = storage();
    let e = entry("/index.html", "<html>");
    store.put(&Namespace::precache("marketsync", "v1"), &e).unwrap();
    assert!(store
      .get(&Namespace::runtime("marketsync", "v1"), &e.fingerprint)
      .unwrap()
      .is_none());
  }

  #[test]
  fn test_delete_removes_entries() {
    let store = storage();
    let ns = Namespace::runtime("marketsync", "v1");
    let e = entry("/a.css", "body{}");
    store.put(&ns, &e).unwrap();

    assert!(store.delete(&ns).unwrap());
    assert!(!store.delete(&ns).unwrap());
    assert!(store.get(&ns, &e.fingerprint).unwrap().is_none());
    assert!(store.list_namespaces().unwrap().is_empty());
  }

  #[test]
  fn test_oversized_body_is_quota_exceeded() {
    let store = storage();
    let big = entry("/big.png", &"x".repeat(2048));
    let err = store
      .put(&Namespace::runtime("marketsync", "v1"), &big)
      .unwrap_err();
    assert!(matches!(err, StoreError::QuotaExceeded(_)));
  }

  #[test]
  fn test_replace_swaps_contents_or_changes_nothing() {
    let store = storage();
    let ns = Namespace::precache("marketsync", "v1");
    let old = entry("/old.js", "old");
    store.put(&ns, &old).unwrap();

    let fresh = entry("/new.js", "new");
    let err = store
      .replace(&ns, &[fresh.clone(), entry("/big.png", &"x".repeat(2048))])
      .unwrap_err();
    assert!(matches!(err, StoreError::QuotaExceeded(_)));
    assert!(store.get(&ns, &old.fingerprint).unwrap().is_some());
    assert!(store.get(&ns, &fresh.fingerprint).unwrap().is_none());

    store.replace(&ns, &[fresh.clone()]).unwrap();
    assert!(store.get(&ns, &old.fingerprint).unwrap().is_none());
    assert_eq!(
      store.get(&ns, &fresh.fingerprint).unwrap().unwrap().response.body_text(),
      "new"
    );
  }

  #[test]
  fn test_unavailable_storage_fails_everything() {
    let store = UnavailableStorage::new("disabled");
    let ns = Namespace::runtime("marketsync", "v1");
    assert!(matches!(store.open(&ns), Err(StoreError::Unavailable(_))));
    assert!(store.list_namespaces().is_err());
  }
}
