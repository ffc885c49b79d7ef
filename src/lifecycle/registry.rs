//! Durable record of each version's lifecycle state.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use std::fmt;
use std::str::FromStr;

use crate::cache::UnavailableStorage;
use crate::db::{format_timestamp, Database};
use crate::error::StoreError;

/// Lifecycle state of one deployed version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionState {
  /// Precache population in progress
  Installing,
  /// Precache complete, waiting for activation
  Installed,
  /// Serving requests
  Active,
  /// A newer version finished installing; evicted on its activation
  Superseded,
}

impl VersionState {
  pub fn as_str(self) -> &'static str {
    match self {
      VersionState::Installing => "installing",
      VersionState::Installed => "installed",
      VersionState::Active => "active",
      VersionState::Superseded => "superseded",
    }
  }
}

impl fmt::Display for VersionState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for VersionState {
  type Err = StoreError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "installing" => Ok(VersionState::Installing),
      "installed" => Ok(VersionState::Installed),
      "active" => Ok(VersionState::Active),
      "superseded" => Ok(VersionState::Superseded),
      other => Err(StoreError::Unavailable(format!(
        "unknown version state '{}'",
        other
      ))),
    }
  }
}

/// Storage for version lifecycle states.
pub trait VersionStore: Send + Sync {
  fn state(&self, version: &str) -> Result<Option<VersionState>, StoreError>;

  fn set_state(&self, version: &str, state: VersionState) -> Result<(), StoreError>;

  /// Every known version with its state.
  fn versions(&self) -> Result<Vec<(String, VersionState)>, StoreError>;

  /// Drop the record of a version. Unknown versions are ignored.
  fn forget(&self, version: &str) -> Result<(), StoreError>;

  fn active_version(&self) -> Result<Option<String>, StoreError> {
    Ok(
      self
        .versions()?
        .into_iter()
        .find(|(_, state)| *state == VersionState::Active)
        .map(|(version, _)| version),
    )
  }

  /// Version whose namespaces answer requests: the active one, or the
  /// superseded one while its successor waits for activation.
  fn serving_version(&self) -> Result<Option<String>, StoreError> {
    let versions = self.versions()?;
    let find = |wanted: VersionState| {
      versions
        .iter()
        .find(|(_, state)| *state == wanted)
        .map(|(version, _)| version.clone())
    };
    Ok(find(VersionState::Active).or_else(|| find(VersionState::Superseded)))
  }
}

impl VersionStore for UnavailableStorage {
  fn state(&self, _version: &str) -> Result<Option<VersionState>, StoreError> {
    Err(self.error())
  }

  fn set_state(&self, _version: &str, _state: VersionState) -> Result<(), StoreError> {
    Err(self.error())
  }

  fn versions(&self) -> Result<Vec<(String, VersionState)>, StoreError> {
    Err(self.error())
  }

  fn forget(&self, _version: &str) -> Result<(), StoreError> {
    Err(self.error())
  }
}

#[derive(Clone)]
pub struct SqliteVersions {
  db: Database,
}

impl SqliteVersions {
  pub fn new(db: Database) -> Self {
    Self { db }
  }
}

impl VersionStore for SqliteVersions {
  fn state(&self, version: &str) -> Result<Option<VersionState>, StoreError> {
    let state: Option<String> = self.db.with_conn(|conn| {
      Ok(
        conn
          .query_row(
            "SELECT state FROM versions WHERE version = ?",
            params![version],
            |row| row.get(0),
          )
          .optional()?,
      )
    })?;
    state.map(|s| s.parse::<VersionState>()).transpose()
  }

  fn set_state(&self, version: &str, state: VersionState) -> Result<(), StoreError> {
    self.db.with_conn(|conn| {
      conn.execute(
        "INSERT OR REPLACE INTO versions (version, state, updated_at) VALUES (?, ?, ?)",
        params![version, state.as_str(), format_timestamp(Utc::now())],
      )?;
      Ok(())
    })
  }

  fn versions(&self) -> Result<Vec<(String, VersionState)>, StoreError> {
    let rows: Vec<(String, String)> = self.db.with_conn(|conn| {
      let mut stmt = conn.prepare("SELECT version, state FROM versions ORDER BY version")?;
      let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
      Ok(rows)
    })?;

    rows
      .into_iter()
      .map(|(version, state)| Ok((version, state.parse::<VersionState>()?)))
      .collect()
  }

  fn forget(&self, version: &str) -> Result<(), StoreError> {
    self.db.with_conn(|conn| {
      conn.execute("DELETE FROM versions WHERE version = ?", params![version])?;
      Ok(())
    })
  }
}
