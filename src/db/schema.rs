//! Schema for the durable stores. Applied on every open; every statement is idempotent.

pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- Cache partitions; a namespace exists even when it holds no entries
CREATE TABLE IF NOT EXISTS cache_namespaces (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Response snapshots keyed by fingerprint digest
CREATE TABLE IF NOT EXISTS cache_entries (
    namespace TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL,
    PRIMARY KEY (namespace, key_hash),
    FOREIGN KEY (namespace) REFERENCES cache_namespaces(name) ON DELETE CASCADE
);

-- Outbox of mutations awaiting delivery; AUTOINCREMENT keeps ids from being reused
CREATE TABLE IF NOT EXISTS pending_operations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    payload BLOB NOT NULL,
    created_at TEXT NOT NULL
);

-- Lifecycle state per deployed version
CREATE TABLE IF NOT EXISTS versions (
    version TEXT PRIMARY KEY,
    state TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;
