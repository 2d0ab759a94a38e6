//! Versioned schema for the local database.
//!
//! Every step is additive: it creates missing tables and indexes and never
//! rewrites existing rows, so re-running a step is harmless.

use rusqlite::Connection;
use tracing::info;

use crate::error::{SyncError, SyncResult};

/// Schema version this build writes.
pub const SCHEMA_VERSION: u32 = 3;

/// Catalog and operation records.
const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS catalog (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT NOT NULL UNIQUE,
    data TEXT NOT NULL,
    stored_at TEXT NOT NULL,
    category TEXT GENERATED ALWAYS AS (json_extract(data, '$.category')) VIRTUAL
);

CREATE INDEX IF NOT EXISTS idx_catalog_category ON catalog(category);

CREATE TABLE IF NOT EXISTS records (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT NOT NULL UNIQUE,
    data TEXT NOT NULL,
    stored_at TEXT NOT NULL,
    status TEXT GENERATED ALWAYS AS (json_extract(data, '$.status')) VIRTUAL,
    tool_name TEXT GENERATED ALWAYS AS (json_extract(data, '$.tool_name')) VIRTUAL
);

CREATE INDEX IF NOT EXISTS idx_records_status ON records(status);
"#;

/// Offline operation queue.
const SCHEMA_V2: &str = r#"
CREATE TABLE IF NOT EXISTS queue (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT NOT NULL UNIQUE,
    data TEXT NOT NULL,
    stored_at TEXT NOT NULL,
    status TEXT GENERATED ALWAYS AS (json_extract(data, '$.status')) VIRTUAL,
    kind TEXT GENERATED ALWAYS AS (json_extract(data, '$.kind')) VIRTUAL
);

CREATE INDEX IF NOT EXISTS idx_queue_status ON queue(status);
CREATE INDEX IF NOT EXISTS idx_queue_kind ON queue(kind);
"#;

/// Generic cache, preferences, and the tool-name index on records.
const SCHEMA_V3: &str = r#"
CREATE TABLE IF NOT EXISTS cache (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT NOT NULL UNIQUE,
    data TEXT NOT NULL,
    stored_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS preferences (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT NOT NULL UNIQUE,
    data TEXT NOT NULL,
    stored_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_records_tool_name ON records(tool_name);
"#;

const MIGRATIONS: &[(u32, &str)] = &[(1, SCHEMA_V1), (2, SCHEMA_V2), (3, SCHEMA_V3)];

/// Read the version recorded in the database header.
pub fn current_version(conn: &Connection) -> rusqlite::Result<u32> {
  conn.pragma_query_value(None, "user_version", |row| row.get(0))
}

/// Bring the database up to [`SCHEMA_VERSION`]. Returns the version found
/// before migrating.
pub fn migrate(conn: &Connection) -> SyncResult<u32> {
  let found = current_version(conn)?;

  if found > SCHEMA_VERSION {
    return Err(SyncError::StorageUnavailable(format!(
      "database schema version {} is newer than supported version {}",
      found, SCHEMA_VERSION
    )));
  }

  for (version, sql) in MIGRATIONS {
    if *version <= found {
      continue;
    }
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(sql)?;
    tx.pragma_update(None, "user_version", version)?;
    tx.commit()?;
    info!(version, "applied schema migration");
  }

  Ok(found)
}
