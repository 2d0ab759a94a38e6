//! SQLite-backed store implementation.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::models::{CacheEntry, Preference};
use super::schema;
use super::traits::{BulkPutOutcome, CachedEntity, Collection, Entity, StoreStats};
use crate::error::{SyncError, SyncResult};

/// Handle to the local database.
///
/// One connection is shared by every clone; the mutex around it serializes
/// all reads and writes, so callers never need their own locking.
#[derive(Clone)]
pub struct Store {
  conn: Arc<Mutex<Connection>>,
}

impl Store {
  /// Open or create the store at the default location.
  pub fn open_default() -> SyncResult<Self> {
    Self::open(&Self::default_path()?)
  }

  /// Open or create the store at `path`, running any pending migrations.
  pub fn open(path: &Path) -> SyncResult<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        SyncError::StorageUnavailable(format!("failed to create store directory: {}", e))
      })?;
    }

    let conn = Connection::open(path).map_err(|e| {
      SyncError::StorageUnavailable(format!(
        "failed to open store at {}: {}",
        path.display(),
        e
      ))
    })?;
    conn
      .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
      .map_err(|e| SyncError::StorageUnavailable(format!("failed to enable WAL: {}", e)))?;

    Self::from_connection(conn)
  }

  /// Open a throwaway store that lives only as long as the handle.
  pub fn open_in_memory() -> SyncResult<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| SyncError::StorageUnavailable(e.to_string()))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> SyncResult<Self> {
    conn
      .busy_timeout(std::time::Duration::from_secs(5))
      .map_err(|e| SyncError::StorageUnavailable(e.to_string()))?;

    let found = schema::migrate(&conn).map_err(|e| match e {
      SyncError::StorageUnavailable(_) => e,
      other => SyncError::StorageUnavailable(format!("migration failed: {}", other)),
    })?;
    debug!(
      from = found,
      to = schema::SCHEMA_VERSION,
      "store opened"
    );

    Ok(Self {
      conn: Arc::new(Mutex::new(conn)),
    })
  }

  /// Get the default database path.
  pub fn default_path() -> SyncResult<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| {
        SyncError::StorageUnavailable("could not determine data directory".to_string())
      })?;

    Ok(data_dir.join("syncvault").join("store.db"))
  }

  fn lock(&self) -> SyncResult<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| SyncError::StorageUnavailable(format!("lock poisoned: {}", e)))
  }

  pub fn schema_version(&self) -> SyncResult<u32> {
    let conn = self.lock()?;
    Ok(schema::current_version(&conn)?)
  }

  /// Raw SQL, for tests that need to break the schema.
  #[cfg(test)]
  pub(crate) fn execute_batch(&self, sql: &str) -> SyncResult<()> {
    self.lock()?.execute_batch(sql)?;
    Ok(())
  }

  // ==========================================================================
  // Typed collection access
  // ==========================================================================

  pub fn get<T: Entity>(&self, key: &str) -> SyncResult<Option<T>> {
    Ok(self.get_cached::<T>(key)?.map(|cached| cached.entity))
  }

  /// Get an entity together with the time it was stored.
  pub fn get_cached<T: Entity>(&self, key: &str) -> SyncResult<Option<CachedEntity<T>>> {
    let conn = self.lock()?;
    let table = T::collection().name();

    let row: Option<(String, String)> = conn
      .query_row(
        &format!("SELECT data, stored_at FROM {} WHERE key = ?", table),
        params![key],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()?;

    match row {
      Some((data, stored_at)) => Ok(Some(CachedEntity {
        entity: serde_json::from_str(&data)?,
        stored_at: parse_timestamp(&stored_at),
      })),
      None => Ok(None),
    }
  }

  /// Insert or wholesale-replace an entity. Returns its key.
  pub fn put<T: Entity>(&self, entity: &T) -> SyncResult<String> {
    let conn = self.lock()?;
    let key = entity.key();
    let data = serde_json::to_string(entity)?;
    upsert(&conn, T::collection(), &key, &data)?;
    Ok(key)
  }

  /// Delete by key. Returns whether a row existed.
  pub fn delete(&self, collection: Collection, key: &str) -> SyncResult<bool> {
    let conn = self.lock()?;
    let n = conn.execute(
      &format!("DELETE FROM {} WHERE key = ?", collection.name()),
      params![key],
    )?;
    Ok(n > 0)
  }

  /// All entities of a collection in insertion order.
  pub fn get_all<T: Entity>(&self) -> SyncResult<Vec<T>> {
    let conn = self.lock()?;
    let sql = format!("SELECT data FROM {} ORDER BY seq", T::collection().name());
    query_entities(&conn, &sql, params![])
  }

  /// All entities whose secondary index `index` equals `value`, in insertion order.
  pub fn get_all_by_index<T: Entity>(&self, index: &str, value: &str) -> SyncResult<Vec<T>> {
    let collection = T::collection();
    if !collection.has_index(index) {
      return Err(SyncError::UnknownIndex {
        collection: collection.name().to_string(),
        index: index.to_string(),
      });
    }

    let conn = self.lock()?;
    // `index` was validated against the static index list above.
    let sql = format!(
      "SELECT data FROM {} WHERE {} = ? ORDER BY seq",
      collection.name(),
      index
    );
    query_entities(&conn, &sql, params![value])
  }

  /// Write a batch in one transaction. A row that fails is counted and
  /// skipped; rows already written are kept.
  pub fn bulk_put<T: Entity>(&self, entities: &[T]) -> SyncResult<BulkPutOutcome> {
    let mut conn = self.lock()?;
    let collection = T::collection();
    let tx = conn.transaction()?;
    let mut outcome = BulkPutOutcome::default();

    for entity in entities {
      let key = entity.key();
      let written = serde_json::to_string(entity)
        .map_err(SyncError::from)
        .and_then(|data| upsert(&tx, collection, &key, &data).map_err(SyncError::from));
      match written {
        Ok(()) => outcome.written += 1,
        Err(e) => {
          warn!(collection = %collection, key = %key, error = %e, "bulk put row failed");
          outcome.failed += 1;
        }
      }
    }

    tx.commit()?;
    Ok(outcome)
  }

  /// Replace the whole collection with `entities` atomically.
  pub fn replace_all<T: Entity>(&self, entities: &[T]) -> SyncResult<usize> {
    let mut conn = self.lock()?;
    let collection = T::collection();
    let tx = conn.transaction()?;

    tx.execute(&format!("DELETE FROM {}", collection.name()), [])?;
    for entity in entities {
      let data = serde_json::to_string(entity)?;
      upsert(&tx, collection, &entity.key(), &data)?;
    }

    tx.commit()?;
    Ok(entities.len())
  }

  pub fn count(&self, collection: Collection) -> SyncResult<usize> {
    let conn = self.lock()?;
    let n: i64 = conn.query_row(
      &format!("SELECT COUNT(*) FROM {}", collection.name()),
      [],
      |row| row.get(0),
    )?;
    Ok(n as usize)
  }

  /// Delete every row of a collection. Returns the number removed.
  pub fn clear(&self, collection: Collection) -> SyncResult<usize> {
    let conn = self.lock()?;
    Ok(conn.execute(&format!("DELETE FROM {}", collection.name()), [])?)
  }

  /// Keys in a collection starting with `prefix`.
  pub fn keys_with_prefix(&self, collection: Collection, prefix: &str) -> SyncResult<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare(&format!(
      "SELECT key FROM {} WHERE substr(key, 1, length(?1)) = ?1 ORDER BY seq",
      collection.name()
    ))?;
    let keys = stmt
      .query_map(params![prefix], |row| row.get(0))?
      .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(keys)
  }

  /// Most recent write time in a collection.
  pub fn last_stored_at(&self, collection: Collection) -> SyncResult<Option<DateTime<Utc>>> {
    let conn = self.lock()?;
    let latest: Option<String> = conn.query_row(
      &format!("SELECT MAX(stored_at) FROM {}", collection.name()),
      [],
      |row| row.get(0),
    )?;
    Ok(latest.as_deref().map(parse_timestamp))
  }

  pub fn stats(&self) -> SyncResult<StoreStats> {
    Ok(StoreStats {
      catalog: self.count(Collection::Catalog)?,
      records: self.count(Collection::Records)?,
      queue: self.count(Collection::Queue)?,
      cache: self.count(Collection::Cache)?,
      preferences: self.count(Collection::Preferences)?,
      schema_version: self.schema_version()?,
    })
  }

  // ==========================================================================
  // Generic cache
  // ==========================================================================

  /// Read a cache entry. An expired entry is purged and reported as absent.
  pub fn cache_get(&self, key: &str) -> SyncResult<Option<CacheEntry>> {
    match self.get::<CacheEntry>(key)? {
      Some(entry) if entry.is_expired() => {
        debug!(key, "purging expired cache entry");
        self.delete(Collection::Cache, key)?;
        Ok(None)
      }
      other => Ok(other),
    }
  }

  /// Read and decode a cached value.
  pub fn cache_get_value<T: DeserializeOwned>(&self, key: &str) -> SyncResult<Option<T>> {
    match self.cache_get(key)? {
      Some(entry) => Ok(Some(serde_json::from_value(entry.value)?)),
      None => Ok(None),
    }
  }

  /// Store a value under `key`, optionally expiring after `ttl`.
  pub fn cache_set<V: Serialize>(
    &self,
    key: &str,
    value: &V,
    ttl: Option<Duration>,
  ) -> SyncResult<CacheEntry> {
    let now = Utc::now();
    let entry = CacheEntry {
      key: key.to_string(),
      value: serde_json::to_value(value)?,
      created_at: now,
      expires_at: ttl.map(|ttl| now + ttl),
    };
    self.put(&entry)?;
    Ok(entry)
  }

  pub fn cache_delete(&self, key: &str) -> SyncResult<bool> {
    self.delete(Collection::Cache, key)
  }

  /// Purge every expired cache entry. Returns the number removed.
  pub fn cleanup_expired(&self) -> SyncResult<usize> {
    let now = Utc::now();
    let expired: Vec<String> = self
      .get_all::<CacheEntry>()?
      .into_iter()
      .filter(|entry| entry.is_expired_at(now))
      .map(|entry| entry.key)
      .collect();

    let mut removed = 0;
    for key in &expired {
      if self.delete(Collection::Cache, key)? {
        removed += 1;
      }
    }
    if removed > 0 {
      debug!(removed, "purged expired cache entries");
    }
    Ok(removed)
  }

  // ==========================================================================
  // Preferences
  // ==========================================================================

  pub fn get_preference<T: DeserializeOwned>(&self, key: &str) -> SyncResult<Option<T>> {
    match self.get::<Preference>(key)? {
      Some(pref) => Ok(Some(serde_json::from_value(pref.value)?)),
      None => Ok(None),
    }
  }

  pub fn set_preference<T: Serialize>(&self, key: &str, value: &T) -> SyncResult<()> {
    let pref = Preference {
      key: key.to_string(),
      value: serde_json::to_value(value)?,
      updated_at: Utc::now(),
    };
    self.put(&pref)?;
    Ok(())
  }

  pub fn delete_preference(&self, key: &str) -> SyncResult<bool> {
    self.delete(Collection::Preferences, key)
  }

  /// Raw preference values, for listing.
  pub fn preferences(&self) -> SyncResult<Vec<(String, Value)>> {
    Ok(
      self
        .get_all::<Preference>()?
        .into_iter()
        .map(|p| (p.key, p.value))
        .collect(),
    )
  }
}

fn upsert(conn: &Connection, collection: Collection, key: &str, data: &str) -> rusqlite::Result<()> {
  conn.execute(
    &format!(
      "INSERT INTO {} (key, data, stored_at) VALUES (?1, ?2, ?3)
       ON CONFLICT(key) DO UPDATE SET data = excluded.data, stored_at = excluded.stored_at",
      collection.name()
    ),
    params![key, data, now_timestamp()],
  )?;
  Ok(())
}

fn query_entities<T: Entity>(
  conn: &Connection,
  sql: &str,
  params: impl rusqlite::Params,
) -> SyncResult<Vec<T>> {
  let mut stmt = conn.prepare(sql)?;
  let rows = stmt
    .query_map(params, |row| row.get::<_, String>(0))?
    .collect::<rusqlite::Result<Vec<String>>>()?;

  // Skip rows that no longer decode rather than failing the whole read.
  Ok(
    rows
      .into_iter()
      .filter_map(|data| match serde_json::from_str(&data) {
        Ok(entity) => Some(entity),
        Err(e) => {
          warn!(collection = %T::collection(), error = %e, "skipping undecodable row");
          None
        }
      })
      .collect(),
  )
}

/// Fixed-width timestamps so `MAX(stored_at)` orders correctly.
fn now_timestamp() -> String {
  Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .unwrap_or_else(|e| {
      warn!(value = s, error = %e, "unparseable stored_at");
      DateTime::<Utc>::default()
    })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::models::{CatalogEntry, OperationRecord, RecordStatus};
  use serde_json::json;

  fn record(id: &str, tool: &str, status: RecordStatus) -> OperationRecord {
    OperationRecord {
      id: id.to_string(),
      tool_name: tool.to_string(),
      status,
      parameters: json!({}),
      created_at: Utc::now(),
      completed_at: None,
      result: None,
      error: None,
    }
  }

  #[test]
  fn test_put_get_delete() {
    let store = Store::open_in_memory().unwrap();
    let entry = CatalogEntry::new("stat", "analysis");

    assert_eq!(store.put(&entry).unwrap(), "stat");
    assert_eq!(store.get::<CatalogEntry>("stat").unwrap(), Some(entry));
    assert!(store.delete(Collection::Catalog, "stat").unwrap());
    assert_eq!(store.get::<CatalogEntry>("stat").unwrap(), None);
  }

  #[test]
  fn test_put_replaces_wholesale() {
    let store = Store::open_in_memory().unwrap();
    let mut entry = CatalogEntry::new("stat", "analysis");
    entry.description = Some("first".into());
    store.put(&entry).unwrap();

    let replacement = CatalogEntry::new("stat", "reporting");
    store.put(&replacement).unwrap();

    let stored = store.get::<CatalogEntry>("stat").unwrap().unwrap();
    assert_eq!(stored.description, None);
    assert_eq!(stored.category, "reporting");
    assert_eq!(store.count(Collection::Catalog).unwrap(), 1);
  }

  #[test]
  fn test_secondary_index_lookup() {
    let store = Store::open_in_memory().unwrap();
    store.put(&record("1", "stat", RecordStatus::Completed)).unwrap();
    store.put(&record("2", "plot", RecordStatus::Pending)).unwrap();
    store.put(&record("3", "stat", RecordStatus::Pending)).unwrap();

    let pending: Vec<OperationRecord> = store.get_all_by_index("status", "pending").unwrap();
    assert_eq!(
      pending.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
      vec!["2", "3"]
    );

    let stat: Vec<OperationRecord> = store.get_all_by_index("tool_name", "stat").unwrap();
    assert_eq!(stat.len(), 2);
  }

  #[test]
  fn test_unknown_index_is_rejected() {
    let store = Store::open_in_memory().unwrap();
    let result = store.get_all_by_index::<CatalogEntry>("owner", "x");
    assert!(matches!(result, Err(SyncError::UnknownIndex { .. })));
  }

  #[test]
  fn test_bulk_put_and_replace_all() {
    let store = Store::open_in_memory().unwrap();
    let entries = vec![
      CatalogEntry::new("a", "x"),
      CatalogEntry::new("b", "x"),
      CatalogEntry::new("c", "y"),
    ];
    let outcome = store.bulk_put(&entries).unwrap();
    assert_eq!(outcome, BulkPutOutcome { written: 3, failed: 0 });
    assert!(outcome.is_complete());

    store.replace_all(&[CatalogEntry::new("d", "z")]).unwrap();
    let all: Vec<CatalogEntry> = store.get_all().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].name, "d");
  }

  #[test]
  fn test_cache_read_is_idempotent_until_expiry() {
    let store = Store::open_in_memory().unwrap();
    store
      .cache_set("greeting", &json!({"text": "hi"}), Some(Duration::hours(1)))
      .unwrap();

    let first = store.cache_get("greeting").unwrap();
    let second = store.cache_get("greeting").unwrap();
    assert!(first.is_some());
    assert_eq!(first, second);
  }

  #[test]
  fn test_expired_cache_entry_is_purged_on_read() {
    let store = Store::open_in_memory().unwrap();
    store
      .cache_set("old", &json!(1), Some(Duration::milliseconds(-1)))
      .unwrap();
    assert_eq!(store.count(Collection::Cache).unwrap(), 1);

    assert_eq!(store.cache_get("old").unwrap(), None);
    assert_eq!(store.count(Collection::Cache).unwrap(), 0);
  }

  #[test]
  fn test_cleanup_expired_keeps_live_entries() {
    let store = Store::open_in_memory().unwrap();
    store.cache_set("live", &json!(1), None).unwrap();
    store
      .cache_set("dead", &json!(2), Some(Duration::seconds(-5)))
      .unwrap();

    assert_eq!(store.cleanup_expired().unwrap(), 1);
    assert_eq!(store.cache_get_value::<i64>("live").unwrap(), Some(1));
  }

  #[test]
  fn test_preferences_overwrite_in_place() {
    let store = Store::open_in_memory().unwrap();
    store.set_preference("theme", &"dark").unwrap();
    store.set_preference("theme", &"light").unwrap();

    assert_eq!(
      store.get_preference::<String>("theme").unwrap().as_deref(),
      Some("light")
    );
    assert_eq!(store.count(Collection::Preferences).unwrap(), 1);
    assert!(store.delete_preference("theme").unwrap());
  }

  #[test]
  fn test_keys_with_prefix() {
    let store = Store::open_in_memory().unwrap();
    store.cache_set("http:v1:a", &json!(1), None).unwrap();
    store.cache_set("http:v2:b", &json!(1), None).unwrap();
    store.cache_set("other", &json!(1), None).unwrap();

    let keys = store.keys_with_prefix(Collection::Cache, "http:").unwrap();
    assert_eq!(keys, vec!["http:v1:a", "http:v2:b"]);
  }

  #[test]
  fn test_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("store.db");
    {
      let store = Store::open(&path).unwrap();
      store.put(&CatalogEntry::new("stat", "analysis")).unwrap();
    }
    let store = Store::open(&path).unwrap();
    assert!(store.get::<CatalogEntry>("stat").unwrap().is_some());
    assert_eq!(store.stats().unwrap().schema_version, schema::SCHEMA_VERSION);
  }

  #[test]
  fn test_unopenable_path_reports_storage_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();
    let result = Store::open(&blocker.join("store.db"));
    assert!(matches!(result, Err(SyncError::StorageUnavailable(_))));
  }
}
