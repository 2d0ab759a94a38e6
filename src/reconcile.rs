//! Writing authoritative remote state into the local store.
//!
//! Shared by the queue's replay handlers and the orchestrator's reads, so a
//! fetched catalog or record lands in the store the same way on every path.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::SyncResult;
use crate::remote::{ExecuteRequest, ExecuteResponse, RemoteService};
use crate::store::{CatalogEntry, Collection, OperationRecord, Store};

/// Read-mostly resource classes the engine mirrors locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
  Catalog,
  Records,
}

impl Resource {
  pub const ALL: [Resource; 2] = [Resource::Catalog, Resource::Records];

  pub fn as_str(&self) -> &'static str {
    match self {
      Resource::Catalog => "catalog",
      Resource::Records => "records",
    }
  }
}

impl fmt::Display for Resource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Resource {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "catalog" => Ok(Resource::Catalog),
      "records" => Ok(Resource::Records),
      other => Err(format!("unknown resource '{}'", other)),
    }
  }
}

/// Fetch the whole catalog and overwrite the local copy wholesale.
pub async fn refresh_catalog(
  remote: &dyn RemoteService,
  store: &Store,
) -> SyncResult<Vec<CatalogEntry>> {
  let mut entries = remote.list_catalog().await?;
  let now = Utc::now();
  for entry in &mut entries {
    entry.cached_at = Some(now);
  }
  store.replace_all(&entries)?;
  debug!(count = entries.len(), "catalog refreshed");
  Ok(entries)
}

pub async fn refresh_catalog_entry(
  remote: &dyn RemoteService,
  store: &Store,
  name: &str,
) -> SyncResult<CatalogEntry> {
  let mut entry = remote.get_catalog_entry(name).await?;
  entry.cached_at = Some(Utc::now());
  store.put(&entry)?;
  Ok(entry)
}

/// Fetch all records and upsert them. Local records the service does not
/// list (e.g. optimistic inserts) are kept.
pub async fn refresh_records(
  remote: &dyn RemoteService,
  store: &Store,
) -> SyncResult<Vec<OperationRecord>> {
  let records = remote.list_records().await?;
  let outcome = store.bulk_put(&records)?;
  if !outcome.is_complete() {
    warn!(failed = outcome.failed, "some records could not be stored");
  }
  debug!(count = records.len(), "records refreshed");
  Ok(records)
}

pub async fn refresh_record(
  remote: &dyn RemoteService,
  store: &Store,
  id: &str,
) -> SyncResult<OperationRecord> {
  let record = remote.get_record(id).await?;
  store.put(&record)?;
  Ok(record)
}

pub async fn refresh(remote: &dyn RemoteService, store: &Store, resource: Resource) -> SyncResult<()> {
  match resource {
    Resource::Catalog => refresh_catalog(remote, store).await.map(|_| ()),
    Resource::Records => refresh_records(remote, store).await.map(|_| ()),
  }
}

/// Record a successful submission locally.
pub fn apply_execute_result(
  store: &Store,
  request: &ExecuteRequest,
  response: ExecuteResponse,
) -> SyncResult<OperationRecord> {
  let record = response.into_record(request);
  store.put(&record)?;
  Ok(record)
}

/// Apply a JSON merge patch to a stored record, replacing it wholesale.
/// Returns `None` when the record is not stored locally.
pub fn apply_patch_locally(
  store: &Store,
  id: &str,
  patch: &Value,
) -> SyncResult<Option<OperationRecord>> {
  let Some(record) = store.get::<OperationRecord>(id)? else {
    return Ok(None);
  };

  let mut value = serde_json::to_value(&record)?;
  merge_patch(&mut value, patch);
  let patched: OperationRecord = serde_json::from_value(value)?;
  store.put(&patched)?;
  Ok(Some(patched))
}

pub fn delete_locally(store: &Store, id: &str) -> SyncResult<bool> {
  store.delete(Collection::Records, id)
}

/// RFC 7386 merge: objects merge recursively, `null` removes, anything else replaces.
fn merge_patch(target: &mut Value, patch: &Value) {
  let Value::Object(patch_map) = patch else {
    *target = patch.clone();
    return;
  };
  if !target.is_object() {
    *target = Value::Object(Default::default());
  }
  if let Value::Object(target_map) = target {
    for (key, value) in patch_map {
      if value.is_null() {
        target_map.remove(key);
      } else {
        merge_patch(target_map.entry(key.clone()).or_insert(Value::Null), value);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::RecordStatus;
  use serde_json::json;

  #[test]
  fn test_merge_patch() {
    let mut target = json!({"a": 1, "b": {"c": 2, "d": 3}});
    merge_patch(&mut target, &json!({"a": null, "b": {"c": 5}, "e": "x"}));
    assert_eq!(target, json!({"b": {"c": 5, "d": 3}, "e": "x"}));
  }

  #[test]
  fn test_apply_patch_locally_replaces_record() {
    let store = Store::open_in_memory().unwrap();
    let record: OperationRecord = serde_json::from_value(json!({
      "id": "42", "tool_name": "stat", "status": "running"
    }))
    .unwrap();
    store.put(&record).unwrap();

    let patched = apply_patch_locally(&store, "42", &json!({"status": "completed"}))
      .unwrap()
      .unwrap();
    assert_eq!(patched.status, RecordStatus::Completed);
    assert_eq!(patched.tool_name, "stat");
    assert!(apply_patch_locally(&store, "missing", &json!({})).unwrap().is_none());
  }

  #[test]
  fn test_resource_parse() {
    assert_eq!("records".parse::<Resource>(), Ok(Resource::Records));
    assert!("notes".parse::<Resource>().is_err());
  }
}
