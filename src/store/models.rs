//! Entities owned by the persistent store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::traits::{Collection, Entity};

/// Metadata for an invocable operation exposed by the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
  pub name: String,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub category: String,
  #[serde(default)]
  pub parameters: Value,
  #[serde(default, alias = "updatedAt")]
  pub updated_at: Option<DateTime<Utc>>,
  /// Local receipt time, stamped when the entry is written to the store
  #[serde(default)]
  pub cached_at: Option<DateTime<Utc>>,
  /// Remaining service-defined fields, kept verbatim
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl CatalogEntry {
  pub fn new(name: impl Into<String>, category: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      description: None,
      category: category.into(),
      parameters: Value::Null,
      updated_at: None,
      cached_at: None,
      extra: Map::new(),
    }
  }
}

impl Entity for CatalogEntry {
  fn key(&self) -> String {
    self.name.clone()
  }

  fn collection() -> Collection {
    Collection::Catalog
  }
}

/// Status of one remote invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
  Pending,
  Running,
  Completed,
  Failed,
}

impl RecordStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      RecordStatus::Pending => "pending",
      RecordStatus::Running => "running",
      RecordStatus::Completed => "completed",
      RecordStatus::Failed => "failed",
    }
  }

  pub fn is_terminal(&self) -> bool {
    matches!(self, RecordStatus::Completed | RecordStatus::Failed)
  }
}

/// Result/status record of one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
  pub id: String,
  #[serde(default, alias = "toolName")]
  pub tool_name: String,
  pub status: RecordStatus,
  #[serde(default)]
  pub parameters: Value,
  #[serde(default = "Utc::now", alias = "createdAt")]
  pub created_at: DateTime<Utc>,
  #[serde(default, alias = "completedAt")]
  pub completed_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub result: Option<Value>,
  #[serde(default)]
  pub error: Option<String>,
}

impl Entity for OperationRecord {
  fn key(&self) -> String {
    self.id.clone()
  }

  fn collection() -> Collection {
    Collection::Records
  }
}

/// Generic key/value cache entry with optional expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
  pub key: String,
  pub value: Value,
  pub created_at: DateTime<Utc>,
  #[serde(default)]
  pub expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
  pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
    self.expires_at.is_some_and(|expires| now >= expires)
  }

  pub fn is_expired(&self) -> bool {
    self.is_expired_at(Utc::now())
  }
}

impl Entity for CacheEntry {
  fn key(&self) -> String {
    self.key.clone()
  }

  fn collection() -> Collection {
    Collection::Cache
  }
}

/// User setting, overwritten in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preference {
  pub key: String,
  pub value: Value,
  pub updated_at: DateTime<Utc>,
}

impl Entity for Preference {
  fn key(&self) -> String {
    self.key.clone()
  }

  fn collection() -> Collection {
    Collection::Preferences
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Duration;
  use serde_json::json;

  #[test]
  fn test_catalog_entry_keeps_unknown_fields() {
    let entry: CatalogEntry = serde_json::from_value(json!({
      "name": "stat",
      "category": "analysis",
      "version": 3
    }))
    .unwrap();
    assert_eq!(entry.extra.get("version"), Some(&json!(3)));
    assert_eq!(serde_json::to_value(&entry).unwrap()["version"], json!(3));
  }

  #[test]
  fn test_record_accepts_sparse_payload() {
    let record: OperationRecord =
      serde_json::from_value(json!({ "id": "42", "status": "completed" })).unwrap();
    assert_eq!(record.status, RecordStatus::Completed);
    assert!(record.tool_name.is_empty());
  }

  #[test]
  fn test_cache_entry_expiry() {
    let now = Utc::now();
    let entry = CacheEntry {
      key: "k".into(),
      value: json!(1),
      created_at: now,
      expires_at: Some(now + Duration::seconds(10)),
    };
    assert!(!entry.is_expired_at(now));
    assert!(entry.is_expired_at(now + Duration::seconds(10)));
  }
}
