//! Core traits and types for the persistent store.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

/// Named collections in the local database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
  Catalog,
  Records,
  Queue,
  Cache,
  Preferences,
}

impl Collection {
  /// Table name backing this collection.
  pub fn name(&self) -> &'static str {
    match self {
      Collection::Catalog => "catalog",
      Collection::Records => "records",
      Collection::Queue => "queue",
      Collection::Cache => "cache",
      Collection::Preferences => "preferences",
    }
  }

  /// Secondary indexes, each a column generated from the stored JSON.
  pub fn indexes(&self) -> &'static [&'static str] {
    match self {
      Collection::Catalog => &["category"],
      Collection::Records => &["status", "tool_name"],
      Collection::Queue => &["status", "kind"],
      Collection::Cache => &[],
      Collection::Preferences => &[],
    }
  }

  pub fn has_index(&self, index: &str) -> bool {
    self.indexes().contains(&index)
  }
}

impl fmt::Display for Collection {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// Trait for values that live in a store collection.
///
/// Implementors provide the unique key within their collection; the value is
/// persisted as JSON and replaced wholesale on every write.
pub trait Entity: Clone + Send + Sync + Serialize + DeserializeOwned {
  /// Unique key within the collection (e.g. catalog name, record id)
  fn key(&self) -> String;

  /// Collection this entity type is stored in
  fn collection() -> Collection;
}

/// A stored entity together with the time it was written locally.
#[derive(Debug, Clone)]
pub struct CachedEntity<T> {
  pub entity: T,
  pub stored_at: DateTime<Utc>,
}

/// Outcome of a batch write. Rows that failed are reported, not rolled back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkPutOutcome {
  pub written: usize,
  pub failed: usize,
}

impl BulkPutOutcome {
  pub fn is_complete(&self) -> bool {
    self.failed == 0
  }
}

/// Row counts per collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
  pub catalog: usize,
  pub records: usize,
  pub queue: usize,
  pub cache: usize,
  pub preferences: usize,
  pub schema_version: u32,
}
