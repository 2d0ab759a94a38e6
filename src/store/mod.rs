//! Durable local storage with typed collections.
//!
//! This module provides a schema-versioned SQLite database that:
//! - Keeps catalog entries, operation records, queue items, generic cache
//!   entries and preferences in separate collections
//! - Supports key lookup and secondary-index queries
//! - Migrates additively when a newer schema version is opened
//! - Purges expired cache entries on read

mod models;
pub mod schema;
mod sqlite;
mod traits;

pub use models::{CacheEntry, CatalogEntry, OperationRecord, Preference, RecordStatus};
pub use sqlite::Store;
pub use traits::{BulkPutOutcome, CachedEntity, Collection, Entity, StoreStats};
