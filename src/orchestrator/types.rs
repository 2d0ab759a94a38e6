//! Request and result types of the orchestrator API.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::queue::{CustomHandler, DrainReport, EnqueueOptions, QueueStats};
use crate::reconcile::Resource;
use crate::store::StoreStats;

/// Consistency strategy for a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadStrategy {
  /// Local data if present, refreshed in the background when online
  #[default]
  CacheFirst,
  /// Network, falling back to local data on connectivity failure
  NetworkFirst,
  CacheOnly,
  NetworkOnly,
}

impl ReadStrategy {
  pub fn as_str(&self) -> &'static str {
    match self {
      ReadStrategy::CacheFirst => "cache-first",
      ReadStrategy::NetworkFirst => "network-first",
      ReadStrategy::CacheOnly => "cache-only",
      ReadStrategy::NetworkOnly => "network-only",
    }
  }
}

impl fmt::Display for ReadStrategy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ReadStrategy {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "cache-first" => Ok(ReadStrategy::CacheFirst),
      "network-first" => Ok(ReadStrategy::NetworkFirst),
      "cache-only" => Ok(ReadStrategy::CacheOnly),
      "network-only" => Ok(ReadStrategy::NetworkOnly),
      other => Err(format!("unknown read strategy '{}'", other)),
    }
  }
}

/// Where the data of a read came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
  /// Fetched from the remote service just now
  Network,
  /// Served from the local store
  Cache,
  /// Network failed, served from the local store
  Offline,
  /// Network failed and nothing is stored; data is empty
  Unavailable,
}

/// Result of a read, with metadata about its source.
#[derive(Debug, Clone, Serialize)]
pub struct ReadOutcome<T> {
  pub data: T,
  pub source: DataSource,
  /// When the local copy was stored, for cache-served data
  pub cached_at: Option<DateTime<Utc>>,
  /// Network data, or local data younger than the stale time
  pub fresh: bool,
}

impl<T> ReadOutcome<T> {
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: DataSource::Network,
      cached_at: None,
      fresh: true,
    }
  }

  pub fn from_cache(data: T, cached_at: Option<DateTime<Utc>>, fresh: bool) -> Self {
    Self {
      data,
      source: DataSource::Cache,
      cached_at,
      fresh,
    }
  }

  pub fn offline(data: T, cached_at: Option<DateTime<Utc>>) -> Self {
    Self {
      data,
      source: DataSource::Offline,
      cached_at,
      fresh: false,
    }
  }

  pub fn unavailable(data: T) -> Self {
    Self {
      data,
      source: DataSource::Unavailable,
      cached_at: None,
      fresh: false,
    }
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ReadOutcome<U> {
    ReadOutcome {
      data: f(self.data),
      source: self.source,
      cached_at: self.cached_at,
      fresh: self.fresh,
    }
  }

  pub fn is_available(&self) -> bool {
    self.source != DataSource::Unavailable
  }
}

/// A state-changing request.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteRequest {
  /// `POST /execute`
  Execute { name: String, parameters: Value },
  /// `PATCH /records/{id}` with a JSON merge patch
  UpdateRecord { id: String, patch: Value },
  /// `DELETE /records/{id}`
  DeleteRecord { id: String },
}

impl WriteRequest {
  pub fn execute(name: impl Into<String>, parameters: Value) -> Self {
    WriteRequest::Execute {
      name: name.into(),
      parameters,
    }
  }
}

/// Result of a write: either executed now or queued for later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteOutcome {
  pub queued: bool,
  /// Record id when executed, queue item id when queued
  pub id: String,
}

impl WriteOutcome {
  pub fn executed(id: impl Into<String>) -> Self {
    Self {
      queued: false,
      id: id.into(),
    }
  }

  pub fn queued(id: impl Into<String>) -> Self {
    Self {
      queued: true,
      id: id.into(),
    }
  }
}

/// Outcome of [`Orchestrator::force_sync`](super::Orchestrator::force_sync).
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
  /// Another sync was already running
  pub skipped: bool,
  pub refreshed: Vec<Resource>,
  pub failed: Vec<Resource>,
  pub drain: Option<DrainReport>,
  /// Why the drain pass could not run; also emitted as `SyncFailed`
  #[serde(skip_serializing_if = "Option::is_none")]
  pub drain_error: Option<String>,
}

/// Storage and queue introspection for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
  pub stores: Option<StoreStats>,
  pub queue: Option<QueueStats>,
  pub online: bool,
  /// Running without a local store
  pub degraded: bool,
  pub syncing: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
  pub expired_cache: usize,
  pub queue_items: usize,
}

/// Construction options.
#[derive(Clone)]
pub struct OrchestratorOptions {
  /// Local data older than this is reported as not fresh
  pub stale_time: Duration,
  /// Applied to writes queued by the orchestrator
  pub enqueue: EnqueueOptions,
  /// Handlers for `custom` queue items, by name
  pub custom_handlers: HashMap<String, Arc<dyn CustomHandler>>,
}

impl Default for OrchestratorOptions {
  fn default() -> Self {
    Self {
      stale_time: Duration::minutes(5),
      enqueue: EnqueueOptions::default(),
      custom_handlers: HashMap::new(),
    }
  }
}

impl OrchestratorOptions {
  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  pub fn with_custom_handler(
    mut self,
    name: impl Into<String>,
    handler: Arc<dyn CustomHandler>,
  ) -> Self {
    self.custom_handlers.insert(name.into(), handler);
    self
  }
}
