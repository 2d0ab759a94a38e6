//! Queue item model and its status state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::SyncError;
use crate::store::{Collection, Entity};

/// What a deferred write does when replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueItemKind {
  ExecuteOperation,
  UpdateRecord,
  DeleteRecord,
  CacheRefresh,
  Custom,
}

impl QueueItemKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      QueueItemKind::ExecuteOperation => "execute-operation",
      QueueItemKind::UpdateRecord => "update-record",
      QueueItemKind::DeleteRecord => "delete-record",
      QueueItemKind::CacheRefresh => "cache-refresh",
      QueueItemKind::Custom => "custom",
    }
  }
}

impl fmt::Display for QueueItemKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
  Pending,
  Processing,
  Completed,
  Failed,
}

impl QueueStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      QueueStatus::Pending => "pending",
      QueueStatus::Processing => "processing",
      QueueStatus::Completed => "completed",
      QueueStatus::Failed => "failed",
    }
  }

  pub fn is_terminal(&self) -> bool {
    matches!(self, QueueStatus::Completed | QueueStatus::Failed)
  }
}

impl fmt::Display for QueueStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Per-item enqueue settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueOptions {
  /// Higher runs sooner
  pub priority: i64,
  /// Attempts before the item fails for good; at least one
  pub max_retries: u32,
}

impl Default for EnqueueOptions {
  fn default() -> Self {
    Self {
      priority: 0,
      max_retries: 3,
    }
  }
}

impl EnqueueOptions {
  pub fn with_priority(mut self, priority: i64) -> Self {
    self.priority = priority;
    self
  }

  /// Every item gets at least one attempt, so zero is raised to one.
  pub fn with_max_retries(mut self, max_retries: u32) -> Self {
    self.max_retries = max_retries.max(1);
    self
  }
}

/// One deferred write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
  pub id: String,
  pub kind: QueueItemKind,
  pub payload: Value,
  pub status: QueueStatus,
  pub priority: i64,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  #[serde(default)]
  pub completed_at: Option<DateTime<Utc>>,
  pub retries: u32,
  pub max_retries: u32,
  #[serde(default)]
  pub last_error: Option<String>,
}

impl QueueItem {
  pub fn new(kind: QueueItemKind, payload: Value, options: EnqueueOptions) -> Self {
    let now = Utc::now();
    Self {
      id: Uuid::new_v4().to_string(),
      kind,
      payload,
      status: QueueStatus::Pending,
      priority: options.priority,
      created_at: now,
      updated_at: now,
      completed_at: None,
      retries: 0,
      max_retries: options.max_retries.max(1),
      last_error: None,
    }
  }

  /// `pending → processing`
  pub fn mark_processing(&mut self) {
    self.status = QueueStatus::Processing;
    self.updated_at = Utc::now();
  }

  /// `processing → completed`
  pub fn mark_completed(&mut self) {
    let now = Utc::now();
    self.status = QueueStatus::Completed;
    self.updated_at = now;
    self.completed_at = Some(now);
    self.last_error = None;
  }

  /// `processing → pending` or `processing → failed`.
  ///
  /// Every failed attempt counts. The item goes back to `pending` only for a
  /// recoverable error with attempts left. Returns true when the item is now
  /// terminally failed.
  pub fn record_failure(&mut self, error: &SyncError) -> bool {
    let now = Utc::now();
    self.retries += 1;
    self.last_error = Some(error.to_string());
    self.updated_at = now;

    if error.is_recoverable() && self.retries < self.max_retries {
      self.status = QueueStatus::Pending;
      false
    } else {
      self.status = QueueStatus::Failed;
      self.completed_at = Some(now);
      true
    }
  }

  /// `failed → pending` with a fresh retry budget.
  pub fn reset_for_retry(&mut self) {
    self.status = QueueStatus::Pending;
    self.retries = 0;
    self.completed_at = None;
    self.updated_at = Utc::now();
  }
}

impl Entity for QueueItem {
  fn key(&self) -> String {
    self.id.clone()
  }

  fn collection() -> Collection {
    Collection::Queue
  }
}

/// Counts per status, for badges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
  pub pending: usize,
  pub processing: usize,
  pub completed: usize,
  pub failed: usize,
  pub total: usize,
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
  /// Another pass was already running, nothing was done
  pub skipped: bool,
  /// Connectivity dropped mid-pass; the rest waits for the next pass
  pub halted: bool,
  /// Item ids in the order they were attempted
  pub attempted: Vec<String>,
  pub completed: usize,
  pub failed: usize,
  pub requeued: usize,
}

impl DrainReport {
  pub fn skipped() -> Self {
    Self {
      skipped: true,
      ..Self::default()
    }
  }
}

/// Payload of an `execute-operation` item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutePayload {
  pub name: String,
  #[serde(default)]
  pub parameters: Value,
}

/// Payload of an `update-record` item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatePayload {
  pub id: String,
  pub patch: Value,
}

/// Payload of a `delete-record` item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletePayload {
  pub id: String,
}

/// Payload of a `cache-refresh` item; an empty list refreshes everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefreshPayload {
  #[serde(default)]
  pub resources: Vec<crate::reconcile::Resource>,
}

/// Payload of a `custom` item, routed by handler name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomPayload {
  pub handler: String,
  #[serde(default)]
  pub data: Value,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn offline() -> SyncError {
    SyncError::Connectivity("offline".into())
  }

  #[test]
  fn test_always_failing_item_fails_after_max_retries_attempts() {
    let mut item = QueueItem::new(
      QueueItemKind::Custom,
      json!({}),
      EnqueueOptions::default().with_max_retries(3),
    );

    assert!(!item.record_failure(&offline()));
    assert_eq!(item.status, QueueStatus::Pending);
    assert!(!item.record_failure(&offline()));
    assert!(item.record_failure(&offline()));
    assert_eq!(item.status, QueueStatus::Failed);
    assert_eq!(item.retries, 3);
    assert_eq!(item.last_error.as_deref(), Some("connectivity error: offline"));
  }

  #[test]
  fn test_zero_retry_budget_still_allows_one_attempt() {
    assert_eq!(EnqueueOptions::default().with_max_retries(0).max_retries, 1);

    let options = EnqueueOptions {
      priority: 0,
      max_retries: 0,
    };
    let mut item = QueueItem::new(QueueItemKind::Custom, json!({}), options);
    assert_eq!(item.max_retries, 1);

    assert!(item.record_failure(&offline()));
    assert_eq!(item.status, QueueStatus::Failed);
    assert_eq!(item.retries, item.max_retries);
  }

  #[test]
  fn test_rejection_fails_immediately() {
    let mut item = QueueItem::new(QueueItemKind::Custom, json!({}), EnqueueOptions::default());
    let exhausted = item.record_failure(&SyncError::RemoteRejection {
      status: 422,
      message: "invalid".into(),
    });
    assert!(exhausted);
    assert_eq!(item.retries, 1);
  }

  #[test]
  fn test_kind_serializes_kebab_case() {
    assert_eq!(
      serde_json::to_value(QueueItemKind::ExecuteOperation).unwrap(),
      json!("execute-operation")
    );
    assert_eq!(
      serde_json::to_value(QueueStatus::Processing).unwrap(),
      json!("processing")
    );
  }

  #[test]
  fn test_reset_for_retry() {
    let mut item = QueueItem::new(
      QueueItemKind::Custom,
      json!({}),
      EnqueueOptions::default().with_max_retries(1),
    );
    item.record_failure(&offline());
    assert_eq!(item.status, QueueStatus::Failed);
    item.reset_for_retry();
    assert_eq!(item.status, QueueStatus::Pending);
    assert_eq!(item.retries, 0);
    assert_eq!(item.last_error.as_deref(), Some("connectivity error: offline"));
  }
}
