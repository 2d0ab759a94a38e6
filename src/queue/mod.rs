//! Durable queue of writes attempted while disconnected.
//!
//! Items are persisted before anything else happens and replayed strictly one
//! at a time in `(priority desc, created_at asc)` order, ties broken by
//! insertion order. A failed replay returns the item to `pending` until its
//! retry budget runs out; terminal items stay in the store until `cleanup`.

mod processor;
mod types;

pub use processor::{CustomHandler, QueueProcessor, RemoteProcessor};
pub use types::{
  CustomPayload, DeletePayload, DrainReport, EnqueueOptions, ExecutePayload, QueueItem,
  QueueItemKind, QueueStats, QueueStatus, RefreshPayload, UpdatePayload,
};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::connectivity::Connectivity;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventBus, SyncEvent};
use crate::store::{Collection, Store};

struct QueueInner {
  store: Store,
  events: EventBus,
  processor: Arc<dyn QueueProcessor>,
  connectivity: Connectivity,
  draining: AtomicBool,
}

/// Offline operation queue. Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct OfflineQueue {
  inner: Arc<QueueInner>,
}

/// Clears the drain flag when a pass ends, however it ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

impl OfflineQueue {
  pub fn new(
    store: Store,
    events: EventBus,
    processor: Arc<dyn QueueProcessor>,
    connectivity: Connectivity,
  ) -> Self {
    Self {
      inner: Arc::new(QueueInner {
        store,
        events,
        processor,
        connectivity,
        draining: AtomicBool::new(false),
      }),
    }
  }

  /// Persist a new item. When online, a drain is started in the background
  /// and this returns without waiting for it.
  pub async fn enqueue(
    &self,
    kind: QueueItemKind,
    payload: Value,
    options: EnqueueOptions,
  ) -> SyncResult<String> {
    let item = QueueItem::new(kind, payload, options);
    let id = self.inner.store.put(&item)?;
    info!(id = %id, kind = %kind, priority = item.priority, "queued offline operation");
    self.inner.events.emit(SyncEvent::ItemAdded {
      id: id.clone(),
      kind: kind.to_string(),
    });

    if self.inner.connectivity.is_online() {
      let queue = self.clone();
      tokio::spawn(async move {
        if let Err(e) = queue.drain().await {
          warn!(error = %e, "opportunistic drain failed");
        }
      });
    }

    Ok(id)
  }

  pub fn is_draining(&self) -> bool {
    self.inner.draining.load(Ordering::Acquire)
  }

  /// Run one pass over the items pending right now.
  ///
  /// A pass never retries within itself, and items enqueued while it runs
  /// wait for the next pass. If a pass is already running this is a no-op.
  pub async fn drain(&self) -> SyncResult<DrainReport> {
    if self
      .inner
      .draining
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      debug!("drain already in progress, skipping");
      return Ok(DrainReport::skipped());
    }
    let _guard = DrainGuard(&self.inner.draining);

    match self.run_pass().await {
      Ok(report) => {
        self.inner.events.emit(SyncEvent::SyncCompleted {
          completed: report.completed,
          failed: report.failed,
          requeued: report.requeued,
        });
        Ok(report)
      }
      Err(e) => {
        warn!(error = %e, "drain pass aborted");
        self.inner.events.emit(SyncEvent::SyncFailed {
          error: e.to_string(),
        });
        Err(e)
      }
    }
  }

  async fn run_pass(&self) -> SyncResult<DrainReport> {
    let snapshot = self.get_pending()?;
    let mut report = DrainReport::default();

    self.inner.events.emit(SyncEvent::SyncStarted {
      pending: snapshot.len(),
    });
    if !snapshot.is_empty() {
      info!(pending = snapshot.len(), "draining offline queue");
    }

    for queued in snapshot {
      if !self.inner.connectivity.is_online() {
        info!("connectivity lost, leaving remaining items for the next pass");
        report.halted = true;
        break;
      }

      // Re-read: the item may have been removed since the snapshot.
      let mut item = match self.inner.store.get::<QueueItem>(&queued.id)? {
        Some(item) if item.status == QueueStatus::Pending => item,
        _ => continue,
      };

      item.mark_processing();
      self.inner.store.put(&item)?;
      self.inner.events.emit(SyncEvent::ItemProcessing {
        id: item.id.clone(),
      });
      report.attempted.push(item.id.clone());

      match self.inner.processor.process(&item).await {
        Ok(()) => {
          item.mark_completed();
          self.inner.store.put(&item)?;
          debug!(id = %item.id, "queued item completed");
          self.inner.events.emit(SyncEvent::ItemCompleted {
            id: item.id.clone(),
          });
          report.completed += 1;
        }
        Err(e) => {
          let exhausted = item.record_failure(&e);
          self.inner.store.put(&item)?;

          let error = if exhausted {
            let exhausted_err = SyncError::QueueExhausted {
              id: item.id.clone(),
              retries: item.retries,
            };
            warn!(id = %item.id, retries = item.retries, error = %e, "{}", exhausted_err);
            report.failed += 1;
            format!("{}: {}", exhausted_err, e)
          } else {
            info!(id = %item.id, retries = item.retries, max = item.max_retries, error = %e, "queued item will be retried");
            report.requeued += 1;
            e.to_string()
          };

          self.inner.events.emit(SyncEvent::ItemFailed {
            id: item.id.clone(),
            error,
            exhausted,
          });
        }
      }
    }

    Ok(report)
  }

  pub fn get_item(&self, id: &str) -> SyncResult<Option<QueueItem>> {
    self.inner.store.get(id)
  }

  /// Pending items in replay order.
  pub fn get_pending(&self) -> SyncResult<Vec<QueueItem>> {
    let mut items: Vec<QueueItem> = self
      .inner
      .store
      .get_all_by_index("status", QueueStatus::Pending.as_str())?;
    // Stable sort keeps insertion order for equal keys.
    items.sort_by(|a, b| {
      b.priority
        .cmp(&a.priority)
        .then_with(|| a.created_at.cmp(&b.created_at))
    });
    Ok(items)
  }

  pub fn get_all(&self) -> SyncResult<Vec<QueueItem>> {
    self.inner.store.get_all()
  }

  pub fn get_by_status(&self, status: QueueStatus) -> SyncResult<Vec<QueueItem>> {
    self.inner.store.get_all_by_index("status", status.as_str())
  }

  /// Counts per status, straight from the store.
  pub fn get_stats(&self) -> SyncResult<QueueStats> {
    let mut stats = QueueStats::default();
    for item in self.get_all()? {
      match item.status {
        QueueStatus::Pending => stats.pending += 1,
        QueueStatus::Processing => stats.processing += 1,
        QueueStatus::Completed => stats.completed += 1,
        QueueStatus::Failed => stats.failed += 1,
      }
      stats.total += 1;
    }
    Ok(stats)
  }

  /// Remove an item that has not started processing.
  pub fn remove_item(&self, id: &str) -> SyncResult<()> {
    let item = self
      .get_item(id)?
      .ok_or_else(|| SyncError::NotFound(format!("queue item {}", id)))?;
    if item.status != QueueStatus::Pending {
      return Err(SyncError::InvalidState(format!(
        "queue item {} is {} and can no longer be removed",
        id, item.status
      )));
    }
    self.inner.store.delete(Collection::Queue, id)?;
    info!(id, "removed queued item");
    Ok(())
  }

  /// Give a failed item a fresh retry budget for the next pass.
  pub fn retry_item(&self, id: &str) -> SyncResult<QueueItem> {
    let mut item = self
      .get_item(id)?
      .ok_or_else(|| SyncError::NotFound(format!("queue item {}", id)))?;
    if item.status != QueueStatus::Failed {
      return Err(SyncError::InvalidState(format!(
        "queue item {} is {}, only failed items can be retried",
        id, item.status
      )));
    }
    item.reset_for_retry();
    self.inner.store.put(&item)?;
    info!(id, "failed item returned to pending");
    Ok(item)
  }

  /// Delete terminal items, optionally only those finished before `before`.
  pub fn cleanup(&self, before: Option<DateTime<Utc>>) -> SyncResult<usize> {
    let mut removed = 0;
    for item in self.get_all()? {
      if !item.status.is_terminal() {
        continue;
      }
      let finished = item.completed_at.unwrap_or(item.updated_at);
      if before.is_some_and(|cutoff| finished >= cutoff) {
        continue;
      }
      if self.inner.store.delete(Collection::Queue, &item.id)? {
        removed += 1;
      }
    }
    if removed > 0 {
      info!(removed, "cleaned up finished queue items");
    }
    Ok(removed)
  }

  /// Return items left `processing` by an interrupted pass to `pending`.
  /// Call once at startup, before the first drain.
  pub fn recover_interrupted(&self) -> SyncResult<usize> {
    if self.is_draining() {
      return Ok(0);
    }
    let stuck = self.get_by_status(QueueStatus::Processing)?;
    for mut item in stuck.iter().cloned() {
      item.status = QueueStatus::Pending;
      item.updated_at = Utc::now();
      self.inner.store.put(&item)?;
    }
    if !stuck.is_empty() {
      warn!(count = stuck.len(), "recovered interrupted queue items");
    }
    Ok(stuck.len())
  }
}
