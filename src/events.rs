//! Observer registry for engine lifecycle events.
//!
//! Listeners are best-effort: a panicking listener is caught and logged and
//! never stops the remaining listeners from running.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{trace, warn};

/// Events emitted by the queue, the orchestrator and the background agent.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
  ItemAdded { id: String, kind: String },
  ItemProcessing { id: String },
  ItemCompleted { id: String },
  /// `exhausted` is set when the item reached its terminal `failed` state.
  ItemFailed { id: String, error: String, exhausted: bool },
  SyncStarted { pending: usize },
  SyncCompleted { completed: usize, failed: usize, requeued: usize },
  SyncFailed { error: String },
  DataUpdated { resource: String },
  RefreshFailed { resource: String, error: String },
  StorageUnavailable { reason: String },
  ConnectivityChanged { online: bool },
}

/// Event names listeners subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
  ItemAdded,
  ItemProcessing,
  ItemCompleted,
  ItemFailed,
  SyncStarted,
  SyncCompleted,
  SyncFailed,
  DataUpdated,
  RefreshFailed,
  StorageUnavailable,
  ConnectivityChanged,
}

impl EventKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      EventKind::ItemAdded => "item-added",
      EventKind::ItemProcessing => "item-processing",
      EventKind::ItemCompleted => "item-completed",
      EventKind::ItemFailed => "item-failed",
      EventKind::SyncStarted => "sync-started",
      EventKind::SyncCompleted => "sync-completed",
      EventKind::SyncFailed => "sync-failed",
      EventKind::DataUpdated => "data-updated",
      EventKind::RefreshFailed => "refresh-failed",
      EventKind::StorageUnavailable => "storage-unavailable",
      EventKind::ConnectivityChanged => "connectivity-changed",
    }
  }
}

impl fmt::Display for EventKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl SyncEvent {
  pub fn kind(&self) -> EventKind {
    match self {
      SyncEvent::ItemAdded { .. } => EventKind::ItemAdded,
      SyncEvent::ItemProcessing { .. } => EventKind::ItemProcessing,
      SyncEvent::ItemCompleted { .. } => EventKind::ItemCompleted,
      SyncEvent::ItemFailed { .. } => EventKind::ItemFailed,
      SyncEvent::SyncStarted { .. } => EventKind::SyncStarted,
      SyncEvent::SyncCompleted { .. } => EventKind::SyncCompleted,
      SyncEvent::SyncFailed { .. } => EventKind::SyncFailed,
      SyncEvent::DataUpdated { .. } => EventKind::DataUpdated,
      SyncEvent::RefreshFailed { .. } => EventKind::RefreshFailed,
      SyncEvent::StorageUnavailable { .. } => EventKind::StorageUnavailable,
      SyncEvent::ConnectivityChanged { .. } => EventKind::ConnectivityChanged,
    }
  }
}

/// Handle returned by [`EventBus::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Handler = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
  listeners: HashMap<EventKind, Vec<(ListenerId, Handler)>>,
}

/// Shared event registry. Cloning yields another handle to the same listeners.
#[derive(Clone, Default)]
pub struct EventBus {
  registry: Arc<Mutex<Registry>>,
  next_id: Arc<AtomicU64>,
}

impl EventBus {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a listener for one event kind.
  pub fn on<F>(&self, kind: EventKind, handler: F) -> ListenerId
  where
    F: Fn(&SyncEvent) + Send + Sync + 'static,
  {
    let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
    let mut registry = self.lock();
    registry
      .listeners
      .entry(kind)
      .or_default()
      .push((id, Arc::new(handler)));
    id
  }

  /// Remove a listener. Returns false if it was not registered for `kind`.
  pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
    let mut registry = self.lock();
    match registry.listeners.get_mut(&kind) {
      Some(handlers) => {
        let before = handlers.len();
        handlers.retain(|(lid, _)| *lid != id);
        handlers.len() != before
      }
      None => false,
    }
  }

  /// Deliver an event to every listener registered for its kind.
  pub fn emit(&self, event: SyncEvent) {
    let kind = event.kind();
    // Snapshot so listeners may subscribe or unsubscribe re-entrantly.
    let handlers: Vec<Handler> = {
      let registry = self.lock();
      registry
        .listeners
        .get(&kind)
        .map(|hs| hs.iter().map(|(_, h)| Arc::clone(h)).collect())
        .unwrap_or_default()
    };

    trace!(event = %kind, listeners = handlers.len(), "emitting event");

    for handler in handlers {
      if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
        warn!(event = %kind, "event listener panicked");
      }
    }
  }

  pub fn listener_count(&self, kind: EventKind) -> usize {
    self.lock().listeners.get(&kind).map_or(0, Vec::len)
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
    // A listener never runs under the lock, so poisoning only happens on a
    // bug inside this module; the registry data stays consistent either way.
    self
      .registry
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}
