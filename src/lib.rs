//! Offline-first sync and caching engine.
//!
//! Raw HTTP consumers go through an [`intercept::Interceptor`] that applies
//! a per-route caching strategy. The orchestrator's remote calls use the
//! same interceptor with its response cache bypassed and keep their own
//! local copy in the [`store::Store`].
//! Writes that cannot reach the service land in a durable
//! [`queue::OfflineQueue`] and are replayed in order once connectivity
//! returns. Host code talks to the [`orchestrator::Orchestrator`].

pub mod config;
pub mod connectivity;
pub mod error;
pub mod events;
pub mod intercept;
pub mod logging;
pub mod orchestrator;
pub mod queue;
pub mod reconcile;
pub mod remote;
pub mod store;

pub use connectivity::Connectivity;
pub use error::{SyncError, SyncResult};
pub use events::{EventBus, EventKind, SyncEvent};
pub use orchestrator::{Orchestrator, ReadStrategy, WriteRequest};
