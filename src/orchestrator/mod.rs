//! Facade for host code: hides the choice between local store, offline queue
//! and network behind a small read/write API.

mod engine;
mod types;

pub use engine::Orchestrator;
pub use types::{
  CleanupReport, DataSource, EngineStats, OrchestratorOptions, ReadOutcome, ReadStrategy,
  SyncReport, WriteOutcome, WriteRequest,
};
