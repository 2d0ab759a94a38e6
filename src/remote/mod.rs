//! Contract of the remote content/tooling service.

mod client;
mod types;

pub use client::HttpRemote;
pub use types::{Credentials, ExecuteRequest, ExecuteResponse, Session};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::SyncResult;
use crate::store::{CatalogEntry, OperationRecord};

/// Operations the engine consumes from the remote service.
///
/// Implementations must report unreachable-network failures as
/// [`SyncError::Connectivity`](crate::error::SyncError::Connectivity) and
/// application-level refusals as `RemoteRejection` or `Unauthorized`; the
/// engine's queueing decisions depend on that distinction.
#[async_trait]
pub trait RemoteService: Send + Sync {
  /// `GET /catalog`
  async fn list_catalog(&self) -> SyncResult<Vec<CatalogEntry>>;

  /// `GET /catalog/{name}`
  async fn get_catalog_entry(&self, name: &str) -> SyncResult<CatalogEntry>;

  /// `GET /records`
  async fn list_records(&self) -> SyncResult<Vec<OperationRecord>>;

  /// `GET /records/{id}`
  async fn get_record(&self, id: &str) -> SyncResult<OperationRecord>;

  /// `POST /execute`
  async fn execute(&self, request: &ExecuteRequest) -> SyncResult<ExecuteResponse>;

  /// `PATCH /records/{id}`; returns the updated record.
  async fn update_record(&self, id: &str, patch: &Value) -> SyncResult<OperationRecord>;

  /// `DELETE /records/{id}`
  async fn delete_record(&self, id: &str) -> SyncResult<()>;

  /// `POST /auth/login`
  async fn login(&self, credentials: &Credentials) -> SyncResult<Session>;
}
