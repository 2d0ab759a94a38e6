//! Error taxonomy for the sync engine.

use thiserror::Error;

/// Errors produced by the store, queue, interception layer and orchestrator.
#[derive(Debug, Error)]
pub enum SyncError {
  /// The local store could not be opened or has become unusable.
  #[error("local storage unavailable: {0}")]
  StorageUnavailable(String),

  /// The network call never reached the service (offline, DNS, timeout).
  #[error("connectivity error: {0}")]
  Connectivity(String),

  /// The service answered with an application-level error.
  #[error("remote rejected request ({status}): {message}")]
  RemoteRejection { status: u16, message: String },

  #[error("not authorized: {0}")]
  Unauthorized(String),

  /// A queue item ran out of attempts.
  #[error("queue item {id} exhausted after {retries} attempts")]
  QueueExhausted { id: String, retries: u32 },

  #[error("invalid state: {0}")]
  InvalidState(String),

  #[error("not found: {0}")]
  NotFound(String),

  #[error("unknown index '{index}' on collection '{collection}'")]
  UnknownIndex { collection: String, index: String },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("storage error: {0}")]
  Storage(#[from] rusqlite::Error),
}

impl SyncError {
  /// Whether retrying later can succeed without anyone changing the request.
  pub fn is_recoverable(&self) -> bool {
    matches!(self, SyncError::Connectivity(_))
  }

  /// Whether the error means the service could not be reached.
  pub fn is_connectivity(&self) -> bool {
    matches!(self, SyncError::Connectivity(_))
  }
}

/// Transport errors only: HTTP statuses come back as responses and are
/// classified by the remote client.
impl From<reqwest::Error> for SyncError {
  fn from(e: reqwest::Error) -> Self {
    SyncError::Connectivity(e.to_string())
  }
}

/// Result type for sync engine operations.
pub type SyncResult<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_only_connectivity_is_recoverable() {
    assert!(SyncError::Connectivity("offline".into()).is_recoverable());
    assert!(!SyncError::RemoteRejection {
      status: 422,
      message: "bad parameters".into()
    }
    .is_recoverable());
    assert!(!SyncError::Unauthorized("expired".into()).is_recoverable());
    assert!(!SyncError::StorageUnavailable("quota".into()).is_recoverable());
  }

  #[tokio::test]
  async fn test_refused_connection_is_connectivity() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = reqwest::get(format!("http://{}/", addr)).await.unwrap_err();
    let err = SyncError::from(err);
    assert!(matches!(err, SyncError::Connectivity(_)));
    assert!(err.is_recoverable());
  }

  #[test]
  fn test_display_includes_status() {
    let err = SyncError::RemoteRejection {
      status: 400,
      message: "missing name".into(),
    };
    assert_eq!(err.to_string(), "remote rejected request (400): missing name");
  }
}
