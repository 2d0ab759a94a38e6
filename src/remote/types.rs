//! Request and response bodies exchanged with the remote service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::{OperationRecord, RecordStatus};

/// Body of `POST /execute`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
  pub name: String,
  #[serde(default)]
  pub parameters: Value,
}

/// Reply to `POST /execute`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResponse {
  pub id: String,
  pub status: RecordStatus,
  #[serde(default)]
  pub result: Option<Value>,
}

impl ExecuteResponse {
  /// Local record written optimistically after a successful submission.
  pub fn into_record(self, request: &ExecuteRequest) -> OperationRecord {
    let now = Utc::now();
    OperationRecord {
      id: self.id,
      tool_name: request.name.clone(),
      status: self.status,
      parameters: request.parameters.clone(),
      created_at: now,
      completed_at: self.status.is_terminal().then_some(now),
      result: self.result,
      error: None,
    }
  }
}

/// Body of `POST /auth/login`.
#[derive(Clone, Serialize)]
pub struct Credentials {
  pub username: String,
  pub password: String,
}

/// Reply to `POST /auth/login`.
#[derive(Clone, PartialEq, Deserialize)]
pub struct Session {
  pub token: String,
  #[serde(default, alias = "expiresAt")]
  pub expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for Session {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Session")
      .field("token", &"<redacted>")
      .field("expires_at", &self.expires_at)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_execute_response_into_record() {
    let request = ExecuteRequest {
      name: "stat".into(),
      parameters: json!({"column": "age"}),
    };
    let response: ExecuteResponse =
      serde_json::from_value(json!({"id": "42", "status": "completed", "result": {"mean": 3}}))
        .unwrap();

    let record = response.into_record(&request);
    assert_eq!(record.id, "42");
    assert_eq!(record.tool_name, "stat");
    assert_eq!(record.parameters, json!({"column": "age"}));
    assert!(record.completed_at.is_some());
    assert_eq!(record.result, Some(json!({"mean": 3})));
  }
}
