//! HTTP implementation of [`RemoteService`], routed through the interceptor.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::types::{Credentials, ExecuteRequest, ExecuteResponse, Session};
use super::RemoteService;
use crate::error::{SyncError, SyncResult};
use crate::intercept::{HttpRequest, HttpResponse, Interceptor};
use crate::store::{CatalogEntry, OperationRecord};

/// Remote service client. Calls go through the [`Interceptor`] for routing
/// but bypass its response cache: the orchestrator keeps its own local copy
/// and must see real failures to fall back to it.
#[derive(Clone)]
pub struct HttpRemote {
  interceptor: Arc<Interceptor>,
}

impl HttpRemote {
  pub fn new(interceptor: Arc<Interceptor>) -> Self {
    Self { interceptor }
  }

  fn url(&self, path: &str) -> SyncResult<Url> {
    self.interceptor.resolve(path)
  }

  /// `{path}/{id}` with the id percent-encoded as one segment.
  fn entity_url(&self, path: &str, id: &str) -> SyncResult<Url> {
    let mut url = self.url(path)?;
    url
      .path_segments_mut()
      .map_err(|_| SyncError::InvalidState(format!("base URL cannot hold path '{}'", path)))?
      .pop_if_empty()
      .push(id);
    Ok(url)
  }

  async fn send(&self, request: HttpRequest) -> SyncResult<HttpResponse> {
    let method = request.method.clone();
    let url = request.url.clone();
    let response = self.interceptor.fetch(request.bypass_cache()).await?;
    debug!(%method, %url, status = response.status, "remote call");
    check(response)
  }

  async fn send_json<T: DeserializeOwned>(&self, request: HttpRequest) -> SyncResult<T> {
    let response = self.send(request).await?;
    Ok(serde_json::from_str(&response.body)?)
  }
}

/// Map a response onto the error taxonomy.
fn check(response: HttpResponse) -> SyncResult<HttpResponse> {
  if response.is_offline() {
    return Err(SyncError::Connectivity(error_message(&response)));
  }
  if response.is_success() {
    return Ok(response);
  }

  let message = error_message(&response);
  match response.status {
    401 | 403 => Err(SyncError::Unauthorized(message)),
    // Gateway errors mean the service itself was not reached.
    502..=504 => Err(SyncError::Connectivity(format!(
      "service unreachable ({}): {}",
      response.status, message
    ))),
    status => Err(SyncError::RemoteRejection { status, message }),
  }
}

fn error_message(response: &HttpResponse) -> String {
  serde_json::from_str::<Value>(&response.body)
    .ok()
    .and_then(|body| {
      body
        .get("message")
        .or_else(|| body.get("error"))
        .and_then(Value::as_str)
        .map(String::from)
    })
    .unwrap_or_else(|| response.body.trim().to_string())
}

#[async_trait]
impl RemoteService for HttpRemote {
  async fn list_catalog(&self) -> SyncResult<Vec<CatalogEntry>> {
    self.send_json(HttpRequest::get(self.url("catalog")?)).await
  }

  async fn get_catalog_entry(&self, name: &str) -> SyncResult<CatalogEntry> {
    self
      .send_json(HttpRequest::get(self.entity_url("catalog", name)?))
      .await
  }

  async fn list_records(&self) -> SyncResult<Vec<OperationRecord>> {
    self.send_json(HttpRequest::get(self.url("records")?)).await
  }

  async fn get_record(&self, id: &str) -> SyncResult<OperationRecord> {
    self
      .send_json(HttpRequest::get(self.entity_url("records", id)?))
      .await
  }

  async fn execute(&self, request: &ExecuteRequest) -> SyncResult<ExecuteResponse> {
    let body = serde_json::to_value(request)?;
    self
      .send_json(HttpRequest::with_method(
        Method::POST,
        self.url("execute")?,
        Some(body),
      ))
      .await
  }

  async fn update_record(&self, id: &str, patch: &Value) -> SyncResult<OperationRecord> {
    self
      .send_json(HttpRequest::with_method(
        Method::PATCH,
        self.entity_url("records", id)?,
        Some(patch.clone()),
      ))
      .await
  }

  async fn delete_record(&self, id: &str) -> SyncResult<()> {
    self
      .send(HttpRequest::with_method(
        Method::DELETE,
        self.entity_url("records", id)?,
        None,
      ))
      .await?;
    Ok(())
  }

  async fn login(&self, credentials: &Credentials) -> SyncResult<Session> {
    let body = serde_json::to_value(credentials)?;
    self
      .send_json(HttpRequest::with_method(
        Method::POST,
        self.url("auth/login")?,
        Some(body),
      ))
      .await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::intercept::{InterceptorOptions, ReqwestTransport, RouteTable};
  use crate::store::RecordStatus;
  use httpmock::Method::{DELETE, GET, PATCH, POST};
  use httpmock::MockServer;
  use serde_json::json;
  use std::time::Duration;

  fn remote(base: &str) -> HttpRemote {
    let transport = ReqwestTransport::new(Duration::from_secs(5), Some("secret".into())).unwrap();
    let interceptor = Interceptor::new(
      Arc::new(transport),
      None,
      Url::parse(base).unwrap(),
      RouteTable::default(),
      InterceptorOptions::default(),
    );
    HttpRemote::new(Arc::new(interceptor))
  }

  #[tokio::test]
  async fn test_execute_posts_payload() {
    let server = MockServer::start_async().await;
    let mock = server
      .mock_async(|when, then| {
        when
          .method(POST)
          .path("/execute")
          .header("authorization", "Bearer secret")
          .json_body(json!({"name": "stat", "parameters": {"x": 1}}));
        then
          .status(200)
          .json_body(json!({"id": "42", "status": "running"}));
      })
      .await;

    let response = remote(&server.base_url())
      .execute(&ExecuteRequest {
        name: "stat".into(),
        parameters: json!({"x": 1}),
      })
      .await
      .unwrap();

    mock.assert_async().await;
    assert_eq!(response.id, "42");
    assert_eq!(response.status, RecordStatus::Running);
  }

  #[tokio::test]
  async fn test_catalog_and_records_reads() {
    let server = MockServer::start_async().await;
    server
      .mock_async(|when, then| {
        when.method(GET).path("/catalog");
        then
          .status(200)
          .json_body(json!([{"name": "stat", "category": "analysis"}]));
      })
      .await;
    server
      .mock_async(|when, then| {
        when.method(GET).path("/records/42");
        then.status(200).json_body(json!({"id": "42", "status": "pending"}));
      })
      .await;

    let remote = remote(&server.base_url());
    let catalog = remote.list_catalog().await.unwrap();
    assert_eq!(catalog[0].category, "analysis");
    let record = remote.get_record("42").await.unwrap();
    assert_eq!(record.status, RecordStatus::Pending);
  }

  #[tokio::test]
  async fn test_status_codes_map_to_error_taxonomy() {
    let server = MockServer::start_async().await;
    server
      .mock_async(|when, then| {
        when.method(PATCH).path("/records/1");
        then
          .status(422)
          .json_body(json!({"message": "status is read-only"}));
      })
      .await;
    server
      .mock_async(|when, then| {
        when.method(DELETE).path("/records/1");
        then.status(401).body("token expired");
      })
      .await;
    server
      .mock_async(|when, then| {
        when.method(GET).path("/records");
        then.status(503).body("maintenance");
      })
      .await;

    let remote = remote(&server.base_url());
    match remote.update_record("1", &json!({"status": "x"})).await {
      Err(SyncError::RemoteRejection { status, message }) => {
        assert_eq!(status, 422);
        assert_eq!(message, "status is read-only");
      }
      other => panic!("expected rejection, got {:?}", other),
    }
    assert!(matches!(
      remote.delete_record("1").await,
      Err(SyncError::Unauthorized(_))
    ));
    assert!(matches!(
      remote.list_records().await,
      Err(SyncError::Connectivity(_))
    ));
  }

  #[tokio::test]
  async fn test_unreachable_service_is_connectivity_error() {
    let remote = remote("http://127.0.0.1:1");
    assert!(matches!(
      remote.list_catalog().await,
      Err(SyncError::Connectivity(_))
    ));
  }
}
