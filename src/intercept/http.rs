//! Request/response types and the network transport seam.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

use crate::error::{SyncError, SyncResult};

/// Header set on every response the interceptor synthesizes while offline.
pub const OFFLINE_HEADER: &str = "x-syncvault-offline";

/// Header naming where a response came from (`network` or `cache`).
pub const SOURCE_HEADER: &str = "x-syncvault-source";

/// An outbound request as seen by the interception layer.
#[derive(Debug, Clone)]
pub struct HttpRequest {
  pub method: Method,
  pub url: Url,
  pub body: Option<Value>,
  /// Page navigation (served the offline shell when unreachable)
  pub navigational: bool,
  /// Always goes to the network, whatever the route's strategy
  pub no_cache: bool,
}

impl HttpRequest {
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      body: None,
      navigational: false,
      no_cache: false,
    }
  }

  pub fn navigate(url: Url) -> Self {
    Self {
      navigational: true,
      ..Self::get(url)
    }
  }

  pub fn with_method(method: Method, url: Url, body: Option<Value>) -> Self {
    Self {
      method,
      url,
      body,
      navigational: false,
      no_cache: false,
    }
  }

  /// Skip the response cache for this request. Failures surface as errors
  /// instead of synthesized offline responses.
  pub fn bypass_cache(mut self) -> Self {
    self.no_cache = true;
    self
  }
}

/// A response, either from the network or replayed from the response cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpResponse {
  pub status: u16,
  #[serde(default)]
  pub headers: BTreeMap<String, String>,
  pub body: String,
}

impl HttpResponse {
  pub fn new(status: u16, body: impl Into<String>) -> Self {
    Self {
      status,
      headers: BTreeMap::new(),
      body: body.into(),
    }
  }

  pub fn json(status: u16, value: &Value) -> Self {
    let mut response = Self::new(status, value.to_string());
    response
      .headers
      .insert("content-type".to_string(), "application/json".to_string());
    response
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.insert(name.to_string(), value.to_string());
    self
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self.headers.get(name).map(String::as_str)
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Whether this response was synthesized because the network was unreachable.
  pub fn is_offline(&self) -> bool {
    self.header(OFFLINE_HEADER) == Some("1")
  }

  pub fn from_cache(&self) -> bool {
    self.header(SOURCE_HEADER) == Some("cache")
  }

  /// Synthesized `503` returned when neither cache nor network can answer.
  pub fn service_unavailable(url: &Url) -> Self {
    Self::json(
      503,
      &json!({
        "error": "ServiceUnavailable",
        "offline": true,
        "message": format!("{} is not cached and the network is unreachable", url.path()),
      }),
    )
    .with_header(OFFLINE_HEADER, "1")
  }

  /// Minimal page served for navigations when even the shell is not cached.
  pub fn offline_page() -> Self {
    let mut response = Self::new(
      503,
      "<!doctype html><title>Offline</title><p>You are offline.</p>",
    )
    .with_header(OFFLINE_HEADER, "1");
    response
      .headers
      .insert("content-type".to_string(), "text/html".to_string());
    response
  }
}

/// Anything that can put a request on the wire.
#[async_trait]
pub trait Transport: Send + Sync {
  /// Send a request. Every HTTP status is returned as `Ok`; `Err` means the
  /// service could not be reached.
  async fn send(&self, request: &HttpRequest) -> SyncResult<HttpResponse>;
}

/// Production transport backed by `reqwest`.
#[derive(Clone)]
pub struct ReqwestTransport {
  http: reqwest::Client,
  token: Option<String>,
}

impl ReqwestTransport {
  pub fn new(timeout: Duration, token: Option<String>) -> SyncResult<Self> {
    let http = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| SyncError::InvalidState(format!("failed to build HTTP client: {}", e)))?;
    Ok(Self { http, token })
  }
}

#[async_trait]
impl Transport for ReqwestTransport {
  async fn send(&self, request: &HttpRequest) -> SyncResult<HttpResponse> {
    let mut builder = self
      .http
      .request(request.method.clone(), request.url.clone());
    if let Some(token) = &self.token {
      builder = builder.bearer_auth(token);
    }
    if let Some(body) = &request.body {
      builder = builder.json(body);
    }

    let response = builder.send().await?;
    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = response.text().await?;

    Ok(HttpResponse {
      status,
      headers,
      body,
    })
  }
}
