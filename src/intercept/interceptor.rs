//! Network-boundary interceptor applying per-route caching strategies.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Duration;
use futures::future::join_all;
use sha2::{Digest, Sha256};
use tracing::{debug, info, trace, warn};
use url::Url;

use super::http::{HttpRequest, HttpResponse, Transport, SOURCE_HEADER};
use super::routes::{RouteTable, Strategy};
use crate::error::{SyncError, SyncResult};
use crate::store::{Collection, Store};

/// Key prefix shared by every response cache in the generic cache collection.
const RESPONSE_CACHE_PREFIX: &str = "http:";

/// Lifecycle of the interceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  Installing,
  /// Installed and waiting for activation
  Installed,
  Activating,
  Activated,
}

impl fmt::Display for LifecycleState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      LifecycleState::Installing => "installing",
      LifecycleState::Installed => "installed",
      LifecycleState::Activating => "activating",
      LifecycleState::Activated => "activated",
    };
    f.write_str(s)
  }
}

#[derive(Debug, Clone)]
pub struct InterceptorOptions {
  /// Responses cached under other versions are deleted on activation
  pub cache_version: String,
  /// Page served to navigations while offline
  pub shell_path: String,
  /// Lifetime of cached responses; `None` keeps them until replaced
  pub response_ttl: Option<Duration>,
  /// Paths re-fetched on every wake
  pub read_mostly: Vec<String>,
}

impl Default for InterceptorOptions {
  fn default() -> Self {
    Self {
      cache_version: "v1".to_string(),
      shell_path: "/".to_string(),
      response_ttl: None,
      read_mostly: vec!["/catalog".to_string(), "/records".to_string()],
    }
  }
}

/// Outcome of a refresh pass over read-mostly resources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
  pub refreshed: usize,
  pub failed: usize,
}

/// Routes every request through a caching strategy chosen by [`RouteTable`].
///
/// Responses are kept in the store's generic cache collection. Without a
/// store, or before activation, requests go straight to the transport.
pub struct Interceptor {
  transport: Arc<dyn Transport>,
  store: Option<Store>,
  routes: RouteTable,
  base_url: Url,
  options: InterceptorOptions,
  state: Mutex<LifecycleState>,
  controlling: AtomicBool,
}

impl Interceptor {
  pub fn new(
    transport: Arc<dyn Transport>,
    store: Option<Store>,
    base_url: Url,
    routes: RouteTable,
    options: InterceptorOptions,
  ) -> Self {
    Self {
      transport,
      store,
      routes,
      base_url: with_trailing_slash(base_url),
      options,
      state: Mutex::new(LifecycleState::Installing),
      controlling: AtomicBool::new(false),
    }
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  pub fn state(&self) -> LifecycleState {
    *self.state.lock().unwrap_or_else(|p| p.into_inner())
  }

  /// Whether the interceptor has claimed control and applies strategies.
  pub fn is_controlling(&self) -> bool {
    self.controlling.load(Ordering::Acquire)
  }

  fn transition(&self, from: LifecycleState, to: LifecycleState) -> SyncResult<()> {
    let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
    if *state != from {
      return Err(SyncError::InvalidState(format!(
        "cannot move interceptor to {} while {}",
        to, *state
      )));
    }
    debug!(from = %from, to = %to, "interceptor lifecycle");
    *state = to;
    Ok(())
  }

  /// Pre-cache the offline shell and wait for activation.
  ///
  /// An unreachable network does not fail installation; the shell is simply
  /// missing until the next successful navigation.
  pub async fn install(&self) -> SyncResult<()> {
    self.transition(LifecycleState::Installing, LifecycleState::Installing)?;

    if let Some(store) = &self.store {
      let request = HttpRequest::get(self.resolve(&self.options.shell_path)?);
      match self.transport.send(&request).await {
        Ok(response) if response.is_success() => {
          self.store_response(store, &request, &response);
        }
        Ok(response) => warn!(status = response.status, "shell precache rejected"),
        Err(e) => warn!(error = %e, "shell precache failed, continuing without it"),
      }
    }

    self.transition(LifecycleState::Installing, LifecycleState::Installed)
  }

  /// Delete response caches from other versions and claim control.
  /// Returns the number of stale cached responses removed.
  pub async fn activate(&self) -> SyncResult<usize> {
    self.transition(LifecycleState::Installed, LifecycleState::Activating)?;

    let purged = match &self.store {
      Some(store) => self.purge_stale_caches(store)?,
      None => 0,
    };

    self.transition(LifecycleState::Activating, LifecycleState::Activated)?;
    self.controlling.store(true, Ordering::Release);
    info!(version = %self.options.cache_version, purged, "interceptor activated");
    Ok(purged)
  }

  /// Install and activate in one step.
  pub async fn start(&self) -> SyncResult<()> {
    self.install().await?;
    self.activate().await?;
    Ok(())
  }

  fn purge_stale_caches(&self, store: &Store) -> SyncResult<usize> {
    let current = self.cache_prefix();
    let mut purged = 0;
    for key in store.keys_with_prefix(Collection::Cache, RESPONSE_CACHE_PREFIX)? {
      if !key.starts_with(current.as_str()) && store.delete(Collection::Cache, &key)? {
        purged += 1;
      }
    }
    Ok(purged)
  }

  /// Send a request through the strategy its route selects.
  pub async fn fetch(&self, request: HttpRequest) -> SyncResult<HttpResponse> {
    let store = match &self.store {
      Some(store) if self.is_controlling() && !request.no_cache => store,
      _ => return self.transport.send(&request).await,
    };

    let strategy = self.strategy_for(&request);
    trace!(method = %request.method, url = %request.url, strategy = %strategy, "intercepting");

    match strategy {
      Strategy::NetworkOnly => self.transport.send(&request).await,
      Strategy::CacheFirst => Ok(self.cache_first(store, &request).await),
      Strategy::NetworkFirst => Ok(self.network_first(store, &request).await),
      Strategy::StaleWhileRevalidate => Ok(self.stale_while_revalidate(store, &request).await),
    }
  }

  pub fn strategy_for(&self, request: &HttpRequest) -> Strategy {
    self
      .routes
      .classify(&request.method, &self.relative_path(&request.url))
  }

  async fn cache_first(&self, store: &Store, request: &HttpRequest) -> HttpResponse {
    if let Some(cached) = self.lookup(store, request) {
      return cached;
    }

    match self.transport.send(request).await {
      Ok(response) => {
        self.store_response(store, request, &response);
        response
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "cache miss while unreachable");
        HttpResponse::service_unavailable(&request.url)
      }
    }
  }

  async fn network_first(&self, store: &Store, request: &HttpRequest) -> HttpResponse {
    match self.transport.send(request).await {
      Ok(response) => {
        self.store_response(store, request, &response);
        response
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "network failed, falling back to cache");
        self
          .lookup(store, request)
          .unwrap_or_else(|| self.offline_fallback(store, request))
      }
    }
  }

  async fn stale_while_revalidate(&self, store: &Store, request: &HttpRequest) -> HttpResponse {
    if let Some(cached) = self.lookup(store, request) {
      let transport = Arc::clone(&self.transport);
      let store = store.clone();
      let request = request.clone();
      let key = self.cache_key(&request);
      let ttl = self.options.response_ttl;
      tokio::spawn(async move {
        match transport.send(&request).await {
          Ok(response) if response.is_success() => {
            if let Err(e) = store.cache_set(&key, &response, ttl) {
              warn!(url = %request.url, error = %e, "failed to store revalidated response");
            }
          }
          Ok(_) => {}
          Err(e) => trace!(url = %request.url, error = %e, "background revalidation failed"),
        }
      });
      return cached;
    }

    match self.transport.send(request).await {
      Ok(response) => {
        self.store_response(store, request, &response);
        response
      }
      Err(_) => self.offline_fallback(store, request),
    }
  }

  /// Shell page for navigations, structured offline error otherwise.
  fn offline_fallback(&self, store: &Store, request: &HttpRequest) -> HttpResponse {
    if request.navigational {
      let shell = self
        .resolve(&self.options.shell_path)
        .ok()
        .and_then(|url| self.lookup(store, &HttpRequest::get(url)));
      return shell.unwrap_or_else(HttpResponse::offline_page);
    }
    HttpResponse::service_unavailable(&request.url)
  }

  /// Re-fetch read-mostly resources into the response cache, concurrently.
  pub async fn refresh_read_mostly(&self) -> RefreshReport {
    let mut report = RefreshReport::default();
    let Some(store) = &self.store else {
      return report;
    };

    let fetches = self.options.read_mostly.iter().map(|path| async move {
      let request = match self.resolve(path) {
        Ok(url) => HttpRequest::get(url),
        Err(e) => {
          warn!(path = %path, error = %e, "skipping unresolvable refresh path");
          return false;
        }
      };
      match self.transport.send(&request).await {
        Ok(response) if response.is_success() => {
          self.store_response(store, &request, &response);
          true
        }
        Ok(response) => {
          debug!(path = %path, status = response.status, "refresh rejected");
          false
        }
        Err(e) => {
          debug!(path = %path, error = %e, "refresh failed");
          false
        }
      }
    });

    for refreshed in join_all(fetches).await {
      if refreshed {
        report.refreshed += 1;
      } else {
        report.failed += 1;
      }
    }
    report
  }

  /// Whether the service answers at all.
  pub async fn probe(&self) -> bool {
    self
      .transport
      .send(&HttpRequest::get(self.base_url.clone()))
      .await
      .is_ok()
  }

  /// Resolve a service-relative path against the base URL.
  pub fn resolve(&self, path: &str) -> SyncResult<Url> {
    self
      .base_url
      .join(path.trim_start_matches('/'))
      .map_err(|e| SyncError::InvalidState(format!("invalid path '{}': {}", path, e)))
  }

  fn relative_path(&self, url: &Url) -> String {
    let base = self.base_url.path().trim_end_matches('/');
    let path = url.path().strip_prefix(base).unwrap_or(url.path());
    if path.starts_with('/') {
      path.to_string()
    } else {
      format!("/{}", path)
    }
  }

  fn cache_prefix(&self) -> String {
    format!("{}{}:", RESPONSE_CACHE_PREFIX, self.options.cache_version)
  }

  /// SHA256 of method and URL for stable, fixed-length keys.
  fn cache_key(&self, request: &HttpRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.method.as_str().as_bytes());
    hasher.update(b" ");
    hasher.update(request.url.as_str().as_bytes());
    format!("{}{}", self.cache_prefix(), hex::encode(hasher.finalize()))
  }

  fn lookup(&self, store: &Store, request: &HttpRequest) -> Option<HttpResponse> {
    match store.cache_get_value::<HttpResponse>(&self.cache_key(request)) {
      Ok(found) => found.map(|response| response.with_header(SOURCE_HEADER, "cache")),
      Err(e) => {
        warn!(url = %request.url, error = %e, "response cache read failed");
        None
      }
    }
  }

  fn store_response(&self, store: &Store, request: &HttpRequest, response: &HttpResponse) {
    if !response.is_success() {
      return;
    }
    if let Err(e) = store.cache_set(&self.cache_key(request), response, self.options.response_ttl) {
      warn!(url = %request.url, error = %e, "response cache write failed");
    }
  }
}

fn with_trailing_slash(mut url: Url) -> Url {
  if !url.path().ends_with('/') {
    let path = format!("{}/", url.path());
    url.set_path(&path);
  }
  url
}
