//! The orchestrator: reads with a selectable consistency strategy, writes that
//! queue themselves when the service cannot be reached.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::types::{
  CleanupReport, EngineStats, OrchestratorOptions, ReadOutcome, ReadStrategy, SyncReport,
  WriteOutcome, WriteRequest,
};
use crate::connectivity::Connectivity;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventBus, EventKind, ListenerId, SyncEvent};
use crate::queue::{
  DeletePayload, EnqueueOptions, ExecutePayload, OfflineQueue, QueueItemKind, RemoteProcessor,
  UpdatePayload,
};
use crate::reconcile::{self, Resource};
use crate::remote::{Credentials, ExecuteRequest, RemoteService, Session};
use crate::store::{CacheEntry, CatalogEntry, Entity, OperationRecord, Store};

/// Single entry point for host code.
///
/// Holds the store, the offline queue and the remote service. When the store
/// could not be opened it runs degraded: every read goes to the network and
/// writes cannot be deferred.
#[derive(Clone)]
pub struct Orchestrator {
  remote: Arc<dyn RemoteService>,
  store: Option<Store>,
  queue: Option<OfflineQueue>,
  events: EventBus,
  connectivity: Connectivity,
  stale_time: Duration,
  enqueue_options: EnqueueOptions,
  degraded_reason: Option<String>,
  /// One flag per [`Resource`], set while a background refresh runs
  refreshing: Arc<[AtomicBool; 2]>,
  syncing: Arc<AtomicBool>,
}

/// Clears a running flag when dropped.
struct FlagGuard<'a>(&'a AtomicBool);

impl Drop for FlagGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

fn slot(resource: Resource) -> usize {
  match resource {
    Resource::Catalog => 0,
    Resource::Records => 1,
  }
}

impl Orchestrator {
  pub fn new(
    remote: Arc<dyn RemoteService>,
    store: SyncResult<Store>,
    events: EventBus,
    connectivity: Connectivity,
    options: OrchestratorOptions,
  ) -> Self {
    let (store, degraded_reason) = match store {
      Ok(store) => (Some(store), None),
      Err(e) => {
        warn!(error = %e, "local store unavailable, running network-only");
        events.emit(SyncEvent::StorageUnavailable {
          reason: e.to_string(),
        });
        (None, Some(e.to_string()))
      }
    };

    let queue = store.as_ref().map(|store| {
      let mut processor = RemoteProcessor::new(Arc::clone(&remote), store.clone(), events.clone());
      for (name, handler) in &options.custom_handlers {
        processor = processor.with_custom_handler(name.clone(), Arc::clone(handler));
      }
      OfflineQueue::new(
        store.clone(),
        events.clone(),
        Arc::new(processor),
        connectivity.clone(),
      )
    });

    if let Some(queue) = &queue {
      if let Err(e) = queue.recover_interrupted() {
        warn!(error = %e, "could not recover interrupted queue items");
      }
    }

    Self {
      remote,
      store,
      queue,
      events,
      connectivity,
      stale_time: options.stale_time,
      enqueue_options: options.enqueue,
      degraded_reason,
      refreshing: Arc::new([AtomicBool::new(false), AtomicBool::new(false)]),
      syncing: Arc::new(AtomicBool::new(false)),
    }
  }

  pub fn store(&self) -> Option<&Store> {
    self.store.as_ref()
  }

  pub fn queue(&self) -> Option<&OfflineQueue> {
    self.queue.as_ref()
  }

  pub fn events(&self) -> &EventBus {
    &self.events
  }

  pub fn connectivity(&self) -> &Connectivity {
    &self.connectivity
  }

  pub fn is_degraded(&self) -> bool {
    self.store.is_none()
  }

  fn require_store(&self) -> SyncResult<&Store> {
    self.store.as_ref().ok_or_else(|| {
      warn!("store unavailable, local-only operation refused");
      SyncError::StorageUnavailable(
        self
          .degraded_reason
          .clone()
          .unwrap_or_else(|| "store not opened".to_string()),
      )
    })
  }

  fn require_queue(&self) -> SyncResult<&OfflineQueue> {
    self.require_store()?;
    self
      .queue
      .as_ref()
      .ok_or_else(|| SyncError::StorageUnavailable("queue not available".to_string()))
  }

  fn is_fresh(&self, cached_at: Option<DateTime<Utc>>) -> bool {
    cached_at.is_some_and(|at| Utc::now() - at <= self.stale_time)
  }

  fn set_online(&self, online: bool) {
    if self.connectivity.set_online(online) {
      info!(online, "connectivity changed");
      self.events.emit(SyncEvent::ConnectivityChanged { online });
    }
  }

  /// Track reachability from the outcome of a remote call.
  fn observe<T>(&self, result: SyncResult<T>) -> SyncResult<T> {
    match &result {
      Ok(_) => self.set_online(true),
      Err(e) if e.is_connectivity() => self.set_online(false),
      Err(_) => {}
    }
    result
  }

  // ==========================================================================
  // Reads
  // ==========================================================================

  /// Read a resource list (`id == None`) or a single entity, as JSON.
  pub async fn read(
    &self,
    resource: Resource,
    id: Option<&str>,
    strategy: ReadStrategy,
  ) -> SyncResult<ReadOutcome<Value>> {
    match (resource, id) {
      (Resource::Catalog, None) => into_value(self.catalog(strategy).await?),
      (Resource::Catalog, Some(name)) => into_value(self.catalog_entry(name, strategy).await?),
      (Resource::Records, None) => into_value(self.records(strategy).await?),
      (Resource::Records, Some(id)) => into_value(self.record(id, strategy).await?),
    }
  }

  pub async fn catalog(&self, strategy: ReadStrategy) -> SyncResult<ReadOutcome<Vec<CatalogEntry>>> {
    let remote = Arc::clone(&self.remote);
    self
      .read_list(Resource::Catalog, strategy, |store| async move {
        match store {
          Some(store) => reconcile::refresh_catalog(remote.as_ref(), &store).await,
          None => remote.list_catalog().await,
        }
      })
      .await
  }

  pub async fn catalog_entry(
    &self,
    name: &str,
    strategy: ReadStrategy,
  ) -> SyncResult<ReadOutcome<Option<CatalogEntry>>> {
    let remote = Arc::clone(&self.remote);
    let key = name.to_string();
    self
      .read_one(Resource::Catalog, name, strategy, |store| async move {
        match store {
          Some(store) => reconcile::refresh_catalog_entry(remote.as_ref(), &store, &key).await,
          None => remote.get_catalog_entry(&key).await,
        }
      })
      .await
  }

  pub async fn records(
    &self,
    strategy: ReadStrategy,
  ) -> SyncResult<ReadOutcome<Vec<OperationRecord>>> {
    let remote = Arc::clone(&self.remote);
    self
      .read_list(Resource::Records, strategy, |store| async move {
        match store {
          Some(store) => reconcile::refresh_records(remote.as_ref(), &store).await,
          None => remote.list_records().await,
        }
      })
      .await
  }

  pub async fn record(
    &self,
    id: &str,
    strategy: ReadStrategy,
  ) -> SyncResult<ReadOutcome<Option<OperationRecord>>> {
    let remote = Arc::clone(&self.remote);
    let key = id.to_string();
    self
      .read_one(Resource::Records, id, strategy, |store| async move {
        match store {
          Some(store) => reconcile::refresh_record(remote.as_ref(), &store, &key).await,
          None => remote.get_record(&key).await,
        }
      })
      .await
  }

  /// Records with the given status, straight from the store.
  pub fn records_by_status(&self, status: &str) -> SyncResult<Vec<OperationRecord>> {
    self.require_store()?.get_all_by_index("status", status)
  }

  /// Catalog entries in a category, straight from the store.
  pub fn catalog_by_category(&self, category: &str) -> SyncResult<Vec<CatalogEntry>> {
    self.require_store()?.get_all_by_index("category", category)
  }

  /// Shared list read. `fetch` gets the store to reconcile into, or `None`
  /// when the result must not be written locally.
  async fn read_list<T, F, Fut>(
    &self,
    resource: Resource,
    strategy: ReadStrategy,
    fetch: F,
  ) -> SyncResult<ReadOutcome<Vec<T>>>
  where
    T: Entity,
    F: FnOnce(Option<Store>) -> Fut,
    Fut: Future<Output = SyncResult<Vec<T>>>,
  {
    let Some(store) = &self.store else {
      warn!(%resource, %strategy, "store unavailable, reading from network only");
      return self.degraded_read(strategy, fetch(None).await, Vec::new());
    };

    match strategy {
      ReadStrategy::NetworkOnly => Ok(ReadOutcome::from_network(self.observe(fetch(None).await)?)),
      ReadStrategy::CacheOnly => {
        let local: Vec<T> = store.get_all()?;
        if local.is_empty() {
          return Ok(ReadOutcome::unavailable(local));
        }
        let cached_at = store.last_stored_at(T::collection())?;
        Ok(ReadOutcome::from_cache(local, cached_at, self.is_fresh(cached_at)))
      }
      ReadStrategy::CacheFirst => {
        let local: Vec<T> = store.get_all()?;
        if !local.is_empty() {
          let cached_at = store.last_stored_at(T::collection())?;
          if self.connectivity.is_online() {
            self.spawn_refresh(store, resource);
          }
          return Ok(ReadOutcome::from_cache(local, cached_at, self.is_fresh(cached_at)));
        }
        match self.observe(fetch(Some(store.clone())).await) {
          Ok(data) => Ok(ReadOutcome::from_network(data)),
          Err(e) if e.is_connectivity() => {
            debug!(%resource, error = %e, "nothing cached and network unreachable");
            Ok(ReadOutcome::unavailable(Vec::new()))
          }
          Err(e) => Err(e),
        }
      }
      ReadStrategy::NetworkFirst => match self.observe(fetch(Some(store.clone())).await) {
        Ok(data) => Ok(ReadOutcome::from_network(data)),
        Err(e) if e.is_connectivity() => {
          debug!(%resource, error = %e, "network unreachable, falling back to store");
          let local: Vec<T> = store.get_all()?;
          if local.is_empty() {
            return Ok(ReadOutcome::unavailable(local));
          }
          let cached_at = store.last_stored_at(T::collection())?;
          Ok(ReadOutcome::offline(local, cached_at))
        }
        Err(e) => Err(e),
      },
    }
  }

  async fn read_one<T, F, Fut>(
    &self,
    resource: Resource,
    key: &str,
    strategy: ReadStrategy,
    fetch: F,
  ) -> SyncResult<ReadOutcome<Option<T>>>
  where
    T: Entity,
    F: FnOnce(Option<Store>) -> Fut,
    Fut: Future<Output = SyncResult<T>>,
  {
    let Some(store) = &self.store else {
      warn!(%resource, key, %strategy, "store unavailable, reading from network only");
      return self.degraded_read(strategy, fetch(None).await.map(Some), None);
    };

    match strategy {
      ReadStrategy::NetworkOnly => Ok(ReadOutcome::from_network(Some(
        self.observe(fetch(None).await)?,
      ))),
      ReadStrategy::CacheOnly => match store.get_cached::<T>(key)? {
        Some(cached) => Ok(ReadOutcome::from_cache(
          Some(cached.entity),
          Some(cached.stored_at),
          self.is_fresh(Some(cached.stored_at)),
        )),
        None => Ok(ReadOutcome::unavailable(None)),
      },
      ReadStrategy::CacheFirst => {
        if let Some(cached) = store.get_cached::<T>(key)? {
          if self.connectivity.is_online() {
            self.spawn_refresh(store, resource);
          }
          return Ok(ReadOutcome::from_cache(
            Some(cached.entity),
            Some(cached.stored_at),
            self.is_fresh(Some(cached.stored_at)),
          ));
        }
        match self.observe(fetch(Some(store.clone())).await) {
          Ok(data) => Ok(ReadOutcome::from_network(Some(data))),
          Err(e) if e.is_connectivity() => Ok(ReadOutcome::unavailable(None)),
          Err(e) => Err(e),
        }
      }
      ReadStrategy::NetworkFirst => match self.observe(fetch(Some(store.clone())).await) {
        Ok(data) => Ok(ReadOutcome::from_network(Some(data))),
        Err(e) if e.is_connectivity() => match store.get_cached::<T>(key)? {
          Some(cached) => Ok(ReadOutcome::offline(Some(cached.entity), Some(cached.stored_at))),
          None => Ok(ReadOutcome::unavailable(None)),
        },
        Err(e) => Err(e),
      },
    }
  }

  /// Without a store only network-only reads surface connectivity errors.
  fn degraded_read<T>(
    &self,
    strategy: ReadStrategy,
    result: SyncResult<T>,
    empty: T,
  ) -> SyncResult<ReadOutcome<T>> {
    match self.observe(result) {
      Ok(data) => Ok(ReadOutcome::from_network(data)),
      Err(e) if e.is_connectivity() && strategy != ReadStrategy::NetworkOnly => {
        Ok(ReadOutcome::unavailable(empty))
      }
      Err(e) => Err(e),
    }
  }

  /// Refresh a resource in the background. A refresh already running for
  /// the same resource absorbs this request.
  fn spawn_refresh(&self, store: &Store, resource: Resource) {
    let index = slot(resource);
    if self.refreshing[index].swap(true, Ordering::AcqRel) {
      debug!(%resource, "refresh already in flight");
      return;
    }

    let remote = Arc::clone(&self.remote);
    let store = store.clone();
    let this = self.clone();
    tokio::spawn(async move {
      let result = reconcile::refresh(remote.as_ref(), &store, resource).await;
      this.refreshing[index].store(false, Ordering::Release);
      match this.observe(result) {
        Ok(()) => {
          debug!(%resource, "background refresh finished");
          this.events.emit(SyncEvent::DataUpdated {
            resource: resource.to_string(),
          });
        }
        Err(e) => {
          warn!(%resource, error = %e, "background refresh failed");
          this.events.emit(SyncEvent::RefreshFailed {
            resource: resource.to_string(),
            error: e.to_string(),
          });
        }
      }
    });
  }

  // ==========================================================================
  // Writes
  // ==========================================================================

  /// Execute a write now, or queue it if the service cannot be reached.
  ///
  /// Rejections and auth errors are returned as errors and never queued.
  pub async fn write(&self, request: WriteRequest) -> SyncResult<WriteOutcome> {
    self.write_with(request, self.enqueue_options).await
  }

  pub async fn write_with(
    &self,
    request: WriteRequest,
    options: EnqueueOptions,
  ) -> SyncResult<WriteOutcome> {
    let Some(queue) = &self.queue else {
      warn!("store unavailable, write cannot be deferred");
      return self.write_remote(&request).await;
    };

    if !self.connectivity.is_online() {
      debug!("offline, deferring write");
      return self.defer(queue, &request, options).await;
    }

    match self.write_remote(&request).await {
      Ok(outcome) => Ok(outcome),
      Err(e) if e.is_connectivity() => {
        info!(error = %e, "service unreachable, deferring write");
        self.defer(queue, &request, options).await
      }
      Err(e) => Err(e),
    }
  }

  async fn write_remote(&self, request: &WriteRequest) -> SyncResult<WriteOutcome> {
    let id = match request {
      WriteRequest::Execute { name, parameters } => {
        let execute = ExecuteRequest {
          name: name.clone(),
          parameters: parameters.clone(),
        };
        let response = self.observe(self.remote.execute(&execute).await)?;
        match &self.store {
          Some(store) => reconcile::apply_execute_result(store, &execute, response)?.id,
          None => response.id,
        }
      }
      WriteRequest::UpdateRecord { id, patch } => {
        let record = self.observe(self.remote.update_record(id, patch).await)?;
        if let Some(store) = &self.store {
          store.put(&record)?;
        }
        record.id
      }
      WriteRequest::DeleteRecord { id } => {
        self.observe(self.remote.delete_record(id).await)?;
        if let Some(store) = &self.store {
          reconcile::delete_locally(store, id)?;
        }
        id.clone()
      }
    };

    self.events.emit(SyncEvent::DataUpdated {
      resource: Resource::Records.to_string(),
    });
    Ok(WriteOutcome::executed(id))
  }

  async fn defer(
    &self,
    queue: &OfflineQueue,
    request: &WriteRequest,
    options: EnqueueOptions,
  ) -> SyncResult<WriteOutcome> {
    let (kind, payload) = match request {
      WriteRequest::Execute { name, parameters } => (
        QueueItemKind::ExecuteOperation,
        serde_json::to_value(ExecutePayload {
          name: name.clone(),
          parameters: parameters.clone(),
        })?,
      ),
      WriteRequest::UpdateRecord { id, patch } => (
        QueueItemKind::UpdateRecord,
        serde_json::to_value(UpdatePayload {
          id: id.clone(),
          patch: patch.clone(),
        })?,
      ),
      WriteRequest::DeleteRecord { id } => (
        QueueItemKind::DeleteRecord,
        serde_json::to_value(DeletePayload { id: id.clone() })?,
      ),
    };

    let queue_id = queue.enqueue(kind, payload, options).await?;
    self.apply_optimistically(request);
    Ok(WriteOutcome::queued(queue_id))
  }

  /// Mirror a deferred update or delete in the store right away.
  fn apply_optimistically(&self, request: &WriteRequest) {
    let Some(store) = &self.store else {
      return;
    };
    let result = match request {
      // The service assigns the record id, so nothing to mirror yet.
      WriteRequest::Execute { .. } => return,
      WriteRequest::UpdateRecord { id, patch } => {
        reconcile::apply_patch_locally(store, id, patch).map(|_| ())
      }
      WriteRequest::DeleteRecord { id } => reconcile::delete_locally(store, id).map(|_| ()),
    };
    match result {
      Ok(()) => self.events.emit(SyncEvent::DataUpdated {
        resource: Resource::Records.to_string(),
      }),
      Err(e) => warn!(error = %e, "optimistic local update failed"),
    }
  }

  /// Queue an arbitrary item, e.g. a `custom` item for a registered handler.
  pub async fn enqueue(
    &self,
    kind: QueueItemKind,
    payload: Value,
    options: EnqueueOptions,
  ) -> SyncResult<String> {
    self.require_queue()?.enqueue(kind, payload, options).await
  }

  /// Authenticate. Never queued; fails at once when offline.
  pub async fn login(&self, credentials: &Credentials) -> SyncResult<Session> {
    if !self.connectivity.is_online() {
      return Err(SyncError::Connectivity(
        "offline; login cannot be deferred".to_string(),
      ));
    }
    self.observe(self.remote.login(credentials).await)
  }

  // ==========================================================================
  // Sync and maintenance
  // ==========================================================================

  /// Refetch the catalog and records, then drain the queue.
  ///
  /// Refresh and drain failures are reported through events and the returned
  /// report. A call made while another sync runs does nothing.
  pub async fn force_sync(&self) -> SyncResult<SyncReport> {
    if self
      .syncing
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      info!("sync already running, ignoring request");
      return Ok(SyncReport {
        skipped: true,
        ..SyncReport::default()
      });
    }
    let _guard = FlagGuard(&self.syncing);

    if self.is_degraded() {
      warn!("store unavailable, nothing to sync");
      return Ok(SyncReport::default());
    }

    let mut report = self.refresh_resources().await;

    if let Some(queue) = &self.queue {
      match queue.drain().await {
        Ok(drain) => report.drain = Some(drain),
        Err(e) => {
          warn!(error = %e, "drain failed during sync");
          report.drain_error = Some(e.to_string());
        }
      }
    }

    info!(
      refreshed = report.refreshed.len(),
      failed = report.failed.len(),
      "sync finished"
    );
    Ok(report)
  }

  /// Refetch every read-mostly resource into the store. Emits `DataUpdated`
  /// or `RefreshFailed` per resource; the report carries no drain.
  pub async fn refresh_resources(&self) -> SyncReport {
    let mut report = SyncReport::default();
    let Some(store) = &self.store else {
      warn!("store unavailable, nothing to refresh");
      return report;
    };

    for resource in Resource::ALL {
      match self.observe(reconcile::refresh(self.remote.as_ref(), store, resource).await) {
        Ok(()) => {
          report.refreshed.push(resource);
          self.events.emit(SyncEvent::DataUpdated {
            resource: resource.to_string(),
          });
        }
        Err(e) => {
          warn!(%resource, error = %e, "resource refresh failed");
          report.failed.push(resource);
          self.events.emit(SyncEvent::RefreshFailed {
            resource: resource.to_string(),
            error: e.to_string(),
          });
        }
      }
    }
    report
  }

  pub fn get_stats(&self) -> SyncResult<EngineStats> {
    Ok(EngineStats {
      stores: self.store.as_ref().map(Store::stats).transpose()?,
      queue: self.queue.as_ref().map(OfflineQueue::get_stats).transpose()?,
      online: self.connectivity.is_online(),
      degraded: self.is_degraded(),
      syncing: self.syncing.load(Ordering::Acquire),
    })
  }

  /// Purge expired cache entries and finished queue items.
  pub fn cleanup(&self, before: Option<DateTime<Utc>>) -> SyncResult<CleanupReport> {
    let store = self.require_store()?;
    let expired_cache = store.cleanup_expired()?;
    let queue_items = match &self.queue {
      Some(queue) => queue.cleanup(before)?,
      None => 0,
    };
    Ok(CleanupReport {
      expired_cache,
      queue_items,
    })
  }

  pub fn on<F>(&self, kind: EventKind, handler: F) -> ListenerId
  where
    F: Fn(&SyncEvent) + Send + Sync + 'static,
  {
    self.events.on(kind, handler)
  }

  pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
    self.events.off(kind, id)
  }

  // ==========================================================================
  // Preferences and generic cache
  // ==========================================================================

  pub fn get_preference<T: DeserializeOwned>(&self, key: &str) -> SyncResult<Option<T>> {
    self.require_store()?.get_preference(key)
  }

  pub fn set_preference<T: Serialize>(&self, key: &str, value: &T) -> SyncResult<()> {
    self.require_store()?.set_preference(key, value)
  }

  pub fn delete_preference(&self, key: &str) -> SyncResult<bool> {
    self.require_store()?.delete_preference(key)
  }

  pub fn cache_get<T: DeserializeOwned>(&self, key: &str) -> SyncResult<Option<T>> {
    self.require_store()?.cache_get_value(key)
  }

  pub fn cache_set<V: Serialize>(
    &self,
    key: &str,
    value: &V,
    ttl: Option<Duration>,
  ) -> SyncResult<CacheEntry> {
    self.require_store()?.cache_set(key, value, ttl)
  }

  pub fn cache_delete(&self, key: &str) -> SyncResult<bool> {
    self.require_store()?.cache_delete(key)
  }
}

fn into_value<T: Serialize>(outcome: ReadOutcome<T>) -> SyncResult<ReadOutcome<Value>> {
  let data = serde_json::to_value(&outcome.data)?;
  Ok(outcome.map(|_| data))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::remote::ExecuteResponse;
  use async_trait::async_trait;
  use std::sync::Mutex;

  struct UnreachableRemote;

  fn down<T>() -> SyncResult<T> {
    Err(SyncError::Connectivity("unreachable".into()))
  }

  #[async_trait]
  impl RemoteService for UnreachableRemote {
    async fn list_catalog(&self) -> SyncResult<Vec<CatalogEntry>> {
      down()
    }
    async fn get_catalog_entry(&self, _name: &str) -> SyncResult<CatalogEntry> {
      down()
    }
    async fn list_records(&self) -> SyncResult<Vec<OperationRecord>> {
      down()
    }
    async fn get_record(&self, _id: &str) -> SyncResult<OperationRecord> {
      down()
    }
    async fn execute(&self, _request: &ExecuteRequest) -> SyncResult<ExecuteResponse> {
      down()
    }
    async fn update_record(&self, _id: &str, _patch: &Value) -> SyncResult<OperationRecord> {
      down()
    }
    async fn delete_record(&self, _id: &str) -> SyncResult<()> {
      down()
    }
    async fn login(&self, _credentials: &Credentials) -> SyncResult<Session> {
      down()
    }
  }

  #[tokio::test]
  async fn test_drain_error_is_reported_not_returned() {
    let store = Store::open_in_memory().unwrap();
    let events = EventBus::new();
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    events.on(EventKind::SyncFailed, move |event| {
      if let SyncEvent::SyncFailed { error } = event {
        sink.lock().unwrap().push(error.clone());
      }
    });

    let orchestrator = Orchestrator::new(
      Arc::new(UnreachableRemote),
      Ok(store.clone()),
      events,
      Connectivity::new(true),
      OrchestratorOptions::default(),
    );
    store.execute_batch("DROP TABLE queue").unwrap();

    let report = orchestrator.force_sync().await.unwrap();
    assert!(report.drain.is_none());
    assert!(report
      .drain_error
      .as_deref()
      .is_some_and(|e| e.contains("no such table")));
    assert_eq!(report.failed, Resource::ALL.to_vec());
    assert!(report.refreshed.is_empty());
    assert_eq!(errors.lock().unwrap().len(), 1);
    assert!(!orchestrator.connectivity().is_online());
  }

  #[tokio::test]
  async fn test_refresh_resources_without_store_is_empty() {
    let orchestrator = Orchestrator::new(
      Arc::new(UnreachableRemote),
      Err(SyncError::StorageUnavailable("disk full".into())),
      EventBus::new(),
      Connectivity::new(true),
      OrchestratorOptions::default(),
    );
    let report = orchestrator.refresh_resources().await;
    assert!(report.refreshed.is_empty());
    assert!(report.failed.is_empty());
    assert!(orchestrator.connectivity().is_online());
  }
}
