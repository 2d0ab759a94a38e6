//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use syncvault::events::{EventBus, EventKind, SyncEvent};
use syncvault::orchestrator::{Orchestrator, OrchestratorOptions};
use syncvault::remote::{Credentials, ExecuteRequest, ExecuteResponse, RemoteService, Session};
use syncvault::store::{CatalogEntry, OperationRecord, RecordStatus, Store};
use syncvault::{Connectivity, SyncError, SyncResult};

/// In-memory remote service whose reachability can be switched off.
pub struct FakeRemote {
  up: AtomicBool,
  calls: AtomicUsize,
  next_id: AtomicU64,
  catalog: Mutex<Vec<CatalogEntry>>,
  records: Mutex<BTreeMap<String, OperationRecord>>,
  reject_execute: Mutex<Option<(u16, String)>>,
}

impl FakeRemote {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      up: AtomicBool::new(true),
      calls: AtomicUsize::new(0),
      next_id: AtomicU64::new(1),
      catalog: Mutex::new(Vec::new()),
      records: Mutex::new(BTreeMap::new()),
      reject_execute: Mutex::new(None),
    })
  }

  pub fn set_up(&self, up: bool) {
    self.up.store(up, Ordering::SeqCst);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn add_catalog(&self, entry: CatalogEntry) {
    self.catalog.lock().unwrap().push(entry);
  }

  pub fn add_record(&self, record: OperationRecord) {
    self.records.lock().unwrap().insert(record.id.clone(), record);
  }

  pub fn remote_record(&self, id: &str) -> Option<OperationRecord> {
    self.records.lock().unwrap().get(id).cloned()
  }

  pub fn reject_executions(&self, status: u16, message: &str) {
    *self.reject_execute.lock().unwrap() = Some((status, message.to_string()));
  }

  fn gate(&self) -> SyncResult<()> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    if self.up.load(Ordering::SeqCst) {
      Ok(())
    } else {
      Err(SyncError::Connectivity("simulated outage".into()))
    }
  }

  fn not_found(what: &str) -> SyncError {
    SyncError::RemoteRejection {
      status: 404,
      message: format!("{} not found", what),
    }
  }
}

#[async_trait]
impl RemoteService for FakeRemote {
  async fn list_catalog(&self) -> SyncResult<Vec<CatalogEntry>> {
    self.gate()?;
    Ok(self.catalog.lock().unwrap().clone())
  }

  async fn get_catalog_entry(&self, name: &str) -> SyncResult<CatalogEntry> {
    self.gate()?;
    self
      .catalog
      .lock()
      .unwrap()
      .iter()
      .find(|e| e.name == name)
      .cloned()
      .ok_or_else(|| Self::not_found(name))
  }

  async fn list_records(&self) -> SyncResult<Vec<OperationRecord>> {
    self.gate()?;
    Ok(self.records.lock().unwrap().values().cloned().collect())
  }

  async fn get_record(&self, id: &str) -> SyncResult<OperationRecord> {
    self.gate()?;
    self.remote_record(id).ok_or_else(|| Self::not_found(id))
  }

  async fn execute(&self, request: &ExecuteRequest) -> SyncResult<ExecuteResponse> {
    self.gate()?;
    if let Some((status, message)) = self.reject_execute.lock().unwrap().clone() {
      return Err(SyncError::RemoteRejection { status, message });
    }
    let id = format!("op-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
    let response = ExecuteResponse {
      id,
      status: RecordStatus::Running,
      result: None,
    };
    self.add_record(response.clone().into_record(request));
    Ok(response)
  }

  async fn update_record(&self, id: &str, patch: &Value) -> SyncResult<OperationRecord> {
    self.gate()?;
    let mut records = self.records.lock().unwrap();
    let record = records.get(id).ok_or_else(|| Self::not_found(id))?;
    let mut value = serde_json::to_value(record)?;
    if let (Value::Object(target), Value::Object(fields)) = (&mut value, patch) {
      for (key, field) in fields {
        target.insert(key.clone(), field.clone());
      }
    }
    let updated: OperationRecord = serde_json::from_value(value)?;
    records.insert(id.to_string(), updated.clone());
    Ok(updated)
  }

  async fn delete_record(&self, id: &str) -> SyncResult<()> {
    self.gate()?;
    self
      .records
      .lock()
      .unwrap()
      .remove(id)
      .map(|_| ())
      .ok_or_else(|| Self::not_found(id))
  }

  async fn login(&self, credentials: &Credentials) -> SyncResult<Session> {
    self.gate()?;
    if credentials.password == "secret" {
      Ok(Session {
        token: format!("token-for-{}", credentials.username),
        expires_at: None,
      })
    } else {
      Err(SyncError::Unauthorized("bad credentials".into()))
    }
  }
}

pub fn record(id: &str, status: &str) -> OperationRecord {
  serde_json::from_value(serde_json::json!({ "id": id, "status": status })).unwrap()
}

pub struct Harness {
  pub remote: Arc<FakeRemote>,
  pub store: Store,
  pub events: EventBus,
  pub connectivity: Connectivity,
  pub orchestrator: Orchestrator,
}

impl Harness {
  pub fn new() -> Self {
    Self::with_options(OrchestratorOptions::default())
  }

  pub fn with_options(options: OrchestratorOptions) -> Self {
    let remote = FakeRemote::new();
    let store = Store::open_in_memory().unwrap();
    let events = EventBus::new();
    let connectivity = Connectivity::new(true);
    let orchestrator = Orchestrator::new(
      remote.clone(),
      Ok(store.clone()),
      events.clone(),
      connectivity.clone(),
      options,
    );
    Self {
      remote,
      store,
      events,
      connectivity,
      orchestrator,
    }
  }

  /// Collect every event of `kind` emitted from now on.
  pub fn record_events(&self, kind: EventKind) -> Arc<Mutex<Vec<SyncEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    self.events.on(kind, move |event| sink.lock().unwrap().push(event.clone()));
    seen
  }
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
  for _ in 0..200 {
    if condition() {
      return true;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  false
}
