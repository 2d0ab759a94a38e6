//! Replay handlers for queued writes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::types::{
  CustomPayload, DeletePayload, ExecutePayload, QueueItem, QueueItemKind, RefreshPayload,
  UpdatePayload,
};
use crate::error::{SyncError, SyncResult};
use crate::events::{EventBus, SyncEvent};
use crate::reconcile::{self, Resource};
use crate::remote::{ExecuteRequest, RemoteService};
use crate::store::Store;

/// Executes one queue item. Called strictly one item at a time.
#[async_trait]
pub trait QueueProcessor: Send + Sync {
  async fn process(&self, item: &QueueItem) -> SyncResult<()>;
}

/// Handler for `custom` items, looked up by the payload's handler name.
#[async_trait]
pub trait CustomHandler: Send + Sync {
  async fn handle(&self, data: &Value) -> SyncResult<()>;
}

/// Production processor: replays items against the remote service and
/// reconciles the result into the store.
pub struct RemoteProcessor {
  remote: Arc<dyn RemoteService>,
  store: Store,
  events: EventBus,
  custom: HashMap<String, Arc<dyn CustomHandler>>,
}

impl RemoteProcessor {
  pub fn new(remote: Arc<dyn RemoteService>, store: Store, events: EventBus) -> Self {
    Self {
      remote,
      store,
      events,
      custom: HashMap::new(),
    }
  }

  pub fn with_custom_handler(
    mut self,
    name: impl Into<String>,
    handler: Arc<dyn CustomHandler>,
  ) -> Self {
    self.custom.insert(name.into(), handler);
    self
  }

  fn updated(&self, resource: Resource) {
    self.events.emit(SyncEvent::DataUpdated {
      resource: resource.to_string(),
    });
  }
}

fn payload<T: DeserializeOwned>(item: &QueueItem) -> SyncResult<T> {
  serde_json::from_value(item.payload.clone()).map_err(|e| {
    SyncError::InvalidState(format!(
      "malformed {} payload on item {}: {}",
      item.kind, item.id, e
    ))
  })
}

#[async_trait]
impl QueueProcessor for RemoteProcessor {
  async fn process(&self, item: &QueueItem) -> SyncResult<()> {
    debug!(id = %item.id, kind = %item.kind, "replaying queued item");

    match item.kind {
      QueueItemKind::ExecuteOperation => {
        let p: ExecutePayload = payload(item)?;
        let request = ExecuteRequest {
          name: p.name,
          parameters: p.parameters,
        };
        let response = self.remote.execute(&request).await?;
        reconcile::apply_execute_result(&self.store, &request, response)?;
        self.updated(Resource::Records);
      }
      QueueItemKind::UpdateRecord => {
        let p: UpdatePayload = payload(item)?;
        let record = self.remote.update_record(&p.id, &p.patch).await?;
        self.store.put(&record)?;
        self.updated(Resource::Records);
      }
      QueueItemKind::DeleteRecord => {
        let p: DeletePayload = payload(item)?;
        match self.remote.delete_record(&p.id).await {
          // Already gone on the service side.
          Ok(()) | Err(SyncError::RemoteRejection { status: 404, .. }) => {}
          Err(e) => return Err(e),
        }
        reconcile::delete_locally(&self.store, &p.id)?;
        self.updated(Resource::Records);
      }
      QueueItemKind::CacheRefresh => {
        let p: RefreshPayload = payload(item)?;
        let resources = if p.resources.is_empty() {
          Resource::ALL.to_vec()
        } else {
          p.resources
        };
        for resource in resources {
          reconcile::refresh(self.remote.as_ref(), &self.store, resource).await?;
          self.updated(resource);
        }
      }
      QueueItemKind::Custom => {
        let p: CustomPayload = payload(item)?;
        let handler = self.custom.get(&p.handler).ok_or_else(|| {
          SyncError::InvalidState(format!("no custom handler named '{}'", p.handler))
        })?;
        handler.handle(&p.data).await?;
      }
    }

    Ok(())
  }
}
