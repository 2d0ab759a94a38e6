//! Long-lived background task that replays the queue and keeps read-mostly
//! data warm, independent of any foreground caller.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::interceptor::Interceptor;
use crate::events::SyncEvent;
use crate::orchestrator::Orchestrator;

/// Handle to the running agent. Dropping it stops the task once the current
/// pass ends; [`BackgroundAgent::shutdown`] also waits for that.
pub struct BackgroundAgent {
  shutdown: Option<oneshot::Sender<()>>,
  wake: Arc<Notify>,
  handle: JoinHandle<()>,
}

struct Worker {
  interceptor: Arc<Interceptor>,
  orchestrator: Orchestrator,
}

impl BackgroundAgent {
  /// Start the agent.
  ///
  /// It wakes on every offline to online transition, on every `interval`
  /// tick (after probing reachability) and on [`BackgroundAgent::wake`].
  /// Each pass drains the orchestrator's queue, then refreshes the stored
  /// catalog and records and the interceptor's read-mostly responses.
  pub fn spawn(
    interceptor: Arc<Interceptor>,
    orchestrator: Orchestrator,
    interval: Duration,
  ) -> Self {
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
    let wake = Arc::new(Notify::new());
    let wake_rx = Arc::clone(&wake);

    let worker = Worker {
      interceptor,
      orchestrator,
    };

    let handle = tokio::spawn(async move {
      let mut online_rx = worker.orchestrator.connectivity().subscribe();
      let mut ticker = tokio::time::interval(interval);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      info!(interval_secs = interval.as_secs(), "background agent started");

      loop {
        tokio::select! {
          _ = &mut shutdown_rx => break,
          changed = online_rx.changed() => {
            if changed.is_err() {
              break;
            }
            let online = *online_rx.borrow_and_update();
            if online {
              info!("connectivity restored");
              worker.run().await;
            }
          }
          _ = ticker.tick() => {
            let reachable = worker.interceptor.probe().await;
            if worker.orchestrator.connectivity().set_online(reachable) {
              worker
                .orchestrator
                .events()
                .emit(SyncEvent::ConnectivityChanged { online: reachable });
              // The change notification above triggers the wake.
              continue;
            }
            if reachable {
              worker.run().await;
            }
          }
          _ = wake_rx.notified() => worker.run().await,
        }
      }

      info!("background agent stopped");
    });

    Self {
      shutdown: Some(shutdown_tx),
      wake,
      handle,
    }
  }

  /// Request an immediate pass.
  pub fn wake(&self) {
    self.wake.notify_one();
  }

  pub fn is_running(&self) -> bool {
    !self.handle.is_finished()
  }

  /// Stop the agent and wait for the current pass to finish.
  pub async fn shutdown(mut self) {
    if let Some(tx) = self.shutdown.take() {
      let _ = tx.send(());
    }
    if let Err(e) = (&mut self.handle).await {
      warn!(error = %e, "background agent ended abnormally");
    }
  }
}

impl Worker {
  async fn run(&self) {
    if let Some(queue) = self.orchestrator.queue() {
      match queue.drain().await {
        Ok(report) if !report.skipped => debug!(
          completed = report.completed,
          failed = report.failed,
          requeued = report.requeued,
          "agent drain finished"
        ),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "agent drain failed"),
      }
    }

    if !self.orchestrator.connectivity().is_online() {
      return;
    }
    let synced = self.orchestrator.refresh_resources().await;
    let warmed = self.interceptor.refresh_read_mostly().await;
    if !synced.failed.is_empty() || warmed.failed > 0 {
      debug!(
        resources_failed = synced.failed.len(),
        responses_refreshed = warmed.refreshed,
        responses_failed = warmed.failed,
        "agent refresh incomplete"
      );
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::connectivity::Connectivity;
  use crate::error::{SyncError, SyncResult};
  use crate::events::{EventBus, EventKind};
  use crate::intercept::{HttpRequest, HttpResponse, InterceptorOptions, RouteTable, Transport};
  use crate::orchestrator::OrchestratorOptions;
  use crate::queue::{CustomHandler, EnqueueOptions, QueueItemKind, QueueStatus};
  use crate::remote::HttpRemote;
  use crate::store::{CatalogEntry, Store};
  use serde_json::{json, Value};
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
  use std::sync::Mutex;
  use url::Url;

  /// Serves one catalog entry and empty lists everywhere else while up.
  struct SwitchTransport {
    up: AtomicBool,
  }

  #[async_trait::async_trait]
  impl Transport for SwitchTransport {
    async fn send(&self, request: &HttpRequest) -> SyncResult<HttpResponse> {
      if !self.up.load(Ordering::SeqCst) {
        return Err(SyncError::Connectivity("down".into()));
      }
      if request.url.path().ends_with("/catalog") {
        Ok(HttpResponse::json(
          200,
          &json!([{"name": "stat", "category": "analysis"}]),
        ))
      } else {
        Ok(HttpResponse::json(200, &json!([])))
      }
    }
  }

  #[derive(Default)]
  struct RecordingHandler {
    seen: Mutex<Vec<Value>>,
  }

  #[async_trait::async_trait]
  impl CustomHandler for RecordingHandler {
    async fn handle(&self, data: &Value) -> SyncResult<()> {
      self.seen.lock().unwrap().push(data.clone());
      Ok(())
    }
  }

  fn stack(
    transport: Arc<SwitchTransport>,
    store: SyncResult<Store>,
    events: EventBus,
    connectivity: Connectivity,
    options: OrchestratorOptions,
  ) -> (Arc<Interceptor>, Orchestrator) {
    let interceptor = Arc::new(Interceptor::new(
      transport,
      store.as_ref().ok().cloned(),
      Url::parse("http://service.test/api/").unwrap(),
      RouteTable::default(),
      InterceptorOptions::default(),
    ));
    let orchestrator = Orchestrator::new(
      Arc::new(HttpRemote::new(Arc::clone(&interceptor))),
      store,
      events,
      connectivity,
      options,
    );
    (interceptor, orchestrator)
  }

  async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
      if condition() {
        return;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
  }

  #[tokio::test]
  async fn test_reconnect_drains_queue_and_refreshes_store() {
    let store = Store::open_in_memory().unwrap();
    let events = EventBus::new();
    let connectivity = Connectivity::new(false);

    let handler = Arc::new(RecordingHandler::default());
    let options = OrchestratorOptions::default().with_custom_handler("note", handler.clone());

    let transport = Arc::new(SwitchTransport {
      up: AtomicBool::new(false),
    });
    let (interceptor, orchestrator) = stack(
      transport.clone(),
      Ok(store.clone()),
      events.clone(),
      connectivity.clone(),
      options,
    );

    let id = orchestrator
      .enqueue(
        QueueItemKind::Custom,
        json!({"handler": "note", "data": {"text": "hi"}}),
        EnqueueOptions::default(),
      )
      .await
      .unwrap();

    let changes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&changes);
    events.on(EventKind::ConnectivityChanged, move |_| {
      counter.fetch_add(1, Ordering::SeqCst);
    });
    let updates = Arc::new(Mutex::new(Vec::new()));
    let updated = Arc::clone(&updates);
    events.on(EventKind::DataUpdated, move |event| {
      if let SyncEvent::DataUpdated { resource } = event {
        updated.lock().unwrap().push(resource.clone());
      }
    });

    let agent = BackgroundAgent::spawn(
      interceptor,
      orchestrator.clone(),
      Duration::from_millis(20),
    );

    transport.up.store(true, Ordering::SeqCst);
    let queue = orchestrator.queue().unwrap().clone();
    wait_for(|| {
      queue
        .get_item(&id)
        .unwrap()
        .is_some_and(|item| item.status == QueueStatus::Completed)
    })
    .await;
    wait_for(|| updates.lock().unwrap().len() >= 2).await;

    assert!(connectivity.is_online());
    assert_eq!(*handler.seen.lock().unwrap(), vec![json!({"text": "hi"})]);
    assert_eq!(changes.load(Ordering::SeqCst), 1);
    assert!(updates.lock().unwrap().contains(&"catalog".to_string()));
    let catalog: Vec<CatalogEntry> = store.get_all().unwrap();
    assert_eq!(catalog.len(), 1);
    assert_eq!(catalog[0].name, "stat");

    agent.shutdown().await;
  }

  #[tokio::test]
  async fn test_shutdown_stops_task() {
    let transport = Arc::new(SwitchTransport {
      up: AtomicBool::new(false),
    });
    let (interceptor, orchestrator) = stack(
      transport,
      Err(SyncError::StorageUnavailable("no disk".into())),
      EventBus::new(),
      Connectivity::new(true),
      OrchestratorOptions::default(),
    );
    let agent = BackgroundAgent::spawn(interceptor, orchestrator, Duration::from_secs(60));
    assert!(agent.is_running());
    agent.shutdown().await;
  }
}
