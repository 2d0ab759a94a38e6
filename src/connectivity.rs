//! Shared online/offline flag with change notification.

use tokio::sync::watch;

/// Connectivity state shared by the orchestrator, the queue and the
/// background agent. Cloning yields another handle to the same state.
#[derive(Clone)]
pub struct Connectivity {
  tx: watch::Sender<bool>,
}

impl Connectivity {
  pub fn new(online: bool) -> Self {
    let (tx, _rx) = watch::channel(online);
    Self { tx }
  }

  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  /// Update the state. Returns true if the value changed.
  pub fn set_online(&self, online: bool) -> bool {
    self.tx.send_if_modified(|current| {
      if *current == online {
        false
      } else {
        *current = online;
        true
      }
    })
  }

  /// Receiver notified on every change.
  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }
}

impl Default for Connectivity {
  fn default() -> Self {
    Self::new(true)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_subscribers_see_transitions() {
    let connectivity = Connectivity::new(false);
    let mut rx = connectivity.subscribe();

    assert!(!connectivity.set_online(false));
    assert!(connectivity.set_online(true));

    rx.changed().await.unwrap();
    assert!(*rx.borrow_and_update());
    assert!(connectivity.is_online());
  }
}
