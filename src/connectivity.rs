//! Online/offline signal shared between the host and the replay agent.

use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone)]
pub struct Connectivity {
  tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
  pub fn new(online: bool) -> Self {
    let (tx, _rx) = watch::channel(online);
    Self { tx: Arc::new(tx) }
  }

  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  /// Record a new state. Returns true on the offline → online edge.
  pub fn set(&self, online: bool) -> bool {
    let was_online = self.tx.send_replace(online);
    online && !was_online
  }

  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }
}

impl Default for Connectivity {
  fn default() -> Self {
    Self::new(true)
  }
}
