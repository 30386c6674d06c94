//! Runtime progress observers.

use tokio::sync::broadcast;

use shopforge_saga::{ProgressEvent, ProgressObserver};

/// Publishes every event on a tokio broadcast channel.
///
/// Slow subscribers lag (and lose the oldest events) instead of holding back
/// the saga; emitting with no subscriber is not an error.
#[derive(Debug, Clone)]
pub struct BroadcastObserver {
    tx: broadcast::Sender<ProgressEvent>,
}

impl BroadcastObserver {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastObserver {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ProgressObserver for BroadcastObserver {
    fn emit(&self, event: &ProgressEvent) {
        let _ = self.tx.send(event.clone());
    }
}
