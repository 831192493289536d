//! Batch progress broadcaster for real-time item status streaming.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::pipeline::ProgressEvent;

/// Broadcasts progress events to any number of subscribers.
#[derive(Clone)]
pub struct BatchProgressBroadcaster {
    sender: Arc<broadcast::Sender<ProgressEvent>>,
}

impl BatchProgressBroadcaster {
    /// Creates a new broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends a progress event to all subscribers.
    pub fn send(&self, event: ProgressEvent) {
        // Ignore errors - no active receivers is fine
        let _ = self.sender.send(event);
    }

    /// Creates a new subscriber. Slow subscribers that fall more than
    /// `capacity` events behind observe `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Gets the inner sender for creating reporters.
    pub fn sender(&self) -> Arc<broadcast::Sender<ProgressEvent>> {
        Arc::clone(&self.sender)
    }
}

impl Default for BatchProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}
