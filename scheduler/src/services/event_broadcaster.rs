//! Broadcast event sink
//!
//! Fans scheduler events out to any number of in-process subscribers (a push
//! channel, a CLI printer). Emitting never blocks; slow subscribers lag and
//! lose the oldest events.

use tokio::sync::broadcast;
use tracing::trace;

use shared::EventEnvelope;
use crate::traits::EventSink;

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct BroadcastEventSink {
    sender: broadcast::Sender<EventEnvelope>,
}

impl BroadcastEventSink {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for BroadcastEventSink {
    fn emit(&self, envelope: EventEnvelope) {
        let kind = envelope.event.kind();
        // No subscriber is not an error
        if self.sender.send(envelope).is_err() {
            trace!(kind, "Event dropped, no subscribers");
        }
    }
}
