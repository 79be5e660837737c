//! Bounded event channel between one search task and one consumer.
//!
//! The producer never blocks: progress events are droppable telemetry, and
//! the capacity is sized so the terminal events at the end of a search
//! cannot be the ones dropped unless the consumer is a full window behind.
//! The consumer wakes every half second to keep an idle byte stream warm.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;
use wikipath_core::Event;

/// Channel capacity; large relative to the engine's batched emission rate.
pub const CHANNEL_CAPACITY: usize = 1024;

/// Idle consumer wakeup cadence.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_millis(500);

pub fn channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    (EventSender { tx }, EventReceiver { rx })
}

#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Event>,
}

impl EventSender {
    /// Non-blocking enqueue. A full channel means the consumer is more
    /// than `CHANNEL_CAPACITY` events behind and the event is dropped; a
    /// closed channel means the consumer is gone.
    pub fn emit(&self, event: Event) {
        if let Err(e) = self.tx.try_send(event) {
            debug!(error = %e, "event not delivered");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub struct EventReceiver {
    rx: mpsc::Receiver<Event>,
}

impl EventReceiver {
    /// The next event, a `Keepalive` when the stream idles past the wakeup
    /// interval, or `None` once the producer is gone and the channel is
    /// drained.
    pub async fn next_event(&mut self) -> Option<Event> {
        match tokio::time::timeout(KEEPALIVE_INTERVAL, self.rx.recv()).await {
            Ok(event) => event,
            Err(_idle) => Some(Event::Keepalive),
        }
    }

    /// Discards anything still queued. Used when the consumer abandons a
    /// cancelled search.
    pub fn drain(&mut self) {
        while self.rx.try_recv().is_ok() {}
    }
}
