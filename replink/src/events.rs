//! Connection event fan-out.
//!
//! Lifecycle and data notifications are delivered over a typed channel with
//! one producer and any number of subscribers, each holding its own
//! receiver. A dropped receiver unsubscribes implicitly; stale senders are
//! pruned on the next emit. Subscribers consume events on whichever thread
//! suits them, so nothing here assumes a UI context.

use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::trace;

use crate::device::DeviceInfo;

/// A lifecycle or data notification from the connection manager.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// A connection to the device was established.
    Connected(DeviceInfo),
    /// The connection was closed (explicitly or by detach).
    Disconnected,
    /// A lifecycle or protocol failure, carrying a human-readable message.
    ConnectionError(String),
    /// Bytes arrived from the board.
    DataReceived(Vec<u8>),
}

/// One-producer, many-consumer event distribution.
///
/// Emission never blocks and never fails: sending to a subscriber whose
/// receiver is gone just drops that subscription.
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<LinkEvent>>>,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Register a new observer and return its receiving end.
    pub fn subscribe(&self) -> Receiver<LinkEvent> {
        let (tx, rx) = channel();
        self.lock().push(tx);
        rx
    }

    /// Number of live subscriptions (including ones whose receiver may have
    /// been dropped since the last emit).
    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    /// Deliver an event to every live subscriber.
    pub fn emit(&self, event: &LinkEvent) {
        trace!("emit {event:?}");
        self.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Sender<LinkEvent>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
