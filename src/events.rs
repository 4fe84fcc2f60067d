use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tracing::debug;

use crate::domain::Event;
use crate::sync_ext::MutexExt;

/// Per-subscriber buffer depth. A subscriber that falls this far behind is
/// unregistered rather than allowed to block producers.
const SUBSCRIBER_BUFFER: usize = 64;

/// Fan-out of queue and worker state changes to subscribed observers.
///
/// Publishing is non-blocking: events are pushed with `try_send`, and any
/// subscriber whose channel is full or closed is dropped from the registry.
/// Liveness pings for WebSocket peers live in the transport layer.
#[derive(Debug, Default)]
pub struct EventHub {
    subscribers: Mutex<HashMap<u64, mpsc::Sender<Event>>>,
    next_id: AtomicU64,
}

pub struct Subscription {
    pub id: u64,
    pub events: mpsc::Receiver<Event>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock_unpoisoned().insert(id, tx);
        Subscription { id, events: rx }
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.lock_unpoisoned().remove(&id);
    }

    pub fn broadcast(&self, event: &Event) {
        let mut subscribers = self.subscribers.lock_unpoisoned();
        subscribers.retain(|id, tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(subscriber = *id, "dropping slow event subscriber");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock_unpoisoned().len()
    }
}
