//! The event bus shared by the stores of one application.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, Weak};

use rivulet_core::Event;
use tracing::debug;

/// Identifies one subscription on an event source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// Receives events published by other participants.
pub trait Subscriber: Send + Sync {
    /// Must not block: implementations queue the events and return.
    fn receive(&self, events: &[Event], depth: usize);
}

/// Fan-out of published events to every subscriber but the publisher.
pub trait EventSource: Send + Sync {
    fn subscribe(&self, subscriber: Weak<dyn Subscriber>) -> SubscriberId;

    fn unsubscribe(&self, id: SubscriberId);

    /// `depth` counts how many processing hops produced these events.
    fn publish(&self, events: &[Event], depth: usize, origin: Option<SubscriberId>);
}

// ---------------------------------------------------------------------------
// LoopbackEventSource
// ---------------------------------------------------------------------------

/// In-process bus. Subscribers are held weakly and dropped ones are pruned on
/// the next publish.
#[derive(Default)]
pub struct LoopbackEventSource {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(SubscriberId, Weak<dyn Subscriber>)>>,
}

impl LoopbackEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .map(|subs| subs.iter().filter(|(_, s)| s.strong_count() > 0).count())
            .unwrap_or(0)
    }
}

impl EventSource for LoopbackEventSource {
    fn subscribe(&self, subscriber: Weak<dyn Subscriber>) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::SeqCst));
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push((id, subscriber));
        }
        id
    }

    fn unsubscribe(&self, id: SubscriberId) {
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.retain(|(existing, _)| *existing != id);
        }
    }

    fn publish(&self, events: &[Event], depth: usize, origin: Option<SubscriberId>) {
        if events.is_empty() {
            return;
        }
        // Deliver outside the lock: receivers may publish again.
        let targets: Vec<Weak<dyn Subscriber>> = match self.subscribers.lock() {
            Ok(mut subs) => {
                subs.retain(|(_, s)| s.strong_count() > 0);
                subs.iter()
                    .filter(|(id, _)| Some(*id) != origin)
                    .map(|(_, s)| s.clone())
                    .collect()
            }
            Err(_) => return,
        };
        debug!(
            events = events.len(),
            subscribers = targets.len(),
            depth,
            "Bus fan-out"
        );
        for target in targets {
            if let Some(subscriber) = target.upgrade() {
                subscriber.receive(events, depth);
            }
        }
    }
}
