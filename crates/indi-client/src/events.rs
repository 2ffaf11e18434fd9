//! Event subscriptions
//!
//! One topic per [`EventKind`] plus a catch-all topic. Delivery is
//! synchronous on the publishing thread, in subscription order.

use dashmap::DashMap;
use indi_core::{Event, EventKind};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

/// Subscription callback type
pub type EventCallback = Arc<dyn Fn(&Event) + Send + Sync>;

/// Handle returned by subscribe, used to unsubscribe
pub type SubscriptionId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Topic {
    Kind(EventKind),
    All,
}

#[derive(Default)]
pub struct EventBus {
    topics: DashMap<Topic, Vec<(SubscriptionId, EventCallback)>>,
    next_id: AtomicU32,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to one event kind
    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.insert(Topic::Kind(kind), Arc::new(callback))
    }

    /// Subscribe to every event
    pub fn subscribe_all<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.insert(Topic::All, Arc::new(callback))
    }

    fn insert(&self, topic: Topic, callback: EventCallback) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.topics.entry(topic).or_default().push((id, callback));
        debug!("Subscribed to {:?} (id: {})", topic, id);
        id
    }

    /// Remove a subscription; false if the id was unknown
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut found = false;
        for mut entry in self.topics.iter_mut() {
            let before = entry.len();
            entry.retain(|(sub, _)| *sub != id);
            found |= entry.len() != before;
        }
        found
    }

    /// Number of live subscriptions
    pub fn len(&self) -> usize {
        self.topics.iter().map(|entry| entry.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver an event to every matching subscriber
    ///
    /// Callbacks run after the topic maps are released, so a callback may
    /// subscribe or unsubscribe. A panicking callback is logged and skipped.
    pub fn publish(&self, event: &Event) {
        let mut targets: Vec<(SubscriptionId, EventCallback)> = Vec::new();
        for topic in [Topic::Kind(event.kind()), Topic::All] {
            if let Some(subs) = self.topics.get(&topic) {
                targets.extend(subs.iter().cloned());
            }
        }
        targets.sort_by_key(|(id, _)| *id);

        for (id, callback) in targets {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                error!("Subscriber {} panicked handling {:?}", id, event.kind());
            }
        }
    }
}
