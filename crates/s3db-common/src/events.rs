//! The event bus (spec §6 "Events emitted on the event bus").
//!
//! One broadcast channel shared by a `Database` and every component
//! attached to it (Resource, Catalog, Coordination Service, Replication).
//! Subscribers each drain their own receiver; a slow subscriber never
//! blocks a publisher (lagged subscribers just skip ahead, per
//! `tokio::sync::broadcast`'s semantics).

use serde_json::Value;
use tokio::sync::broadcast;

/// One event from spec §6's list, carrying just enough detail for a
/// subscriber to act without a catalog round-trip. `Inserted`/`Updated`/
/// `Deleted` carry the full record (and, where one existed, the record's
/// prior state) so a Replicator can fan a mutation out without a second
/// GET (spec §4.9 item 1: "the Resource emits `{op, resource, id,
/// record, previous}`").
#[derive(Clone, Debug)]
pub enum Event {
    Connected { bucket: String, prefix: String },
    Disconnected,
    ResourceCreated { resource: String },
    Inserted { resource: String, id: String, record: Value },
    Updated { resource: String, id: String, record: Value, previous: Option<Value> },
    Deleted { resource: String, id: String, previous: Option<Value> },
    MetadataHealed { healing_log: Vec<String> },
    OrphanedPartitionsRemoved { resource: String, partitions: Vec<String> },
    LeaderChanged { namespace: String, previous_leader: Option<String>, new_leader: Option<String>, epoch: u64 },
    ReplicatorQueued { target: String, resource: String, id: String },
    ReplicatorSuccess { target: String, resource: String, id: String },
    ReplicatorFailed { target: String, resource: String, id: String, error: String },
    /// An `afterX` hook raised; the operation itself already committed
    /// (spec §4.5 "Error behavior").
    HookError { point: String, resource: String, error: String },
}

/// The default channel capacity; a lagging subscriber beyond this many
/// unread events starts dropping the oldest ones (broadcast semantics),
/// which is acceptable for an observability bus.
const DEFAULT_CAPACITY: usize = 1024;

pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Publish an event. No-op (not an error) if nobody is subscribed.
    pub fn publish(&self, event: Event) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(Event::Inserted { resource: "users".into(), id: "u1".into(), record: serde_json::json!({"id": "u1"}) });
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, Event::Inserted { resource, id, .. } if resource == "users" && id == "u1"));
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(Event::Disconnected);
    }
}
