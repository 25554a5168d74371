//! Event bus for store appends.
//!
//! Publishes every appended [`GoalEvent`] and [`GoalSetRecord`] on a
//! [`tokio::sync::broadcast`] channel so that a hosting event-processing layer
//! (see [`GoalMachine::run`](crate::machine::GoalMachine::run)) can react to
//! them without coupling to the store internals.

use goalflow_types::{GoalEvent, GoalSetRecord};

/// An item appended to the event store.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    Goal(GoalEvent),
    GoalSet(GoalSetRecord),
}

/// Event bus wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventBus {
    sender: tokio::sync::broadcast::Sender<StoreEvent>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active receivers the event is silently dropped.
    pub fn publish(&self, event: StoreEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<StoreEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::event;
    use goalflow_types::GoalState;

    #[tokio::test]
    async fn bus_delivers_to_every_subscriber() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(StoreEvent::Goal(event("build", GoalState::Success, 5)));

        for rx in [&mut rx1, &mut rx2] {
            match rx.recv().await.unwrap() {
                StoreEvent::Goal(e) => {
                    assert_eq!(e.unique_name, "build");
                    assert_eq!(e.state, GoalState::Success);
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new(4);
        bus.publish(StoreEvent::Goal(event("build", GoalState::Planned, 1)));
    }
}
