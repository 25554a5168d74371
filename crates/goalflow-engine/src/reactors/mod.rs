//! Propagation reactors: turn terminal goal events into follow-up events.
//!
//! Each reactor is a function of the triggering event plus the goal-set state
//! read from the store, and only reacts to events owned by this registration.

pub mod completion;
pub mod failure;
pub mod success;

use goalflow_types::{GoalEvent, Registration, Result};

use crate::change::{ChangeContext, ChangeContextProvider};
use crate::reconcile::GoalSetView;
use crate::registry::FulfillmentRegistry;
use crate::store::{fetch_goal_set_events, GoalEventStore};

pub use completion::{
    completion_listener_fn, on_terminal, track_goal_set, GoalCompletion, GoalCompletionListener,
};
pub use failure::on_failure;
pub use success::on_success;

// ---------------------------------------------------------------------------
// Relevance
// ---------------------------------------------------------------------------

/// Decides whether this process should react to an event.
pub trait RelevancePredicate: Send + Sync {
    fn is_relevant(&self, event: &GoalEvent) -> bool;
}

/// Relevant when the goal was planned by the named registration, or when the
/// event carries no provenance at all.
#[derive(Debug, Clone)]
pub struct OwnedByRegistration {
    registration: String,
}

impl OwnedByRegistration {
    pub fn new(registration: impl Into<String>) -> Self {
        Self {
            registration: registration.into(),
        }
    }
}

impl RelevancePredicate for OwnedByRegistration {
    fn is_relevant(&self, event: &GoalEvent) -> bool {
        event
            .owner_registration()
            .map_or(true, |owner| owner == self.registration)
    }
}

// ---------------------------------------------------------------------------
// ReactorContext
// ---------------------------------------------------------------------------

/// Collaborators shared by every reactor invocation.
pub struct ReactorContext<'a> {
    pub registry: &'a FulfillmentRegistry,
    pub store: &'a dyn GoalEventStore,
    pub registration: &'a Registration,
    pub relevance: &'a dyn RelevancePredicate,
    pub change_provider: Option<&'a dyn ChangeContextProvider>,
    pub page_size: usize,
}

impl ReactorContext<'_> {
    pub(crate) fn is_relevant(&self, event: &GoalEvent, reactor: &str) -> bool {
        let relevant = self.relevance.is_relevant(event);
        if !relevant {
            tracing::debug!(
                goal = %event.unique_name,
                goal_set = %event.goal_set_id,
                reactor,
                "Event not owned by this registration"
            );
        }
        relevant
    }

    /// Reconcile the event's goal-set with `event` taking precedence.
    pub(crate) async fn view_with(&self, event: &GoalEvent) -> Result<GoalSetView> {
        let snapshot = fetch_goal_set_events(self.store, &event.goal_set_id, self.page_size).await?;
        Ok(GoalSetView::reconcile_with_override(&snapshot, event))
    }

    pub(crate) async fn change_context(&self, event: &GoalEvent) -> Result<ChangeContext> {
        match self.change_provider {
            Some(provider) => provider.fetch(&event.change).await,
            None => Ok(ChangeContext::new(event.change.clone())),
        }
    }

    /// Append every update concurrently. All appends are attempted; the first
    /// error, if any, is returned afterwards.
    pub(crate) async fn append_all(&self, updates: &[GoalEvent]) -> Result<()> {
        let results =
            futures::future::join_all(updates.iter().map(|u| self.store.append(u.clone()))).await;
        let mut first_err = None;
        for (update, result) in updates.iter().zip(results) {
            match result {
                Ok(()) => tracing::info!(
                    goal = %update.unique_name,
                    goal_set = %update.goal_set_id,
                    state = %update.state,
                    "Goal updated"
                ),
                Err(e) => {
                    tracing::warn!(
                        goal = %update.unique_name,
                        error = %e,
                        "Failed to record goal update"
                    );
                    first_err.get_or_insert(e);
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::event;
    use goalflow_types::GoalState;

    #[test]
    fn owned_by_registration_checks_first_provenance() {
        let relevance = OwnedByRegistration::new("test-sdm");
        let mut e = event("build", GoalState::Success, 1);
        assert!(relevance.is_relevant(&e));

        e.provenance.push(goalflow_types::Registration::new("other", "1").provenance("runner"));
        assert!(relevance.is_relevant(&e));

        e.provenance.remove(0);
        assert!(!relevance.is_relevant(&e));

        e.provenance.clear();
        assert!(relevance.is_relevant(&e));
    }
}
