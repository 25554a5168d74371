//! Request dependents whose preconditions a successful goal completed.

use goalflow_types::{GoalEvent, GoalState, Result};

use crate::goal::GoalDescriptions;
use crate::preconditions::evaluate;
use crate::reconcile::GoalSetView;

use super::ReactorContext;

const ACTOR: &str = "success-reactor";

fn may_be_requested(dependent: &GoalEvent) -> bool {
    match dependent.state {
        GoalState::Planned | GoalState::Skipped => true,
        GoalState::Failure => dependent.retry_feasible,
        _ => false,
    }
}

/// Direct dependents of `succeeded` that can now be requested.
pub fn ready_dependents<'v>(succeeded: &GoalEvent, view: &'v GoalSetView) -> Vec<&'v GoalEvent> {
    let goal = succeeded.goal_ref();
    view.goals()
        .iter()
        .filter(|d| d.preconditions.contains(&goal))
        .filter(|d| may_be_requested(d))
        .filter(|d| evaluate(d, view).is_satisfied())
        .collect()
}

/// React to a `success` event by requesting every dependent that is ready.
///
/// Returns the events emitted.
pub async fn on_success(ctx: &ReactorContext<'_>, event: &GoalEvent) -> Result<Vec<GoalEvent>> {
    if event.state != GoalState::Success || !ctx.is_relevant(event, ACTOR) {
        return Ok(Vec::new());
    }

    let view = ctx.view_with(event).await?;
    let ready = ready_dependents(event, &view);
    if ready.is_empty() {
        return Ok(Vec::new());
    }

    let change = ctx.change_context(event).await?;
    let mut updates = Vec::with_capacity(ready.len());
    for dependent in ready {
        let state = if dependent.pre_approval_required {
            GoalState::WaitingForPreApproval
        } else {
            GoalState::Requested
        };
        let description = match ctx.registry.goals().get(&dependent.unique_name) {
            Some(goal) => goal.description_for(state).to_string(),
            None => GoalDescriptions::for_name(&dependent.name)
                .for_state(state)
                .to_string(),
        };
        let mut update = dependent.evolve(state, description, ctx.registration.provenance(ACTOR));
        update.data = None;
        for callback in ctx.registry.callbacks() {
            update = callback.before_request(update, &change).await?;
        }
        updates.push(update);
    }

    ctx.append_all(&updates).await?;
    Ok(updates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::ChangeContext;
    use crate::fulfillment::FnCallback;
    use crate::reactors::OwnedByRegistration;
    use crate::registry::FulfillmentRegistry;
    use crate::store::{GoalEventStore, InMemoryGoalEventStore};
    use crate::test_support::{event, event_after, registration, REGISTRATION};
    use std::sync::Arc;

    async fn seeded(events: Vec<GoalEvent>) -> InMemoryGoalEventStore {
        let store = InMemoryGoalEventStore::new();
        for e in events {
            store.append(e).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn success_requests_direct_dependent_once() {
        let store = seeded(vec![
            event("a", GoalState::InProcess, 1),
            event_after("b", GoalState::Planned, 1, &["a"]),
            event_after("c", GoalState::Planned, 1, &["b"]),
        ])
        .await;
        let registry = FulfillmentRegistry::new(REGISTRATION);
        let reg = registration();
        let relevance = OwnedByRegistration::new(REGISTRATION);
        let ctx = ReactorContext {
            registry: &registry,
            store: &store,
            registration: &reg,
            relevance: &relevance,
            change_provider: None,
            page_size: 10,
        };

        // success has not reached the store yet
        let success = event("a", GoalState::Success, 2);
        let emitted = on_success(&ctx, &success).await.unwrap();

        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].unique_name, "b");
        assert_eq!(emitted[0].state, GoalState::Requested);
        assert_eq!(emitted[0].description, "Ready: b");
        assert_eq!(store.event_count().await, 4);
    }

    #[tokio::test]
    async fn dependent_with_unfinished_sibling_stays_planned() {
        let store = seeded(vec![
            event("a", GoalState::Success, 1),
            event("lint", GoalState::InProcess, 1),
            event_after("deploy", GoalState::Planned, 1, &["a", "lint"]),
        ])
        .await;
        let registry = FulfillmentRegistry::new(REGISTRATION);
        let reg = registration();
        let relevance = OwnedByRegistration::new(REGISTRATION);
        let ctx = ReactorContext {
            registry: &registry,
            store: &store,
            registration: &reg,
            relevance: &relevance,
            change_provider: None,
            page_size: 10,
        };

        let emitted = on_success(&ctx, &event("a", GoalState::Success, 1)).await.unwrap();
        assert!(emitted.is_empty());
    }

    #[tokio::test]
    async fn retry_feasible_failure_and_skipped_are_re_requested() {
        let mut flaky = event_after("flaky", GoalState::Failure, 3, &["a"]);
        flaky.retry_feasible = true;
        let mut stuck = event_after("stuck", GoalState::Failure, 3, &["a"]);
        stuck.retry_feasible = false;
        let store = seeded(vec![
            event("a", GoalState::Failure, 2),
            flaky,
            stuck,
            event_after("later", GoalState::Skipped, 3, &["a"]),
        ])
        .await;
        let mut registry = FulfillmentRegistry::new(REGISTRATION);
        registry.add_fulfillment_callback(Arc::new(FnCallback::new(
            |mut e: GoalEvent, _c: &ChangeContext| {
                e.phase = Some("callback".into());
                Ok(e)
            },
        )));
        let reg = registration();
        let relevance = OwnedByRegistration::new(REGISTRATION);
        let ctx = ReactorContext {
            registry: &registry,
            store: &store,
            registration: &reg,
            relevance: &relevance,
            change_provider: None,
            page_size: 10,
        };

        let emitted = on_success(&ctx, &event("a", GoalState::Success, 4)).await.unwrap();
        let mut names: Vec<_> = emitted.iter().map(|e| e.unique_name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["flaky", "later"]);
        assert!(emitted.iter().all(|e| e.phase.as_deref() == Some("callback")));
        assert!(emitted.iter().all(|e| e.ts > 3));
    }

    #[tokio::test]
    async fn foreign_events_are_ignored() {
        let store = seeded(vec![event_after("b", GoalState::Planned, 1, &["a"])]).await;
        let registry = FulfillmentRegistry::new(REGISTRATION);
        let reg = registration();
        let relevance = OwnedByRegistration::new("another-sdm");
        let ctx = ReactorContext {
            registry: &registry,
            store: &store,
            registration: &reg,
            relevance: &relevance,
            change_provider: None,
            page_size: 10,
        };
        let emitted = on_success(&ctx, &event("a", GoalState::Success, 2)).await.unwrap();
        assert!(emitted.is_empty());
        assert_eq!(store.event_count().await, 1);
    }
}
