//! Completion handling for terminal goal events.
//!
//! The goal-set tracker runs first and records the goal-set outcome once every
//! goal is terminal. Listeners run after it; their errors are logged and
//! dropped.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use goalflow_types::{now_millis, GoalEvent, GoalSetRecord, Result};

use crate::reconcile::GoalSetView;
use crate::store::latest_goal_set;

use super::ReactorContext;

const ACTOR: &str = "goal-set-tracker";

/// A terminal event together with the reconciled state of its goal-set.
#[derive(Debug, Clone)]
pub struct GoalCompletion {
    pub event: GoalEvent,
    pub goal_set: GoalSetView,
}

#[async_trait]
pub trait GoalCompletionListener: Send + Sync {
    async fn on_completion(&self, completion: &GoalCompletion) -> Result<()>;
}

pub struct FnCompletionListener<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> GoalCompletionListener for FnCompletionListener<F>
where
    F: Fn(GoalCompletion) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn on_completion(&self, completion: &GoalCompletion) -> Result<()> {
        (self.f)(completion.clone()).await
    }
}

pub fn completion_listener_fn<F, Fut>(f: F) -> Arc<dyn GoalCompletionListener>
where
    F: Fn(GoalCompletion) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnCompletionListener { f })
}

/// Append a goal-set record when `view` is complete and its outcome differs
/// from the latest record. Returns the appended record.
pub async fn track_goal_set(
    ctx: &ReactorContext<'_>,
    event: &GoalEvent,
    view: &GoalSetView,
) -> Result<Option<GoalSetRecord>> {
    let Some(state) = view.outcome() else {
        return Ok(None);
    };
    let latest = latest_goal_set(ctx.store, &event.goal_set_id).await?;
    if latest.as_ref().is_some_and(|r| r.state == state) {
        return Ok(None);
    }

    let record = match latest {
        Some(mut record) => {
            record.state = state;
            record.ts = now_millis().max(record.ts + 1);
            record
        }
        None => GoalSetRecord {
            goal_set_id: event.goal_set_id.clone(),
            goal_set: event.goal_set.clone(),
            change: event.change.clone(),
            state,
            ts: now_millis(),
            registration: event
                .owner_registration()
                .unwrap_or(ctx.registration.name.as_str())
                .to_string(),
            goals: view.goals().iter().map(GoalEvent::goal_ref).collect(),
        },
    };

    ctx.store.append_goal_set(record.clone()).await?;
    tracing::info!(
        goal_set = %record.goal_set_id,
        state = ?record.state,
        actor = ACTOR,
        "Goal-set completed"
    );
    Ok(Some(record))
}

/// Run completion handling for a terminal event.
pub async fn on_terminal(
    ctx: &ReactorContext<'_>,
    event: &GoalEvent,
    listeners: &[Arc<dyn GoalCompletionListener>],
) -> Result<()> {
    if !event.state.is_terminal() || !ctx.is_relevant(event, ACTOR) {
        return Ok(());
    }

    let view = ctx.view_with(event).await?;
    let tracked = track_goal_set(ctx, event, &view).await;

    let completion = GoalCompletion {
        event: event.clone(),
        goal_set: view,
    };
    for listener in listeners {
        if let Err(e) = listener.on_completion(&completion).await {
            tracing::warn!(
                goal = %event.unique_name,
                goal_set = %event.goal_set_id,
                error = %e,
                "Completion listener failed"
            );
        }
    }

    tracked.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactors::OwnedByRegistration;
    use crate::registry::FulfillmentRegistry;
    use crate::store::{GoalEventStore, GoalSetFilter, InMemoryGoalEventStore, PageRequest};
    use crate::test_support::{event, goal_set_record, registration, REGISTRATION};
    use goalflow_types::{GoalSetState, GoalState, GoalflowError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn records_outcome_once_and_isolates_listener_errors() {
        let store = InMemoryGoalEventStore::new();
        store.append_goal_set(goal_set_record("gs-1", GoalSetState::InProcess, 1)).await.unwrap();
        store.append(event("build", GoalState::Success, 2)).await.unwrap();
        store.append(event("test", GoalState::InProcess, 2)).await.unwrap();

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

        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        let listeners = vec![
            completion_listener_fn(|_c| async { Err(GoalflowError::Other("chat down".into())) }),
            completion_listener_fn(move |c: GoalCompletion| {
                let s = s.clone();
                async move {
                    if c.goal_set.is_complete() {
                        s.fetch_add(1, Ordering::SeqCst);
                    }
                    Ok(())
                }
            }),
        ];

        let failed = event("test", GoalState::Failure, 3);
        on_terminal(&ctx, &failed, &listeners).await.unwrap();
        on_terminal(&ctx, &failed, &listeners).await.unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 2);
        let latest = latest_goal_set(&store, "gs-1").await.unwrap().unwrap();
        assert_eq!(latest.state, GoalSetState::Failure);
    }

    #[tokio::test]
    async fn incomplete_goal_set_is_not_recorded() {
        let store = InMemoryGoalEventStore::new();
        store.append(event("build", GoalState::Planned, 1)).await.unwrap();
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

        on_terminal(&ctx, &event("test", GoalState::Success, 2), &[]).await.unwrap();
        let records = store
            .query_goal_sets(&GoalSetFilter::default(), PageRequest::first(10))
            .await
            .unwrap();
        assert!(records.items.is_empty());
    }
}
