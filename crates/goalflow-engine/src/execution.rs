//! Runs requested goals through their implementation and records the outcome.

use async_trait::async_trait;
use goalflow_types::{FulfillmentKind, GoalEvent, GoalState, Registration, Result};
use serde_json::json;

use crate::fulfillment::{GoalInvocation, Implementation, InterpretedLog};
use crate::reconcile::reconcile_key;
use crate::registry::FulfillmentRegistry;
use crate::store::{fetch_all_events, GoalEventFilter, GoalEventStore};

const ACTOR: &str = "goal-runner";

/// Out-of-process execution for goals flagged isolated.
///
/// A successful launch leaves the goal `in_process`; whatever runs it is
/// responsible for reporting the outcome.
#[async_trait]
pub trait IsolatedLauncher: Send + Sync {
    async fn launch(&self, event: &GoalEvent) -> Result<()>;
}

// ---------------------------------------------------------------------------
// GoalRunner
// ---------------------------------------------------------------------------

pub struct GoalRunner<'a> {
    pub registry: &'a FulfillmentRegistry,
    pub store: &'a dyn GoalEventStore,
    pub registration: &'a Registration,
    pub launcher: Option<&'a dyn IsolatedLauncher>,
    pub page_size: usize,
}

impl GoalRunner<'_> {
    /// Handle one `requested` event.
    ///
    /// Returns the last event appended, or `None` when the event is not ours
    /// to run or has already been picked up. Setup errors are returned; every
    /// other error is recorded as a `failure` event.
    pub async fn handle_requested(&self, event: &GoalEvent) -> Result<Option<GoalEvent>> {
        if event.state != GoalState::Requested {
            return Ok(None);
        }
        let fulfillment = &event.fulfillment;
        if fulfillment.kind != FulfillmentKind::Implementation
            || fulfillment.registration != self.registration.name
        {
            tracing::debug!(
                goal = %event.unique_name,
                fulfillment = %fulfillment.name,
                registration = %fulfillment.registration,
                "Requested goal is not fulfilled here"
            );
            return Ok(None);
        }
        if !self.still_requested(event).await? {
            tracing::debug!(
                goal = %event.unique_name,
                goal_set = %event.goal_set_id,
                "Goal already picked up"
            );
            return Ok(None);
        }

        let implementation = self.registry.resolve_for_event(event)?;
        let goal = &implementation.goal;

        let in_process = event.evolve(
            GoalState::InProcess,
            goal.description_for(GoalState::InProcess),
            self.registration.provenance(ACTOR),
        );
        self.store.append(in_process.clone()).await?;

        if goal.definition().isolated {
            if let Some(launcher) = self.launcher {
                return self.launch(launcher, implementation, in_process).await.map(Some);
            }
        }

        let invocation = GoalInvocation::new(in_process.clone());
        let outcome = implementation.executor.execute(&invocation).await;
        let log = invocation.progress.text().await;
        let log_phase = implementation
            .progress_reporter
            .as_ref()
            .and_then(|r| r.phase(&log));

        let mut done = match outcome {
            Ok(result) if result.is_success() => {
                let mut state = result.state.unwrap_or(GoalState::Success);
                if state == GoalState::Success && goal.definition().approval_required {
                    state = GoalState::WaitingForApproval;
                }
                let description = result
                    .description
                    .unwrap_or_else(|| goal.description_for(state).to_string());
                let mut next =
                    in_process.evolve(state, description, self.registration.provenance(ACTOR));
                next.phase = result.phase.or(log_phase);
                next.data = result.data;
                next
            }
            Ok(result) => {
                let message = result
                    .message
                    .unwrap_or_else(|| format!("exited with code {}", result.code));
                let mut next = self.failure(implementation, &in_process, &message, &log);
                next.phase = result.phase.or(log_phase);
                next
            }
            Err(e) if e.is_setup_error() => return Err(e),
            Err(e) => {
                let mut next = self.failure(implementation, &in_process, &e.to_string(), &log);
                next.phase = log_phase;
                next
            }
        };
        if done.phase.is_none() {
            done.phase = in_process.phase.clone();
        }

        self.store.append(done.clone()).await?;
        tracing::info!(
            goal = %done.unique_name,
            goal_set = %done.goal_set_id,
            state = %done.state,
            "Goal executed"
        );
        Ok(Some(done))
    }

    async fn still_requested(&self, event: &GoalEvent) -> Result<bool> {
        let filter =
            GoalEventFilter::for_goal_set(&event.goal_set_id).with_unique_name(&event.unique_name);
        let known = fetch_all_events(self.store, &filter, self.page_size).await?;
        let current = reconcile_key(known.iter().filter(|e| e.environment == event.environment));
        Ok(current.map_or(true, |c| c.state == GoalState::Requested))
    }

    async fn launch(
        &self,
        launcher: &dyn IsolatedLauncher,
        implementation: &Implementation,
        in_process: GoalEvent,
    ) -> Result<GoalEvent> {
        match launcher.launch(&in_process).await {
            Ok(()) => {
                tracing::info!(
                    goal = %in_process.unique_name,
                    goal_set = %in_process.goal_set_id,
                    "Launched isolated goal"
                );
                Ok(in_process)
            }
            Err(e) => {
                let failed = self.failure(implementation, &in_process, &e.to_string(), "");
                self.store.append(failed.clone()).await?;
                tracing::warn!(goal = %failed.unique_name, error = %e, "Isolated launch failed");
                Ok(failed)
            }
        }
    }

    fn failure(
        &self,
        implementation: &Implementation,
        in_process: &GoalEvent,
        message: &str,
        log: &str,
    ) -> GoalEvent {
        let mut failed = in_process.evolve(
            GoalState::Failure,
            implementation.goal.description_for(GoalState::Failure),
            self.registration.provenance(ACTOR),
        );
        let interpreted = implementation.log_interpreter.interpret(log);
        failed.data = Some(failure_data(message, interpreted));
        failed
    }
}

fn failure_data(message: &str, log: Option<InterpretedLog>) -> serde_json::Value {
    match log {
        Some(log) => json!({
            "error": message,
            "log": { "message": log.message, "relevant_part": log.relevant_part },
        }),
        None => json!({ "error": message }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fulfillment::{executor_fn, PatternProgressReporter};
    use crate::goal::{Goal, GoalDefinition};
    use crate::store::InMemoryGoalEventStore;
    use crate::test_support::{event, registration, REGISTRATION};
    use goalflow_types::{Environment, ExecuteGoalResult, GoalflowError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn registry_with(
        definition: GoalDefinition,
        implementation: impl FnOnce(&Goal) -> Implementation,
    ) -> FulfillmentRegistry {
        let goal = Goal::new(definition);
        let mut registry = FulfillmentRegistry::new(REGISTRATION);
        registry.add_implementation(implementation(&goal)).unwrap();
        registry
    }

    fn succeeds() -> Arc<dyn crate::fulfillment::GoalExecutor> {
        executor_fn(|_inv| async { Ok(ExecuteGoalResult::success()) })
    }

    fn runner<'a>(
        registry: &'a FulfillmentRegistry,
        store: &'a InMemoryGoalEventStore,
        registration: &'a Registration,
        launcher: Option<&'a dyn IsolatedLauncher>,
    ) -> GoalRunner<'a> {
        GoalRunner {
            registry,
            store,
            registration,
            launcher,
            page_size: 10,
        }
    }

    #[tokio::test]
    async fn successful_run_records_in_process_then_success() {
        let registry = registry_with(GoalDefinition::new("build", Environment::Code).unwrap(), |g| {
            Implementation::new(
                "build",
                g,
                executor_fn(|inv: GoalInvocation| async move {
                    inv.progress.write("Compiling app").await;
                    Ok(ExecuteGoalResult::success())
                }),
            )
            .with_progress_reporter(Arc::new(
                PatternProgressReporter::new().with_phase("^Compiling", "compile").unwrap(),
            ))
        });
        let store = InMemoryGoalEventStore::new();
        let reg = registration();
        let requested = event("build", GoalState::Requested, 1);
        store.append(requested.clone()).await.unwrap();

        let done = runner(&registry, &store, &reg, None)
            .handle_requested(&requested)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(done.state, GoalState::Success);
        assert_eq!(done.description, "Complete: build");
        assert_eq!(done.phase.as_deref(), Some("compile"));
        let states: Vec<_> = store.all_events().await.iter().map(|e| e.state).collect();
        assert_eq!(states, vec![GoalState::Requested, GoalState::InProcess, GoalState::Success]);
    }

    #[tokio::test]
    async fn approval_required_parks_success() {
        let definition = GoalDefinition::new("build", Environment::Code)
            .unwrap()
            .approval_required(true);
        let registry = registry_with(definition, |g| {
            Implementation::new("build", g, succeeds())
        });
        let store = InMemoryGoalEventStore::new();
        let reg = registration();
        let done = runner(&registry, &store, &reg, None)
            .handle_requested(&event("build", GoalState::Requested, 1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.state, GoalState::WaitingForApproval);
        assert_eq!(done.description, "Approval required: build");
    }

    #[tokio::test]
    async fn non_zero_code_becomes_failure_with_log_tail() {
        let registry = registry_with(GoalDefinition::new("build", Environment::Code).unwrap(), |g| {
            Implementation::new(
                "build",
                g,
                executor_fn(|inv: GoalInvocation| async move {
                    inv.progress.write("error[E0425]: cannot find value").await;
                    Ok(ExecuteGoalResult::failed(101, "compile error"))
                }),
            )
        });
        let store = InMemoryGoalEventStore::new();
        let reg = registration();
        let done = runner(&registry, &store, &reg, None)
            .handle_requested(&event("build", GoalState::Requested, 1))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(done.state, GoalState::Failure);
        let data = done.data.unwrap();
        assert_eq!(data["error"], "compile error");
        assert_eq!(data["log"]["relevant_part"], "error[E0425]: cannot find value");
    }

    #[tokio::test]
    async fn executor_error_becomes_failure() {
        let registry = registry_with(GoalDefinition::new("build", Environment::Code).unwrap(), |g| {
            Implementation::new(
                "build",
                g,
                executor_fn(|_inv| async { Err(GoalflowError::Other("disk full".into())) }),
            )
        });
        let store = InMemoryGoalEventStore::new();
        let reg = registration();
        let done = runner(&registry, &store, &reg, None)
            .handle_requested(&event("build", GoalState::Requested, 1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.state, GoalState::Failure);
        assert_eq!(done.data.unwrap()["error"], "disk full");
    }

    #[tokio::test]
    async fn foreign_or_already_running_goals_are_ignored() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let registry = registry_with(GoalDefinition::new("build", Environment::Code).unwrap(), |g| {
            Implementation::new(
                "build",
                g,
                executor_fn(move |_inv| {
                    let c = c.clone();
                    async move {
                        c.fetch_add(1, Ordering::SeqCst);
                        Ok(ExecuteGoalResult::success())
                    }
                }),
            )
        });
        let store = InMemoryGoalEventStore::new();
        let reg = registration();
        let r = runner(&registry, &store, &reg, None);

        let mut foreign = event("build", GoalState::Requested, 1);
        foreign.fulfillment.registration = "other-sdm".into();
        assert!(r.handle_requested(&foreign).await.unwrap().is_none());

        let requested = event("build", GoalState::Requested, 1);
        store.append(requested.clone()).await.unwrap();
        store.append(event("build", GoalState::InProcess, 2)).await.unwrap();
        assert!(r.handle_requested(&requested).await.unwrap().is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_implementation_surfaces_setup_error() {
        let registry = FulfillmentRegistry::new(REGISTRATION);
        let store = InMemoryGoalEventStore::new();
        let reg = registration();
        let err = runner(&registry, &store, &reg, None)
            .handle_requested(&event("build", GoalState::Requested, 1))
            .await
            .unwrap_err();
        assert!(err.is_setup_error());
    }

    struct RecordingLauncher {
        launched: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl IsolatedLauncher for RecordingLauncher {
        async fn launch(&self, _event: &GoalEvent) -> Result<()> {
            self.launched.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(GoalflowError::Isolation {
                    goal: "build".into(),
                    message: "no capacity".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn isolated_goal_is_launched_and_left_in_process() {
        let definition = GoalDefinition::new("build", Environment::Code).unwrap().isolated(true);
        let registry = registry_with(definition, |g| {
            Implementation::new("build", g, succeeds())
        });
        let store = InMemoryGoalEventStore::new();
        let reg = registration();
        let launcher = RecordingLauncher { launched: AtomicUsize::new(0), fail: false };

        let last = runner(&registry, &store, &reg, Some(&launcher))
            .handle_requested(&event("build", GoalState::Requested, 1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(last.state, GoalState::InProcess);
        assert_eq!(launcher.launched.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_launch_becomes_failure() {
        let definition = GoalDefinition::new("build", Environment::Code).unwrap().isolated(true);
        let registry = registry_with(definition, |g| {
            Implementation::new("build", g, succeeds())
        });
        let store = InMemoryGoalEventStore::new();
        let reg = registration();
        let launcher = RecordingLauncher { launched: AtomicUsize::new(0), fail: true };

        let last = runner(&registry, &store, &reg, Some(&launcher))
            .handle_requested(&event("build", GoalState::Requested, 1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(last.state, GoalState::Failure);
        assert_eq!(launcher.launched.load(Ordering::SeqCst), 1);
        assert_eq!(store.event_count().await, 2);
    }
}
