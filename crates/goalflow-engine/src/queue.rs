//! Cooperative queue bounding how many goal-sets progress at once.
//!
//! The queue is an ordinary goal. Its executor reports `success` when the
//! goal-set holds one of the first `concurrent` slots among in-process
//! goal-sets, and `in_process` otherwise; a sweep triggered by goal-set events
//! later promotes waiting queue goals once slots free up.

use std::sync::Arc;

use async_trait::async_trait;
use goalflow_types::{
    Environment, ExecuteGoalResult, GoalSetRecord, GoalState, Registration, Result,
};
use serde::{Deserialize, Serialize};

use crate::fulfillment::{GoalExecutor, GoalInvocation, Implementation};
use crate::goal::{Goal, GoalDefinition, GoalDescriptions};
use crate::reconcile::reconcile_key;
use crate::store::{fetch_all_events, GoalEventFilter, GoalEventStore, GoalSetFilter, PageRequest};

pub const QUEUE_GOAL: &str = "queue";
const ACTOR: &str = "queue";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueOptions {
    /// Goal-sets allowed to progress at the same time.
    pub concurrent: usize,
    /// Extra goal-sets read beyond the active ones.
    pub fetch: usize,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            concurrent: 2,
            fetch: 10,
        }
    }
}

/// In-process goal-sets of `registration`, oldest first.
async fn active_goal_sets(
    store: &dyn GoalEventStore,
    registration: &str,
    options: &QueueOptions,
) -> Result<Vec<GoalSetRecord>> {
    let page = store
        .query_goal_sets(
            &GoalSetFilter::in_process_for(registration),
            PageRequest::first(options.fetch + options.concurrent),
        )
        .await?;
    Ok(page.items)
}

// ---------------------------------------------------------------------------
// QueueExecutor
// ---------------------------------------------------------------------------

struct QueueExecutor {
    store: Arc<dyn GoalEventStore>,
    registration: String,
    options: QueueOptions,
}

#[async_trait]
impl GoalExecutor for QueueExecutor {
    async fn execute(&self, invocation: &GoalInvocation) -> Result<ExecuteGoalResult> {
        let active =
            active_goal_sets(self.store.as_ref(), &self.registration, &self.options).await?;
        let position = active
            .iter()
            .position(|r| r.goal_set_id == invocation.event.goal_set_id);
        match position {
            Some(i) if i < self.options.concurrent => Ok(ExecuteGoalResult::success()),
            Some(i) => Ok(ExecuteGoalResult::in_state(
                GoalState::InProcess,
                format!("Queued: position {}", i + 1 - self.options.concurrent),
            )),
            None => Ok(ExecuteGoalResult::in_state(GoalState::InProcess, "Queued")),
        }
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

pub struct Queue {
    goal: Goal,
    options: QueueOptions,
}

impl Queue {
    pub fn new(options: QueueOptions) -> Result<Self> {
        let mut descriptions = GoalDescriptions::for_name("Queue");
        descriptions.requested = "Queued".into();
        descriptions.in_process = "Queued".into();
        descriptions.completed = "Dequeued".into();
        let definition =
            GoalDefinition::new(QUEUE_GOAL, Environment::Code)?.with_descriptions(descriptions);
        Ok(Self {
            goal: Goal::new(definition),
            options,
        })
    }

    /// The queue goal. Other goals of a goal-set list it as a precondition.
    pub fn goal(&self) -> &Goal {
        &self.goal
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    /// Implementation polling `store` for this registration's goal-sets.
    pub fn implementation(
        &self,
        store: Arc<dyn GoalEventStore>,
        registration: impl Into<String>,
    ) -> Implementation {
        let executor = Arc::new(QueueExecutor {
            store,
            registration: registration.into(),
            options: self.options,
        });
        Implementation::new(QUEUE_GOAL, &self.goal, executor)
    }

    /// Promote waiting queue goals of the goal-sets holding the first
    /// `concurrent` slots. Only in-process goal-sets that contain the queue
    /// goal take a slot. Returns how many were promoted.
    pub async fn sweep(
        &self,
        store: &dyn GoalEventStore,
        registration: &Registration,
        page_size: usize,
    ) -> Result<usize> {
        let active = active_goal_sets(store, &registration.name, &self.options).await?;

        let mut slots = Vec::new();
        for record in &active {
            if slots.len() == self.options.concurrent {
                break;
            }
            let filter = GoalEventFilter::for_goal_set(&record.goal_set_id)
                .with_unique_name(self.goal.unique_name());
            let events = fetch_all_events(store, &filter, page_size).await?;
            let current = reconcile_key(
                events
                    .iter()
                    .filter(|e| e.environment == self.goal.environment()),
            );
            if let Some(queue_goal) = current {
                slots.push(queue_goal.clone());
            }
        }

        let mut promoted = 0;
        for queue_goal in slots.iter().filter(|e| e.state == GoalState::InProcess) {
            let update = queue_goal.evolve(
                GoalState::Success,
                self.goal.description_for(GoalState::Success),
                registration.provenance(ACTOR),
            );
            store.append(update).await?;
            tracing::info!(goal_set = %queue_goal.goal_set_id, "Dequeued goal-set");
            promoted += 1;
        }
        Ok(promoted)
    }
}
