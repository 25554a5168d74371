//! Goal-sets and planning them into an initial event batch.

use goalflow_types::{
    now_millis, FulfillmentRef, GoalEvent, GoalSetRecord, GoalSetState, GoalState, GoalflowError,
    Registration, Result,
};

use crate::change::ChangeContext;
use crate::goal::Goal;
use crate::registry::FulfillmentRegistry;

/// Named, ordered collection of goals planned together for one change.
#[derive(Debug, Clone)]
pub struct GoalSet {
    name: String,
    goals: Vec<Goal>,
}

impl GoalSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            goals: Vec::new(),
        }
    }

    /// Append `goal`. A goal equal to one already in the set is rejected.
    pub fn with_goal(mut self, goal: Goal) -> Result<Self> {
        if self.goals.contains(&goal) {
            return Err(GoalflowError::DuplicateGoal {
                unique_name: goal.unique_name().to_string(),
            });
        }
        self.goals.push(goal);
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn goals(&self) -> &[Goal] {
        &self.goals
    }
}

/// A planned goal-set ready to be persisted.
#[derive(Debug, Clone)]
pub struct PlannedGoalSet {
    pub record: GoalSetRecord,
    /// Initial events in goal-set order.
    pub events: Vec<GoalEvent>,
}

impl PlannedGoalSet {
    /// Initial events in the order they must be persisted: every event that
    /// waits on something first, then the `requested` ones.
    ///
    /// A requested goal can run and finish as soon as it is stored, and the
    /// reactors only see dependents that are already in the store.
    pub fn persistence_order(&self) -> impl Iterator<Item = &GoalEvent> {
        let waiting = self.events.iter().filter(|e| e.state != GoalState::Requested);
        let runnable = self.events.iter().filter(|e| e.state == GoalState::Requested);
        waiting.chain(runnable)
    }
}

fn initial_state(goal: &Goal) -> GoalState {
    if !goal.preconditions().is_empty() {
        GoalState::Planned
    } else if goal.definition().pre_approval_required {
        GoalState::WaitingForPreApproval
    } else {
        GoalState::Requested
    }
}

/// Plan `goal_set` for `change`, resolving a fulfillment per goal.
///
/// Goals without preconditions start requested, or waiting for pre-approval
/// when they need it; the rest start planned. Fulfillment callbacks are
/// applied to the goals that start requested.
pub async fn plan_goal_set(
    registry: &FulfillmentRegistry,
    goal_set: &GoalSet,
    change: &ChangeContext,
    registration: &Registration,
) -> Result<PlannedGoalSet> {
    let goal_set_id = uuid::Uuid::new_v4().to_string();
    let ts = now_millis();
    let mut events = Vec::with_capacity(goal_set.goals().len());

    for goal in goal_set.goals() {
        let fulfillment = match registry.resolve_for_change(goal, change).await? {
            Some(f) => f.to_ref(registry.registration()),
            None => {
                tracing::warn!(
                    goal = %goal.unique_name(),
                    change = %change.change,
                    "No fulfillment matches goal"
                );
                FulfillmentRef::unresolved()
            }
        };
        let definition = goal.definition();
        let state = initial_state(goal);
        let mut event = GoalEvent {
            goal_set_id: goal_set_id.clone(),
            goal_set: goal_set.name().to_string(),
            unique_name: definition.unique_name.clone(),
            name: definition.display_name.clone(),
            environment: definition.environment,
            state,
            ts,
            description: goal.description_for(state).to_string(),
            phase: None,
            fulfillment,
            preconditions: goal.preconditions().iter().map(Goal::goal_ref).collect(),
            data: None,
            provenance: vec![registration.provenance("planner")],
            change: change.change.clone(),
            retry_feasible: definition.retry_feasible,
            approval_required: definition.approval_required,
            pre_approval_required: definition.pre_approval_required,
        };
        if state == GoalState::Requested {
            for callback in registry.callbacks() {
                event = callback.before_request(event, change).await?;
            }
        }
        events.push(event);
    }

    let record = GoalSetRecord {
        goal_set_id,
        goal_set: goal_set.name().to_string(),
        change: change.change.clone(),
        state: GoalSetState::InProcess,
        ts,
        registration: registration.name.clone(),
        goals: goal_set.goals().iter().map(Goal::goal_ref).collect(),
    };

    tracing::info!(
        goal_set = %record.goal_set_id,
        name = %record.goal_set,
        goals = events.len(),
        "Planned goal-set"
    );
    Ok(PlannedGoalSet { record, events })
}
