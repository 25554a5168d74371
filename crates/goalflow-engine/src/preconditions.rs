//! Precondition evaluation against a reconciled goal-set.

use goalflow_types::{GoalEvent, GoalRef, GoalState};

use crate::reconcile::GoalSetView;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreconditionStatus {
    /// Every precondition succeeded (or could not be found).
    Satisfied,
    /// Some preconditions have not finished yet; evaluate again later.
    NotYet { waiting_on: Vec<GoalRef> },
    /// A precondition failed or was skipped; the goal can never start.
    Failed { failed: Vec<GoalRef> },
}

impl PreconditionStatus {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, PreconditionStatus::Satisfied)
    }
}

/// Decide whether `goal`'s preconditions are met within `view`.
///
/// A precondition key with no sibling in the view counts as satisfied. This
/// can hide lost events, so every occurrence is logged at `warn`.
pub fn evaluate(goal: &GoalEvent, view: &GoalSetView) -> PreconditionStatus {
    let mut waiting_on = Vec::new();
    let mut failed = Vec::new();

    for key in &goal.preconditions {
        match view.get(key).map(|sibling| sibling.state) {
            Some(GoalState::Success) => {}
            Some(GoalState::Failure) | Some(GoalState::Skipped) => failed.push(key.clone()),
            Some(_) => waiting_on.push(key.clone()),
            None => {
                tracing::warn!(
                    goal = %goal.unique_name,
                    goal_set = %goal.goal_set_id,
                    precondition = %key,
                    "Precondition not found among siblings; treating it as satisfied"
                );
            }
        }
    }

    if !failed.is_empty() {
        PreconditionStatus::Failed { failed }
    } else if !waiting_on.is_empty() {
        PreconditionStatus::NotYet { waiting_on }
    } else {
        PreconditionStatus::Satisfied
    }
}
