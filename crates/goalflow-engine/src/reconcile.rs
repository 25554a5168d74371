//! Reduce duplicated, out-of-order goal events to one authoritative state.
//!
//! Events for the same key may arrive several times and in any order. The
//! reduction is:
//! - a `success` event beats every non-success event, whatever its timestamp;
//! - otherwise the most recent timestamp wins;
//! - remaining ties go to the more progressed state;
//! - events still tied are ordered by their serialized form.
//!
//! The whole winning event, not only its state, does not depend on input
//! order and is unchanged by duplicates.

use std::cmp::Ordering;
use std::collections::HashMap;

use goalflow_types::{GoalEvent, GoalRef, GoalSetState, GoalState};

fn precedence(event: &GoalEvent) -> (bool, i64, u8) {
    (
        event.state == GoalState::Success,
        event.ts,
        event.state.rank(),
    )
}

/// Total order over otherwise tied events.
fn canonical(event: &GoalEvent) -> String {
    serde_json::to_string(event).unwrap_or_default()
}

fn compare(a: &GoalEvent, b: &GoalEvent) -> Ordering {
    precedence(a)
        .cmp(&precedence(b))
        .then_with(|| canonical(a).cmp(&canonical(b)))
}

/// Pick the authoritative event among all known events for one key.
pub fn reconcile_key<'a, I>(events: I) -> Option<&'a GoalEvent>
where
    I: IntoIterator<Item = &'a GoalEvent>,
{
    events.into_iter().max_by(|a, b| compare(a, b))
}

// ---------------------------------------------------------------------------
// GoalSetView: reconciled state of one goal-set
// ---------------------------------------------------------------------------

/// One authoritative event per goal of a goal-set.
#[derive(Debug, Clone, Default)]
pub struct GoalSetView {
    goals: Vec<GoalEvent>,
    index: HashMap<GoalRef, usize>,
}

impl GoalSetView {
    /// Reconcile every event of one goal-set.
    pub fn reconcile(events: &[GoalEvent]) -> Self {
        let mut groups: Vec<(GoalRef, Vec<&GoalEvent>)> = Vec::new();
        let mut positions: HashMap<GoalRef, usize> = HashMap::new();
        for event in events {
            let goal = event.goal_ref();
            match positions.get(&goal) {
                Some(&i) => groups[i].1.push(event),
                None => {
                    positions.insert(goal.clone(), groups.len());
                    groups.push((goal, vec![event]));
                }
            }
        }

        let mut view = GoalSetView::default();
        for (goal, group) in groups {
            if let Some(winner) = reconcile_key(group) {
                view.index.insert(goal, view.goals.len());
                view.goals.push(winner.clone());
            }
        }
        view
    }

    /// Reconcile a previously fetched snapshot, letting `fresh` override every
    /// snapshot entry for its key regardless of timestamps.
    ///
    /// A bulk read racing a live event can therefore never shadow the event
    /// that triggered the reaction.
    pub fn reconcile_with_override(snapshot: &[GoalEvent], fresh: &GoalEvent) -> Self {
        let fresh_key = fresh.key();
        let mut view = Self::reconcile(snapshot);
        let goal = fresh_key.goal;
        match view.index.get(&goal) {
            Some(&i) => view.goals[i] = fresh.clone(),
            None => {
                view.index.insert(goal, view.goals.len());
                view.goals.push(fresh.clone());
            }
        }
        view
    }

    pub fn get(&self, goal: &GoalRef) -> Option<&GoalEvent> {
        self.index.get(goal).map(|&i| &self.goals[i])
    }

    /// Goals in order of first appearance.
    pub fn goals(&self) -> &[GoalEvent] {
        &self.goals
    }

    pub fn len(&self) -> usize {
        self.goals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.goals.is_empty()
    }

    /// True when every goal has reached a terminal state.
    pub fn is_complete(&self) -> bool {
        !self.goals.is_empty() && self.goals.iter().all(|g| g.state.is_terminal())
    }

    /// Overall goal-set state once complete.
    pub fn outcome(&self) -> Option<GoalSetState> {
        if !self.is_complete() {
            return None;
        }
        if self.goals.iter().any(|g| g.state == GoalState::Failure) {
            Some(GoalSetState::Failure)
        } else {
            Some(GoalSetState::Success)
        }
    }
}
