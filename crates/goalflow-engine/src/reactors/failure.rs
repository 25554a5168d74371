//! Skip planned goals that can no longer run because a precondition failed.

use std::collections::HashSet;

use goalflow_types::{GoalEvent, GoalRef, GoalState, Result};
use serde_json::json;

use crate::goal::GoalDescriptions;
use crate::reconcile::GoalSetView;

use super::ReactorContext;

const ACTOR: &str = "failure-reactor";

/// True when `goal` reaches `failed` through its precondition chain.
fn depends_on(goal: &GoalEvent, failed: &GoalRef, view: &GoalSetView) -> bool {
    let mut visited: HashSet<&GoalRef> = HashSet::new();
    let mut pending: Vec<&GoalRef> = goal.preconditions.iter().collect();
    while let Some(key) = pending.pop() {
        if key == failed {
            return true;
        }
        if !visited.insert(key) {
            continue;
        }
        if let Some(upstream) = view.get(key) {
            pending.extend(upstream.preconditions.iter());
        }
    }
    false
}

/// Planned goals that transitively depend on `failed`.
pub fn blocked_goals<'v>(failed: &GoalEvent, view: &'v GoalSetView) -> Vec<&'v GoalEvent> {
    let failed_ref = failed.goal_ref();
    view.goals()
        .iter()
        .filter(|g| g.state == GoalState::Planned)
        .filter(|g| depends_on(g, &failed_ref, view))
        .collect()
}

/// React to a `failure` event by skipping every planned goal downstream of it.
pub async fn on_failure(ctx: &ReactorContext<'_>, event: &GoalEvent) -> Result<Vec<GoalEvent>> {
    if event.state != GoalState::Failure || !ctx.is_relevant(event, ACTOR) {
        return Ok(Vec::new());
    }

    let view = ctx.view_with(event).await?;
    let failed_ref = event.goal_ref();
    let updates: Vec<GoalEvent> = blocked_goals(event, &view)
        .into_iter()
        .map(|blocked| {
            let skipped = match ctx.registry.goals().get(&blocked.unique_name) {
                Some(goal) => goal.description_for(GoalState::Skipped).to_string(),
                None => GoalDescriptions::for_name(&blocked.name).skipped,
            };
            let mut update = blocked.evolve(
                GoalState::Skipped,
                format!("{skipped} ({} failed)", event.name),
                ctx.registration.provenance(ACTOR),
            );
            update.data = Some(json!({ "skipped_because": failed_ref }));
            update
        })
        .collect();

    if updates.is_empty() {
        return Ok(updates);
    }
    ctx.append_all(&updates).await?;
    Ok(updates)
}
