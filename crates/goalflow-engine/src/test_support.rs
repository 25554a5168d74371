//! Fixtures shared by unit tests.

use goalflow_types::{
    ChangeRef, Environment, FulfillmentKind, FulfillmentRef, GoalEvent, GoalRef, GoalSetRecord,
    GoalSetState, GoalState, Provenance, Registration,
};

pub const REGISTRATION: &str = "test-sdm";

pub fn registration() -> Registration {
    Registration::new(REGISTRATION, "0.1.0")
}

pub fn change() -> ChangeRef {
    ChangeRef {
        owner: "acme".into(),
        repo: "app".into(),
        branch: "main".into(),
        sha: "abc123".into(),
    }
}

pub fn code(name: &str) -> GoalRef {
    GoalRef::new(Environment::Code, name)
}

/// Event for goal `name` in goal-set `gs-1`, planned by [`REGISTRATION`].
pub fn event(name: &str, state: GoalState, ts: i64) -> GoalEvent {
    GoalEvent {
        goal_set_id: "gs-1".into(),
        goal_set: "default".into(),
        unique_name: name.into(),
        name: name.into(),
        environment: Environment::Code,
        state,
        ts,
        description: format!("{state}: {name}"),
        phase: None,
        fulfillment: FulfillmentRef {
            kind: FulfillmentKind::Implementation,
            name: name.into(),
            registration: REGISTRATION.into(),
        },
        preconditions: vec![],
        data: None,
        provenance: vec![Provenance {
            registration: REGISTRATION.into(),
            version: "0.1.0".into(),
            name: "planner".into(),
            ts,
        }],
        change: change(),
        retry_feasible: false,
        approval_required: false,
        pre_approval_required: false,
    }
}

pub fn event_after(name: &str, state: GoalState, ts: i64, preconditions: &[&str]) -> GoalEvent {
    let mut e = event(name, state, ts);
    e.preconditions = preconditions.iter().map(|p| code(p)).collect();
    e
}

pub fn goal_set_record(id: &str, state: GoalSetState, ts: i64) -> GoalSetRecord {
    GoalSetRecord {
        goal_set_id: id.into(),
        goal_set: "default".into(),
        change: change(),
        state,
        ts,
        registration: REGISTRATION.into(),
        goals: vec![code("build")],
    }
}
