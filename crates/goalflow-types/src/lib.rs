//! Shared types, errors, goal events, and execution results for Goalflow.
//!
//! This crate provides the foundational types used across all other Goalflow crates:
//! - `GoalflowError`: unified error taxonomy
//! - `GoalState` / `Environment`: the goal state machine and phase tags
//! - `GoalEvent`: immutable observation of one goal's state
//! - `GoalSetRecord`: goal-set level state, used for queueing
//! - `ExecuteGoalResult`: result of running a fulfillment
//! - `ProgressLog`: shared log buffer handed to executors

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Unified error type for all Goalflow subsystems.
#[derive(Debug, thiserror::Error)]
pub enum GoalflowError {
    // === Validation Errors ===
    #[error("Invalid goal name '{name}': must normalize to lower-case letters, digits and hyphens")]
    InvalidGoalName { name: String },

    #[error("Validation failed: {0}")]
    ValidationError(String),

    // === Registration Errors ===
    #[error("Goal '{unique_name}' is already registered with a different definition")]
    DuplicateGoal { unique_name: String },

    #[error("Multiple fulfillments named '{name}' registered under '{registration}'")]
    DuplicateFulfillment { name: String, registration: String },

    #[error("Multiple fulfillments match goal '{goal}': {}", .matches.join(", "))]
    AmbiguousFulfillment { goal: String, matches: Vec<String> },

    #[error("No fulfillment named '{name}' registered under '{registration}'")]
    UnknownFulfillment { name: String, registration: String },

    // === Execution Errors ===
    #[error("Goal '{goal}' timed out waiting for its condition after {attempts} attempts")]
    WaitTimeout { goal: String, attempts: u32 },

    #[error("Goal '{goal}' failed with code {code}: {message}")]
    ExecutionFailed {
        goal: String,
        code: i32,
        message: String,
    },

    #[error("Isolated launch of goal '{goal}' failed: {message}")]
    Isolation { goal: String, message: String },

    // === Store Errors ===
    #[error("Event store error: {0}")]
    Store(String),

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl GoalflowError {
    /// Returns `true` for errors caused by bad definitions or conflicting
    /// registrations. These are meant to be caught during setup and are never
    /// retried.
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            GoalflowError::InvalidGoalName { .. }
                | GoalflowError::ValidationError(_)
                | GoalflowError::DuplicateGoal { .. }
                | GoalflowError::DuplicateFulfillment { .. }
                | GoalflowError::AmbiguousFulfillment { .. }
                | GoalflowError::UnknownFulfillment { .. }
        )
    }
}

/// A convenience alias for `Result<T, GoalflowError>`.
pub type Result<T> = std::result::Result<T, GoalflowError>;

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ---------------------------------------------------------------------------
// Environment: coarse phase tag namespacing goal identity
// ---------------------------------------------------------------------------

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Environment {
    #[default]
    #[serde(rename = "0-code")]
    Code,
    #[serde(rename = "1-staging")]
    Staging,
    #[serde(rename = "2-prod")]
    Production,
    #[serde(rename = "8-doom")]
    Disposal,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Code => "0-code",
            Environment::Staging => "1-staging",
            Environment::Production => "2-prod",
            Environment::Disposal => "8-doom",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// GoalState: per-goal state machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalState {
    Planned,
    Requested,
    InProcess,
    WaitingForPreApproval,
    WaitingForApproval,
    Success,
    Failure,
    Skipped,
}

impl GoalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GoalState::Planned => "planned",
            GoalState::Requested => "requested",
            GoalState::InProcess => "in_process",
            GoalState::WaitingForPreApproval => "waiting_for_pre_approval",
            GoalState::WaitingForApproval => "waiting_for_approval",
            GoalState::Success => "success",
            GoalState::Failure => "failure",
            GoalState::Skipped => "skipped",
        }
    }

    /// Success, failure and skipped end a goal's progress.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GoalState::Success | GoalState::Failure | GoalState::Skipped
        )
    }

    /// Progress rank, used only to break timestamp ties deterministically.
    pub fn rank(&self) -> u8 {
        match self {
            GoalState::Planned => 0,
            GoalState::WaitingForPreApproval => 1,
            GoalState::Requested => 2,
            GoalState::InProcess => 3,
            GoalState::WaitingForApproval => 4,
            GoalState::Skipped => 5,
            GoalState::Failure => 6,
            GoalState::Success => 7,
        }
    }
}

impl fmt::Display for GoalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Goal identity
// ---------------------------------------------------------------------------

/// Identity of a goal within a goal-set: (environment, unique name).
/// Precondition keys on events are `GoalRef`s.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GoalRef {
    pub environment: Environment,
    pub unique_name: String,
}

impl GoalRef {
    pub fn new(environment: Environment, unique_name: impl Into<String>) -> Self {
        Self {
            environment,
            unique_name: unique_name.into(),
        }
    }
}

impl fmt::Display for GoalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.environment, self.unique_name)
    }
}

/// Key of one goal occurrence: all events sharing a key describe the same goal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GoalKey {
    pub goal_set_id: String,
    pub goal: GoalRef,
}

// ---------------------------------------------------------------------------
// Provenance and registration
// ---------------------------------------------------------------------------

/// The process identity that plans, owns and reacts to goal-sets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub name: String,
    pub version: String,
}

impl Registration {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Stamp produced by `actor` acting on behalf of this registration.
    pub fn provenance(&self, actor: &str) -> Provenance {
        Provenance {
            registration: self.name.clone(),
            version: self.version.clone(),
            name: actor.to_string(),
            ts: now_millis(),
        }
    }
}

/// Who produced an event, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub registration: String,
    pub version: String,
    pub name: String,
    pub ts: i64,
}

// ---------------------------------------------------------------------------
// Fulfillment reference
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentKind {
    /// Executed locally by the registration named on the reference.
    Implementation,
    /// Completed elsewhere; the core only observes it.
    SideEffect,
    /// No fulfillment matched when the goal was planned.
    Unresolved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentRef {
    pub kind: FulfillmentKind,
    pub name: String,
    pub registration: String,
}

impl FulfillmentRef {
    pub fn unresolved() -> Self {
        Self {
            kind: FulfillmentKind::Unresolved,
            name: "unknown".into(),
            registration: "unknown".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// ChangeRef: the push a goal-set was planned for
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeRef {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub sha: String,
}

impl fmt::Display for ChangeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{} ({})", self.owner, self.repo, self.sha, self.branch)
    }
}

// ---------------------------------------------------------------------------
// GoalEvent: immutable observation of one goal's state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalEvent {
    pub goal_set_id: String,
    pub goal_set: String,
    pub unique_name: String,
    pub name: String,
    pub environment: Environment,
    pub state: GoalState,
    pub ts: i64,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    pub fulfillment: FulfillmentRef,
    #[serde(default)]
    pub preconditions: Vec<GoalRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub provenance: Vec<Provenance>,
    pub change: ChangeRef,
    #[serde(default)]
    pub retry_feasible: bool,
    #[serde(default)]
    pub approval_required: bool,
    #[serde(default)]
    pub pre_approval_required: bool,
}

impl GoalEvent {
    pub fn goal_ref(&self) -> GoalRef {
        GoalRef::new(self.environment, self.unique_name.clone())
    }

    pub fn key(&self) -> GoalKey {
        GoalKey {
            goal_set_id: self.goal_set_id.clone(),
            goal: self.goal_ref(),
        }
    }

    /// Registration that planned this goal, taken from the first provenance entry.
    pub fn owner_registration(&self) -> Option<&str> {
        self.provenance.first().map(|p| p.registration.as_str())
    }

    /// Derive a successor observation in `state`.
    ///
    /// The successor's timestamp is strictly later than this event's, even when
    /// both are produced within the same millisecond.
    pub fn evolve(
        &self,
        state: GoalState,
        description: impl Into<String>,
        provenance: Provenance,
    ) -> GoalEvent {
        let mut next = self.clone();
        next.state = state;
        next.description = description.into();
        next.ts = now_millis().max(self.ts + 1);
        next.provenance.push(provenance);
        next
    }
}

// ---------------------------------------------------------------------------
// GoalSetRecord: goal-set level state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalSetState {
    InProcess,
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalSetRecord {
    pub goal_set_id: String,
    pub goal_set: String,
    pub change: ChangeRef,
    pub state: GoalSetState,
    pub ts: i64,
    /// Name of the registration that planned and owns this goal-set.
    pub registration: String,
    pub goals: Vec<GoalRef>,
}

// ---------------------------------------------------------------------------
// ExecuteGoalResult: result of running a fulfillment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecuteGoalResult {
    /// Zero means success; anything else is a failure.
    pub code: i32,
    pub message: Option<String>,
    /// Explicit state to report instead of the one implied by `code`.
    pub state: Option<GoalState>,
    pub description: Option<String>,
    pub phase: Option<String>,
    pub data: Option<serde_json::Value>,
}

impl ExecuteGoalResult {
    /// Create a successful result.
    pub fn success() -> Self {
        Self::default()
    }

    /// Create a failed result with the given exit code and message.
    pub fn failed(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Create a zero-code result that reports an explicit state.
    pub fn in_state(state: GoalState, description: impl Into<String>) -> Self {
        Self {
            state: Some(state),
            description: Some(description.into()),
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

// ---------------------------------------------------------------------------
// ProgressLog: shared log buffer for one goal execution
// ---------------------------------------------------------------------------

/// Append-only log written by executors while a goal runs.
///
/// Cloning a `ProgressLog` yields another handle to the **same** buffer.
#[derive(Clone, Default)]
pub struct ProgressLog {
    lines: Arc<tokio::sync::RwLock<Vec<String>>>,
}

impl ProgressLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn write(&self, line: impl Into<String>) {
        self.lines.write().await.push(line.into());
    }

    pub async fn lines(&self) -> Vec<String> {
        self.lines.read().await.clone()
    }

    /// Full log text, newline separated.
    pub async fn text(&self) -> String {
        self.lines.read().await.join("\n")
    }
}
