//! Goal definitions, goal identity, and the name registry.
//!
//! A [`Goal`] is a cheap-to-clone handle over an immutable [`GoalDefinition`]
//! plus its precondition goals. Preconditions are fixed at construction, so a
//! goal can only depend on goals that already exist and the precondition
//! graph is acyclic by construction.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

use goalflow_types::{Environment, GoalRef, GoalState, GoalflowError, Result};
use regex::Regex;

// ---------------------------------------------------------------------------
// Name normalization
// ---------------------------------------------------------------------------

fn slug_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9-]*$").expect("slug pattern is valid"))
}

/// Normalize a goal name into its unique slug form.
///
/// Lower-cases the name and replaces spaces and underscores with hyphens. The
/// result must be a slug of lower-case letters, digits and hyphens starting
/// with a letter or digit.
pub fn normalize_goal_name(name: &str) -> Result<String> {
    let normalized: String = name
        .trim()
        .chars()
        .map(|c| match c {
            ' ' | '_' => '-',
            other => other.to_ascii_lowercase(),
        })
        .collect();
    if slug_pattern().is_match(&normalized) {
        Ok(normalized)
    } else {
        Err(GoalflowError::InvalidGoalName {
            name: name.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// GoalDescriptions: per-state display text
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoalDescriptions {
    pub planned: String,
    pub requested: String,
    pub in_process: String,
    pub waiting_for_pre_approval: String,
    pub waiting_for_approval: String,
    pub completed: String,
    pub failed: String,
    pub skipped: String,
}

impl GoalDescriptions {
    /// Default texts derived from the goal's display name.
    pub fn for_name(name: &str) -> Self {
        Self {
            planned: format!("Planned: {name}"),
            requested: format!("Ready: {name}"),
            in_process: format!("Working: {name}"),
            waiting_for_pre_approval: format!("Start required: {name}"),
            waiting_for_approval: format!("Approval required: {name}"),
            completed: format!("Complete: {name}"),
            failed: format!("Failed: {name}"),
            skipped: format!("Skipped: {name}"),
        }
    }

    pub fn for_state(&self, state: GoalState) -> &str {
        match state {
            GoalState::Planned => &self.planned,
            GoalState::Requested => &self.requested,
            GoalState::InProcess => &self.in_process,
            GoalState::WaitingForPreApproval => &self.waiting_for_pre_approval,
            GoalState::WaitingForApproval => &self.waiting_for_approval,
            GoalState::Success => &self.completed,
            GoalState::Failure => &self.failed,
            GoalState::Skipped => &self.skipped,
        }
    }
}

// ---------------------------------------------------------------------------
// GoalDefinition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoalDefinition {
    pub unique_name: String,
    pub display_name: String,
    pub environment: Environment,
    pub descriptions: GoalDescriptions,
    /// Run out of process through the isolated launcher when one is configured.
    pub isolated: bool,
    /// A successful run parks the goal in `waiting_for_approval`.
    pub approval_required: bool,
    /// The goal waits for a start signal instead of being requested directly.
    pub pre_approval_required: bool,
    /// A failed goal may be re-requested when a precondition succeeds again.
    pub retry_feasible: bool,
}

impl GoalDefinition {
    /// Create a definition, normalizing `name` into the unique name.
    pub fn new(name: &str, environment: Environment) -> Result<Self> {
        let unique_name = normalize_goal_name(name)?;
        let display_name = name.trim().to_string();
        Ok(Self {
            descriptions: GoalDescriptions::for_name(&display_name),
            unique_name,
            display_name,
            environment,
            isolated: false,
            approval_required: false,
            pre_approval_required: false,
            retry_feasible: false,
        })
    }

    pub fn with_descriptions(mut self, descriptions: GoalDescriptions) -> Self {
        self.descriptions = descriptions;
        self
    }

    pub fn isolated(mut self, isolated: bool) -> Self {
        self.isolated = isolated;
        self
    }

    pub fn approval_required(mut self, required: bool) -> Self {
        self.approval_required = required;
        self
    }

    pub fn pre_approval_required(mut self, required: bool) -> Self {
        self.pre_approval_required = required;
        self
    }

    pub fn retry_feasible(mut self, feasible: bool) -> Self {
        self.retry_feasible = feasible;
        self
    }
}

// ---------------------------------------------------------------------------
// Goal
// ---------------------------------------------------------------------------

/// A pipeline step: an immutable definition plus its precondition goals.
///
/// Equality and hashing use (environment, unique name). Use
/// [`Goal::same_instance`] to tell two separately constructed goals apart.
#[derive(Debug, Clone)]
pub struct Goal {
    definition: Arc<GoalDefinition>,
    preconditions: Arc<[Goal]>,
}

impl Goal {
    pub fn new(definition: GoalDefinition) -> Self {
        Self::with_preconditions(definition, Vec::new())
    }

    /// Create a goal that may only start once every goal in `preconditions`
    /// has succeeded. Order is kept for diagnostics only.
    pub fn with_preconditions(definition: GoalDefinition, preconditions: Vec<Goal>) -> Self {
        Self {
            definition: Arc::new(definition),
            preconditions: preconditions.into(),
        }
    }

    pub fn definition(&self) -> &GoalDefinition {
        &self.definition
    }

    pub fn unique_name(&self) -> &str {
        &self.definition.unique_name
    }

    pub fn environment(&self) -> Environment {
        self.definition.environment
    }

    pub fn goal_ref(&self) -> GoalRef {
        GoalRef::new(self.definition.environment, self.definition.unique_name.clone())
    }

    pub fn preconditions(&self) -> &[Goal] {
        &self.preconditions
    }

    pub fn description_for(&self, state: GoalState) -> &str {
        self.definition.descriptions.for_state(state)
    }

    pub fn same_instance(&self, other: &Goal) -> bool {
        Arc::ptr_eq(&self.definition, &other.definition)
    }
}

impl PartialEq for Goal {
    fn eq(&self, other: &Self) -> bool {
        self.environment() == other.environment() && self.unique_name() == other.unique_name()
    }
}

impl Eq for Goal {}

impl Hash for Goal {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.environment().hash(state);
        self.unique_name().hash(state);
    }
}

// ---------------------------------------------------------------------------
// GoalRegistry
// ---------------------------------------------------------------------------

/// Registry of known goals keyed by unique name.
///
/// Registering the same instance again is a no-op; registering a different
/// instance under a name already in use fails.
#[derive(Debug, Default)]
pub struct GoalRegistry {
    goals: HashMap<String, Goal>,
    order: Vec<String>,
}

impl GoalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, goal: &Goal) -> Result<()> {
        match self.goals.get(goal.unique_name()) {
            Some(existing) if existing.same_instance(goal) => Ok(()),
            Some(_) => Err(GoalflowError::DuplicateGoal {
                unique_name: goal.unique_name().to_string(),
            }),
            None => {
                self.order.push(goal.unique_name().to_string());
                self.goals.insert(goal.unique_name().to_string(), goal.clone());
                Ok(())
            }
        }
    }

    pub fn get(&self, unique_name: &str) -> Option<&Goal> {
        self.goals.get(unique_name)
    }

    /// Registered goals in registration order.
    pub fn goals(&self) -> impl Iterator<Item = &Goal> {
        self.order.iter().filter_map(|name| self.goals.get(name))
    }

    pub fn len(&self) -> usize {
        self.goals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.goals.is_empty()
    }
}
