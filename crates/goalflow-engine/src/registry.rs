//! Fulfillment registry: which executable runs a goal for a change, and which
//! implementation must handle a given event.

use std::sync::Arc;

use goalflow_types::{FulfillmentKind, GoalEvent, GoalflowError, Result};

use crate::change::ChangeContext;
use crate::fulfillment::{Fulfillment, FulfillmentCallback, Implementation, SideEffect};
use crate::goal::{Goal, GoalRegistry};

// ---------------------------------------------------------------------------
// FulfillmentRegistry
// ---------------------------------------------------------------------------

pub struct FulfillmentRegistry {
    registration: String,
    goals: GoalRegistry,
    implementations: Vec<Implementation>,
    side_effects: Vec<SideEffect>,
    callbacks: Vec<Arc<dyn FulfillmentCallback>>,
}

impl FulfillmentRegistry {
    /// Create an empty registry dispatching implementations to `registration`.
    pub fn new(registration: impl Into<String>) -> Self {
        Self {
            registration: registration.into(),
            goals: GoalRegistry::new(),
            implementations: Vec::new(),
            side_effects: Vec::new(),
            callbacks: Vec::new(),
        }
    }

    pub fn registration(&self) -> &str {
        &self.registration
    }

    pub fn goals(&self) -> &GoalRegistry {
        &self.goals
    }

    pub fn implementations(&self) -> &[Implementation] {
        &self.implementations
    }

    pub fn side_effects(&self) -> &[SideEffect] {
        &self.side_effects
    }

    pub fn callbacks(&self) -> &[Arc<dyn FulfillmentCallback>] {
        &self.callbacks
    }

    /// Register `goal` and, transitively, its preconditions.
    pub fn add_goal(&mut self, goal: &Goal) -> Result<()> {
        for precondition in goal.preconditions() {
            self.add_goal(precondition)?;
        }
        self.goals.register(goal)
    }

    /// Register an implementation and its goal.
    ///
    /// Adding the same implementation again (same name, goal instance and
    /// executor) is a no-op.
    pub fn add_implementation(&mut self, implementation: Implementation) -> Result<()> {
        self.add_goal(&implementation.goal)?;
        let already_known = self.implementations.iter().any(|existing| {
            existing.name == implementation.name
                && existing.goal.same_instance(&implementation.goal)
                && Arc::ptr_eq(&existing.executor, &implementation.executor)
        });
        if already_known {
            return Ok(());
        }
        tracing::debug!(
            goal = %implementation.goal.unique_name(),
            fulfillment = %implementation.name,
            "Registered implementation"
        );
        self.implementations.push(implementation);
        Ok(())
    }

    pub fn add_side_effect(&mut self, side_effect: SideEffect) -> Result<()> {
        self.add_goal(&side_effect.goal)?;
        let already_known = self.side_effects.iter().any(|existing| {
            existing.name == side_effect.name
                && existing.registration == side_effect.registration
                && existing.goal.same_instance(&side_effect.goal)
        });
        if !already_known {
            self.side_effects.push(side_effect);
        }
        Ok(())
    }

    /// Callbacks run in registration order before a goal is requested.
    pub fn add_fulfillment_callback(&mut self, callback: Arc<dyn FulfillmentCallback>) {
        if !self.callbacks.iter().any(|c| Arc::ptr_eq(c, &callback)) {
            self.callbacks.push(callback);
        }
    }

    /// Select the fulfillment for `goal` on `change`.
    ///
    /// Push tests of every implementation registered for the goal run
    /// concurrently. Exactly one match is returned; more than one is an
    /// [`GoalflowError::AmbiguousFulfillment`]. With no match the first side
    /// effect whose push test matches is returned, if any.
    pub async fn resolve_for_change(
        &self,
        goal: &Goal,
        change: &ChangeContext,
    ) -> Result<Option<Fulfillment>> {
        let candidates: Vec<&Implementation> = self
            .implementations
            .iter()
            .filter(|i| i.goal == *goal)
            .collect();

        let verdicts =
            futures::future::try_join_all(candidates.iter().map(|i| i.push_test.matches(change)))
                .await?;

        let mut matches: Vec<&Implementation> = candidates
            .into_iter()
            .zip(verdicts)
            .filter_map(|(i, matched)| matched.then_some(i))
            .collect();

        match matches.len() {
            0 => {}
            1 => {
                return Ok(matches.pop().cloned().map(Fulfillment::Implementation));
            }
            _ => {
                return Err(GoalflowError::AmbiguousFulfillment {
                    goal: goal.unique_name().to_string(),
                    matches: matches.iter().map(|i| i.name.clone()).collect(),
                });
            }
        }

        for side_effect in self.side_effects.iter().filter(|s| s.goal == *goal) {
            if side_effect.push_test.matches(change).await? {
                return Ok(Some(Fulfillment::SideEffect(side_effect.clone())));
            }
        }
        Ok(None)
    }

    /// Find the implementation that must handle `event`.
    pub fn resolve_for_event(&self, event: &GoalEvent) -> Result<&Implementation> {
        let fulfillment = &event.fulfillment;
        let is_local = fulfillment.kind == FulfillmentKind::Implementation
            && fulfillment.registration == self.registration;

        let mut found = self
            .implementations
            .iter()
            .filter(|i| is_local && i.name == fulfillment.name);

        match (found.next(), found.next()) {
            (Some(implementation), None) => Ok(implementation),
            (None, _) => Err(GoalflowError::UnknownFulfillment {
                name: fulfillment.name.clone(),
                registration: fulfillment.registration.clone(),
            }),
            (Some(_), Some(_)) => Err(GoalflowError::DuplicateFulfillment {
                name: fulfillment.name.clone(),
                registration: fulfillment.registration.clone(),
            }),
        }
    }
}
