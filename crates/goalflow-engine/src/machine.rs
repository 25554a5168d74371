//! `GoalMachine`: registration API, planning, and event dispatch.
//!
//! Goals and fulfillments are registered up front through `&mut self`; the
//! machine is then shared behind an `Arc` and fed store events through
//! [`GoalMachine::run`] (or the `handle_*` methods directly).

use std::sync::Arc;

use goalflow_types::{ChangeRef, GoalEvent, GoalSetRecord, GoalState, Registration, Result};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::change::{ChangeContext, ChangeContextProvider};
use crate::config::GoalflowConfig;
use crate::events::StoreEvent;
use crate::execution::{GoalRunner, IsolatedLauncher};
use crate::fulfillment::{FulfillmentCallback, Implementation, SideEffect};
use crate::goal::Goal;
use crate::goal_set::{plan_goal_set, GoalSet, PlannedGoalSet};
use crate::queue::Queue;
use crate::reactors::{
    on_failure, on_success, on_terminal, GoalCompletionListener, OwnedByRegistration,
    ReactorContext, RelevancePredicate,
};
use crate::reconcile::GoalSetView;
use crate::registry::FulfillmentRegistry;
use crate::store::{fetch_goal_set_events, GoalEventStore};

pub struct GoalMachine {
    config: GoalflowConfig,
    registry: FulfillmentRegistry,
    store: Arc<dyn GoalEventStore>,
    relevance: Arc<dyn RelevancePredicate>,
    change_provider: Option<Arc<dyn ChangeContextProvider>>,
    launcher: Option<Arc<dyn IsolatedLauncher>>,
    listeners: Vec<Arc<dyn GoalCompletionListener>>,
    queue: Option<Queue>,
}

impl GoalMachine {
    /// Create a machine for `config`, installing the queue goal when the
    /// configuration enables it.
    pub fn new(config: GoalflowConfig, store: Arc<dyn GoalEventStore>) -> Result<Self> {
        config.validate()?;
        let mut machine = Self {
            registry: FulfillmentRegistry::new(config.registration.name.clone()),
            relevance: Arc::new(OwnedByRegistration::new(config.registration.name.clone())),
            config,
            store,
            change_provider: None,
            launcher: None,
            listeners: Vec::new(),
            queue: None,
        };
        if let Some(options) = machine.config.queue {
            let queue = Queue::new(options)?;
            let implementation = queue.implementation(
                machine.store.clone(),
                machine.config.registration.name.clone(),
            );
            machine.registry.add_implementation(implementation)?;
            machine.queue = Some(queue);
        }
        Ok(machine)
    }

    pub fn with_change_provider(mut self, provider: Arc<dyn ChangeContextProvider>) -> Self {
        self.change_provider = Some(provider);
        self
    }

    pub fn with_isolated_launcher(mut self, launcher: Arc<dyn IsolatedLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn with_relevance(mut self, relevance: Arc<dyn RelevancePredicate>) -> Self {
        self.relevance = relevance;
        self
    }

    // --- registration ------------------------------------------------------

    pub fn add_goal(&mut self, goal: &Goal) -> Result<()> {
        self.registry.add_goal(goal)
    }

    pub fn add_implementation(&mut self, implementation: Implementation) -> Result<()> {
        self.registry.add_implementation(implementation)
    }

    pub fn add_side_effect(&mut self, side_effect: SideEffect) -> Result<()> {
        self.registry.add_side_effect(side_effect)
    }

    pub fn add_fulfillment_callback(&mut self, callback: Arc<dyn FulfillmentCallback>) {
        self.registry.add_fulfillment_callback(callback);
    }

    pub fn add_completion_listener(&mut self, listener: Arc<dyn GoalCompletionListener>) {
        if !self.listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            self.listeners.push(listener);
        }
    }

    // --- accessors ---------------------------------------------------------

    pub fn config(&self) -> &GoalflowConfig {
        &self.config
    }

    pub fn registration(&self) -> &Registration {
        &self.config.registration
    }

    pub fn registry(&self) -> &FulfillmentRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn GoalEventStore> {
        &self.store
    }

    /// The queue, when configured. Its goal must be added to goal-sets (and
    /// listed as a precondition) to take effect.
    pub fn queue(&self) -> Option<&Queue> {
        self.queue.as_ref()
    }

    fn reactor_context(&self) -> ReactorContext<'_> {
        ReactorContext {
            registry: &self.registry,
            store: self.store.as_ref(),
            registration: &self.config.registration,
            relevance: self.relevance.as_ref(),
            change_provider: self.change_provider.as_deref(),
            page_size: self.config.store.page_size,
        }
    }

    fn runner(&self) -> GoalRunner<'_> {
        GoalRunner {
            registry: &self.registry,
            store: self.store.as_ref(),
            registration: &self.config.registration,
            launcher: self.launcher.as_deref(),
            page_size: self.config.store.page_size,
        }
    }

    // --- planning ----------------------------------------------------------

    /// Plan `goal_set` for `change` and persist the record and initial events.
    pub async fn plan(&self, goal_set: &GoalSet, change: &ChangeRef) -> Result<PlannedGoalSet> {
        let context = match &self.change_provider {
            Some(provider) => provider.fetch(change).await?,
            None => ChangeContext::new(change.clone()),
        };
        let planned =
            plan_goal_set(&self.registry, goal_set, &context, &self.config.registration).await?;
        self.store.append_goal_set(planned.record.clone()).await?;
        for event in planned.persistence_order() {
            self.store.append(event.clone()).await?;
        }
        Ok(planned)
    }

    /// Reconciled state of a goal-set as currently stored.
    pub async fn goal_set_view(&self, goal_set_id: &str) -> Result<GoalSetView> {
        let events =
            fetch_goal_set_events(self.store.as_ref(), goal_set_id, self.config.store.page_size)
                .await?;
        Ok(GoalSetView::reconcile(&events))
    }

    // --- dispatch ----------------------------------------------------------

    pub async fn handle_goal_event(&self, event: &GoalEvent) -> Result<()> {
        let ctx = self.reactor_context();
        match event.state {
            GoalState::Requested => {
                self.runner().handle_requested(event).await?;
            }
            GoalState::Success => {
                let propagated = on_success(&ctx, event).await;
                let completed = on_terminal(&ctx, event, &self.listeners).await;
                propagated?;
                completed?;
            }
            GoalState::Failure => {
                let propagated = on_failure(&ctx, event).await;
                let completed = on_terminal(&ctx, event, &self.listeners).await;
                propagated?;
                completed?;
            }
            GoalState::Skipped => on_terminal(&ctx, event, &self.listeners).await?,
            _ => {}
        }
        Ok(())
    }

    pub async fn handle_goal_set_event(&self, record: &GoalSetRecord) -> Result<()> {
        let Some(queue) = &self.queue else {
            return Ok(());
        };
        if record.registration != self.config.registration.name {
            return Ok(());
        }
        let promoted = queue
            .sweep(
                self.store.as_ref(),
                &self.config.registration,
                self.config.store.page_size,
            )
            .await?;
        if promoted > 0 {
            tracing::debug!(goal_set = %record.goal_set_id, promoted, "Queue sweep");
        }
        Ok(())
    }

    pub async fn handle(&self, event: StoreEvent) -> Result<()> {
        match event {
            StoreEvent::Goal(e) => self.handle_goal_event(&e).await,
            StoreEvent::GoalSet(r) => self.handle_goal_set_event(&r).await,
        }
    }

    /// Dispatch every event from `receiver` to its own task until the channel
    /// closes.
    pub async fn run(self: Arc<Self>, mut receiver: broadcast::Receiver<StoreEvent>) {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    let machine = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = machine.handle(event).await {
                            if e.is_setup_error() {
                                tracing::error!(error = %e, "Goal machine misconfigured");
                            } else {
                                tracing::warn!(error = %e, "Failed to handle store event");
                            }
                        }
                    });
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event subscriber lagged; events were dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
        tracing::debug!("Event stream closed");
    }
}
