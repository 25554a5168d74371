//! Goal orchestration engine for delivery pipelines.
//!
//! This crate implements the Goalflow core: goal definitions and registries,
//! reconciliation of out-of-order goal events, precondition evaluation,
//! fulfillment selection, wait/retry execution wrappers, propagation reactors,
//! the cooperative queue, and the machine wiring them to an event store.

pub mod change;
pub mod config;
pub mod events;
pub mod execution;
pub mod fulfillment;
pub mod goal;
pub mod goal_set;
pub mod machine;
pub mod preconditions;
pub mod predicated;
pub mod queue;
pub mod reactors;
pub mod reconcile;
pub mod registry;
pub mod retry;
pub mod store;

#[cfg(test)]
mod test_support;

pub use change::{ChangeContext, ChangeContextProvider, StaticChangeContextProvider};
pub use config::{GoalflowConfig, RetryOptions, StoreOptions};
pub use events::{EventBus, StoreEvent};
pub use execution::{GoalRunner, IsolatedLauncher};
pub use fulfillment::{
    executor_fn, push_test, AlwaysPushTest, FnCallback, FnExecutor, FnPushTest, Fulfillment,
    FulfillmentCallback, GoalExecutor, GoalInvocation, Implementation, InterpretedLog,
    LogInterpreter, PatternProgressReporter, ProgressReporter, PushTest, SideEffect,
    TailLogInterpreter,
};
pub use goal::{normalize_goal_name, Goal, GoalDefinition, GoalDescriptions, GoalRegistry};
pub use goal_set::{plan_goal_set, GoalSet, PlannedGoalSet};
pub use machine::GoalMachine;
pub use preconditions::{evaluate as evaluate_preconditions, PreconditionStatus};
pub use predicated::{condition_fn, predicated, FnCondition, GoalCondition, WaitRules};
pub use queue::{Queue, QueueOptions, QUEUE_GOAL};
pub use reactors::{
    completion_listener_fn, GoalCompletion, GoalCompletionListener, OwnedByRegistration,
    ReactorContext, RelevancePredicate,
};
pub use reconcile::{reconcile_key, GoalSetView};
pub use registry::FulfillmentRegistry;
pub use retry::{execute_with_retry, retrying, BackoffPolicy, RetryPolicy};
pub use store::{
    fetch_all_events, fetch_goal_set_events, latest_goal_set, GoalEventFilter, GoalEventStore,
    GoalSetFilter, InMemoryGoalEventStore, Page, PageRequest,
};
