//! Fulfillments: the means of completing a goal.
//!
//! A [`Fulfillment`] is either an [`Implementation`] executed by this process,
//! or a [`SideEffect`] completed somewhere else. Both are bound to a goal and a
//! [`PushTest`] that decides whether they apply to a given change.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use goalflow_types::{
    ExecuteGoalResult, FulfillmentKind, FulfillmentRef, GoalEvent, GoalflowError, ProgressLog,
    Result,
};
use regex::Regex;

use crate::change::ChangeContext;
use crate::goal::Goal;

// ---------------------------------------------------------------------------
// PushTest: change predicate
// ---------------------------------------------------------------------------

#[async_trait]
pub trait PushTest: Send + Sync {
    fn name(&self) -> &str;

    async fn matches(&self, change: &ChangeContext) -> Result<bool>;
}

/// Push test backed by a synchronous closure.
pub struct FnPushTest<F> {
    name: String,
    f: F,
}

impl<F> FnPushTest<F>
where
    F: Fn(&ChangeContext) -> bool + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F> PushTest for FnPushTest<F>
where
    F: Fn(&ChangeContext) -> bool + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn matches(&self, change: &ChangeContext) -> Result<bool> {
        Ok((self.f)(change))
    }
}

/// Matches every change.
pub struct AlwaysPushTest;

#[async_trait]
impl PushTest for AlwaysPushTest {
    fn name(&self) -> &str {
        "always"
    }

    async fn matches(&self, _change: &ChangeContext) -> Result<bool> {
        Ok(true)
    }
}

pub fn push_test<F>(name: impl Into<String>, f: F) -> Arc<dyn PushTest>
where
    F: Fn(&ChangeContext) -> bool + Send + Sync + 'static,
{
    Arc::new(FnPushTest::new(name, f))
}

// ---------------------------------------------------------------------------
// GoalExecutor: the run function of an implementation
// ---------------------------------------------------------------------------

/// Everything an executor receives for one run.
#[derive(Clone)]
pub struct GoalInvocation {
    pub event: GoalEvent,
    pub progress: ProgressLog,
}

impl GoalInvocation {
    pub fn new(event: GoalEvent) -> Self {
        Self {
            event,
            progress: ProgressLog::new(),
        }
    }
}

#[async_trait]
pub trait GoalExecutor: Send + Sync {
    async fn execute(&self, invocation: &GoalInvocation) -> Result<ExecuteGoalResult>;
}

/// Executor backed by an async closure.
pub struct FnExecutor<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> GoalExecutor for FnExecutor<F>
where
    F: Fn(GoalInvocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ExecuteGoalResult>> + Send + 'static,
{
    async fn execute(&self, invocation: &GoalInvocation) -> Result<ExecuteGoalResult> {
        (self.f)(invocation.clone()).await
    }
}

pub fn executor_fn<F, Fut>(f: F) -> Arc<dyn GoalExecutor>
where
    F: Fn(GoalInvocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ExecuteGoalResult>> + Send + 'static,
{
    Arc::new(FnExecutor { f })
}

// ---------------------------------------------------------------------------
// Log interpretation and progress reporting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpretedLog {
    pub relevant_part: String,
    pub message: String,
}

pub trait LogInterpreter: Send + Sync {
    /// Pick out the part of a run's log worth showing on failure.
    fn interpret(&self, log: &str) -> Option<InterpretedLog>;
}

/// Keeps the last `lines` lines of the log.
pub struct TailLogInterpreter {
    pub lines: usize,
}

impl Default for TailLogInterpreter {
    fn default() -> Self {
        Self { lines: 10 }
    }
}

impl LogInterpreter for TailLogInterpreter {
    fn interpret(&self, log: &str) -> Option<InterpretedLog> {
        let lines: Vec<&str> = log.lines().collect();
        if lines.is_empty() {
            return None;
        }
        let start = lines.len().saturating_sub(self.lines);
        Some(InterpretedLog {
            relevant_part: lines[start..].join("\n"),
            message: format!("Last {} lines of log", lines.len() - start),
        })
    }
}

pub trait ProgressReporter: Send + Sync {
    /// Derive the current phase of a run from its log so far.
    fn phase(&self, log: &str) -> Option<String>;
}

/// Maps log lines to phase names; the latest matching line wins.
#[derive(Default)]
pub struct PatternProgressReporter {
    phases: Vec<(Regex, String)>,
}

impl PatternProgressReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_phase(mut self, pattern: &str, phase: impl Into<String>) -> Result<Self> {
        let re = Regex::new(pattern).map_err(|e| {
            GoalflowError::ValidationError(format!("Invalid progress pattern '{pattern}': {e}"))
        })?;
        self.phases.push((re, phase.into()));
        Ok(self)
    }
}

impl ProgressReporter for PatternProgressReporter {
    fn phase(&self, log: &str) -> Option<String> {
        log.lines().rev().find_map(|line| {
            self.phases
                .iter()
                .find(|(re, _)| re.is_match(line))
                .map(|(_, phase)| phase.clone())
        })
    }
}

// ---------------------------------------------------------------------------
// Implementation and SideEffect
// ---------------------------------------------------------------------------

/// A locally executed fulfillment.
#[derive(Clone)]
pub struct Implementation {
    pub name: String,
    pub goal: Goal,
    pub push_test: Arc<dyn PushTest>,
    pub executor: Arc<dyn GoalExecutor>,
    pub log_interpreter: Arc<dyn LogInterpreter>,
    pub progress_reporter: Option<Arc<dyn ProgressReporter>>,
}

impl Implementation {
    pub fn new(name: impl Into<String>, goal: &Goal, executor: Arc<dyn GoalExecutor>) -> Self {
        Self {
            name: name.into(),
            goal: goal.clone(),
            push_test: Arc::new(AlwaysPushTest),
            executor,
            log_interpreter: Arc::new(TailLogInterpreter::default()),
            progress_reporter: None,
        }
    }

    pub fn with_push_test(mut self, push_test: Arc<dyn PushTest>) -> Self {
        self.push_test = push_test;
        self
    }

    pub fn with_log_interpreter(mut self, interpreter: Arc<dyn LogInterpreter>) -> Self {
        self.log_interpreter = interpreter;
        self
    }

    pub fn with_progress_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.progress_reporter = Some(reporter);
        self
    }
}

impl fmt::Debug for Implementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Implementation")
            .field("name", &self.name)
            .field("goal", &self.goal.unique_name())
            .field("push_test", &self.push_test.name())
            .finish()
    }
}

/// A fulfillment completed by another registration; this process only observes it.
#[derive(Clone)]
pub struct SideEffect {
    pub name: String,
    pub registration: String,
    pub goal: Goal,
    pub push_test: Arc<dyn PushTest>,
}

impl SideEffect {
    /// A side effect fulfilled by the registration called `name`.
    pub fn new(name: impl Into<String>, goal: &Goal) -> Self {
        let name = name.into();
        Self {
            registration: name.clone(),
            name,
            goal: goal.clone(),
            push_test: Arc::new(AlwaysPushTest),
        }
    }

    pub fn with_registration(mut self, registration: impl Into<String>) -> Self {
        self.registration = registration.into();
        self
    }

    pub fn with_push_test(mut self, push_test: Arc<dyn PushTest>) -> Self {
        self.push_test = push_test;
        self
    }
}

impl fmt::Debug for SideEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SideEffect")
            .field("name", &self.name)
            .field("registration", &self.registration)
            .field("goal", &self.goal.unique_name())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum Fulfillment {
    Implementation(Implementation),
    SideEffect(SideEffect),
}

impl Fulfillment {
    pub fn kind(&self) -> FulfillmentKind {
        match self {
            Fulfillment::Implementation(_) => FulfillmentKind::Implementation,
            Fulfillment::SideEffect(_) => FulfillmentKind::SideEffect,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Fulfillment::Implementation(i) => &i.name,
            Fulfillment::SideEffect(s) => &s.name,
        }
    }

    pub fn goal(&self) -> &Goal {
        match self {
            Fulfillment::Implementation(i) => &i.goal,
            Fulfillment::SideEffect(s) => &s.goal,
        }
    }

    /// Reference stored on events. Implementations are dispatched to
    /// `local_registration`; side effects name their own registration.
    pub fn to_ref(&self, local_registration: &str) -> FulfillmentRef {
        match self {
            Fulfillment::Implementation(i) => FulfillmentRef {
                kind: FulfillmentKind::Implementation,
                name: i.name.clone(),
                registration: local_registration.to_string(),
            },
            Fulfillment::SideEffect(s) => FulfillmentRef {
                kind: FulfillmentKind::SideEffect,
                name: s.name.clone(),
                registration: s.registration.clone(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// FulfillmentCallback: transforms applied before a goal is requested
// ---------------------------------------------------------------------------

#[async_trait]
pub trait FulfillmentCallback: Send + Sync {
    async fn before_request(&self, event: GoalEvent, change: &ChangeContext) -> Result<GoalEvent>;
}

/// Callback backed by a synchronous closure.
pub struct FnCallback<F> {
    f: F,
}

impl<F> FnCallback<F>
where
    F: Fn(GoalEvent, &ChangeContext) -> Result<GoalEvent> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> FulfillmentCallback for FnCallback<F>
where
    F: Fn(GoalEvent, &ChangeContext) -> Result<GoalEvent> + Send + Sync,
{
    async fn before_request(&self, event: GoalEvent, change: &ChangeContext) -> Result<GoalEvent> {
        (self.f)(event, change)
    }
}
