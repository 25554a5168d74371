//! Wait-for-condition wrapper around a goal executor.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use goalflow_types::{ExecuteGoalResult, GoalflowError, Result};

use crate::fulfillment::{GoalExecutor, GoalInvocation};

const DEFAULT_RETRIES: u32 = 1000;
const DEFAULT_TIMEOUT_MILLIS: u64 = 1000;

#[async_trait]
pub trait GoalCondition: Send + Sync {
    async fn check(&self, invocation: &GoalInvocation) -> Result<bool>;
}

/// Condition backed by an async closure.
pub struct FnCondition<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> GoalCondition for FnCondition<F>
where
    F: Fn(GoalInvocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool>> + Send + 'static,
{
    async fn check(&self, invocation: &GoalInvocation) -> Result<bool> {
        (self.f)(invocation.clone()).await
    }
}

pub fn condition_fn<F, Fut>(f: F) -> Arc<dyn GoalCondition>
where
    F: Fn(GoalInvocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool>> + Send + 'static,
{
    Arc::new(FnCondition { f })
}

// ---------------------------------------------------------------------------
// WaitRules
// ---------------------------------------------------------------------------

/// How long to wait for a condition before running a goal.
///
/// At most one of `timeout_seconds` and `timeout_millis` may be set; it is the
/// pause between two polls.
#[derive(Clone)]
pub struct WaitRules {
    pub condition: Arc<dyn GoalCondition>,
    pub retries: Option<u32>,
    pub timeout_seconds: Option<u64>,
    pub timeout_millis: Option<u64>,
}

impl WaitRules {
    pub fn new(condition: Arc<dyn GoalCondition>) -> Self {
        Self {
            condition,
            retries: None,
            timeout_seconds: None,
            timeout_millis: None,
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    pub fn with_timeout_millis(mut self, millis: u64) -> Self {
        self.timeout_millis = Some(millis);
        self
    }

    /// Number of polls and the pause between them.
    fn resolve(&self) -> Result<(u32, Duration)> {
        let pause = match (self.timeout_seconds, self.timeout_millis) {
            (Some(_), Some(_)) => {
                return Err(GoalflowError::ValidationError(
                    "wait rules accept timeout_seconds or timeout_millis, not both".into(),
                ))
            }
            (Some(seconds), None) => Duration::from_secs(seconds),
            (None, Some(millis)) => Duration::from_millis(millis),
            (None, None) => Duration::from_millis(DEFAULT_TIMEOUT_MILLIS),
        };
        let retries = self.retries.unwrap_or(DEFAULT_RETRIES);
        if retries == 0 {
            return Err(GoalflowError::ValidationError(
                "wait rules need at least one poll".into(),
            ));
        }
        Ok((retries, pause))
    }
}

// ---------------------------------------------------------------------------
// PredicatedExecutor
// ---------------------------------------------------------------------------

/// Runs the inner executor once the wait condition holds.
pub struct PredicatedExecutor {
    goal: String,
    inner: Arc<dyn GoalExecutor>,
    condition: Arc<dyn GoalCondition>,
    retries: u32,
    pause: Duration,
}

#[async_trait]
impl GoalExecutor for PredicatedExecutor {
    async fn execute(&self, invocation: &GoalInvocation) -> Result<ExecuteGoalResult> {
        for attempt in 1..=self.retries {
            if self.condition.check(invocation).await? {
                tracing::debug!(goal = %self.goal, attempt, "Wait condition met");
                return self.inner.execute(invocation).await;
            }
            if attempt < self.retries {
                tokio::time::sleep(self.pause).await;
            }
        }
        Err(GoalflowError::WaitTimeout {
            goal: self.goal.clone(),
            attempts: self.retries,
        })
    }
}

/// Wrap `inner` so it only runs after `rules.condition` holds.
///
/// Fails immediately when the rules are contradictory.
pub fn predicated(
    goal: impl Into<String>,
    inner: Arc<dyn GoalExecutor>,
    rules: WaitRules,
) -> Result<Arc<dyn GoalExecutor>> {
    let (retries, pause) = rules.resolve()?;
    Ok(Arc::new(PredicatedExecutor {
        goal: goal.into(),
        inner,
        condition: rules.condition,
        retries,
        pause,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fulfillment::executor_fn;
    use crate::test_support::event;
    use goalflow_types::GoalState;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_executor(counter: Arc<AtomicUsize>) -> Arc<dyn GoalExecutor> {
        executor_fn(move |_inv| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(ExecuteGoalResult::success())
            }
        })
    }

    fn invocation() -> GoalInvocation {
        GoalInvocation::new(event("deploy", GoalState::InProcess, 1))
    }

    #[tokio::test]
    async fn inner_runs_once_after_condition_turns_true() {
        let polls = Arc::new(AtomicUsize::new(0));
        let runs = Arc::new(AtomicUsize::new(0));
        let p = polls.clone();
        let condition = condition_fn(move |_inv| {
            let p = p.clone();
            async move { Ok(p.fetch_add(1, Ordering::SeqCst) + 1 >= 9) }
        });

        let exec = predicated(
            "deploy",
            counting_executor(runs.clone()),
            WaitRules::new(condition).with_retries(10).with_timeout_millis(1),
        )
        .unwrap();

        assert!(exec.execute(&invocation()).await.unwrap().is_success());
        assert_eq!(polls.load(Ordering::SeqCst), 9);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn never_true_condition_times_out_without_running_inner() {
        let polls = Arc::new(AtomicUsize::new(0));
        let runs = Arc::new(AtomicUsize::new(0));
        let p = polls.clone();
        let condition = condition_fn(move |_inv| {
            let p = p.clone();
            async move {
                p.fetch_add(1, Ordering::SeqCst);
                Ok(false)
            }
        });

        let exec = predicated(
            "deploy",
            counting_executor(runs.clone()),
            WaitRules::new(condition).with_retries(3).with_timeout_millis(1),
        )
        .unwrap();

        let err = exec.execute(&invocation()).await.unwrap_err();
        assert!(matches!(err, GoalflowError::WaitTimeout { attempts: 3, .. }));
        assert_eq!(polls.load(Ordering::SeqCst), 3);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn condition_error_propagates() {
        let runs = Arc::new(AtomicUsize::new(0));
        let condition =
            condition_fn(|_inv| async { Err(GoalflowError::Other("probe down".into())) });
        let exec = predicated(
            "deploy",
            counting_executor(runs.clone()),
            WaitRules::new(condition).with_timeout_millis(1),
        )
        .unwrap();

        assert!(matches!(
            exec.execute(&invocation()).await.unwrap_err(),
            GoalflowError::Other(_)
        ));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn both_timeouts_is_a_validation_error() {
        let condition = condition_fn(|_inv| async { Ok(true) });
        let rules = WaitRules::new(condition)
            .with_timeout_seconds(1)
            .with_timeout_millis(500);
        let err = predicated("deploy", counting_executor(Arc::default()), rules)
            .err()
            .unwrap();
        assert!(matches!(err, GoalflowError::ValidationError(_)));
    }

    #[test]
    fn defaults_and_seconds_conversion() {
        let condition = condition_fn(|_inv| async { Ok(true) });
        let rules = WaitRules::new(condition);
        assert_eq!(rules.resolve().unwrap(), (1000, Duration::from_millis(1000)));
        let rules = rules.with_timeout_seconds(3);
        assert_eq!(rules.resolve().unwrap(), (1000, Duration::from_secs(3)));
    }
}
