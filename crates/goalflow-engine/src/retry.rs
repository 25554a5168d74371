//! Retry logic with configurable backoff policies for goal execution.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use goalflow_types::{ExecuteGoalResult, GoalflowError, Result};

use crate::fulfillment::{GoalExecutor, GoalInvocation};

/// Backoff policy controlling the delay between retry attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// Fixed delay between retries.
    Fixed(Duration),
    /// Exponential backoff: base * 2^attempt, capped at max.
    Exponential { base: Duration, max: Duration },
    /// No delay between retries.
    None,
}

impl BackoffPolicy {
    /// Compute the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        match self {
            BackoffPolicy::Fixed(d) => *d,
            BackoffPolicy::Exponential { base, max } => {
                let millis = (base.as_millis() as u64)
                    .saturating_mul(2u64.saturating_pow(attempt as u32));
                Duration::from_millis(millis).min(*max)
            }
            BackoffPolicy::None => Duration::ZERO,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential {
            base: Duration::from_secs(1),
            max: Duration::from_secs(5),
        }
    }
}

/// How often, and how patiently, a failing goal is re-run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Re-runs after the first attempt.
    pub retries: usize,
    pub backoff: BackoffPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 5,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Execute a goal with retry logic.
///
/// The closure `f` is called up to `policy.retries + 1` times. A returned
/// error or a result with a non-zero code triggers a retry; the latter is
/// turned into [`GoalflowError::ExecutionFailed`] first. Setup errors are
/// returned immediately. The last attempt's error propagates.
pub async fn execute_with_retry<F, Fut>(
    f: F,
    policy: &RetryPolicy,
    goal: &str,
) -> Result<ExecuteGoalResult>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<ExecuteGoalResult>>,
{
    let mut attempt = 0;
    loop {
        let err = match f().await {
            Ok(result) if result.is_success() => return Ok(result),
            Ok(result) => GoalflowError::ExecutionFailed {
                goal: goal.to_string(),
                code: result.code,
                message: result.message.unwrap_or_default(),
            },
            Err(e) => e,
        };

        if err.is_setup_error() || attempt >= policy.retries {
            return Err(err);
        }

        let delay = policy.backoff.delay_for_attempt(attempt);
        tracing::warn!(
            goal = %goal,
            attempt,
            delay_ms = %delay.as_millis(),
            error = %err,
            "Goal execution failed, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

// ---------------------------------------------------------------------------
// RetryingExecutor
// ---------------------------------------------------------------------------

/// Wraps an executor, re-running it under a [`RetryPolicy`].
pub struct RetryingExecutor {
    goal: String,
    inner: Arc<dyn GoalExecutor>,
    policy: RetryPolicy,
}

#[async_trait]
impl GoalExecutor for RetryingExecutor {
    async fn execute(&self, invocation: &GoalInvocation) -> Result<ExecuteGoalResult> {
        execute_with_retry(
            || self.inner.execute(invocation),
            &self.policy,
            &self.goal,
        )
        .await
    }
}

pub fn retrying(
    goal: impl Into<String>,
    inner: Arc<dyn GoalExecutor>,
    policy: RetryPolicy,
) -> Arc<dyn GoalExecutor> {
    Arc::new(RetryingExecutor {
        goal: goal.into(),
        inner,
        policy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fulfillment::executor_fn;
    use crate::test_support::event;
    use goalflow_types::GoalState;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn no_wait(retries: usize) -> RetryPolicy {
        RetryPolicy {
            retries,
            backoff: BackoffPolicy::None,
        }
    }

    // 1. No retries needed, success on first try
    #[tokio::test]
    async fn success_on_first_try() {
        let result = execute_with_retry(
            || async { Ok(ExecuteGoalResult::success()) },
            &no_wait(3),
            "build",
        )
        .await;
        assert!(result.unwrap().is_success());
    }

    // 2. Error then success
    #[tokio::test]
    async fn retry_on_error_succeeds() {
        let call_count = Arc::new(AtomicUsize::new(0));
        let cc = call_count.clone();

        let result = execute_with_retry(
            move || {
                let cc = cc.clone();
                async move {
                    if cc.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(GoalflowError::Other("network blip".into()))
                    } else {
                        Ok(ExecuteGoalResult::success())
                    }
                }
            },
            &no_wait(3),
            "build",
        )
        .await;

        assert!(result.unwrap().is_success());
        assert_eq!(call_count.load(Ordering::SeqCst), 2);
    }

    // 3. Non-zero codes are retried and the last becomes the error
    #[tokio::test]
    async fn non_zero_code_retried_until_exhausted() {
        let call_count = Arc::new(AtomicUsize::new(0));
        let cc = call_count.clone();

        let result = execute_with_retry(
            move || {
                let cc = cc.clone();
                async move {
                    let n = cc.fetch_add(1, Ordering::SeqCst) as i32;
                    Ok(ExecuteGoalResult::failed(n + 1, format!("attempt {n}")))
                }
            },
            &no_wait(2),
            "build",
        )
        .await;

        assert_eq!(call_count.load(Ordering::SeqCst), 3);
        match result.unwrap_err() {
            GoalflowError::ExecutionFailed { goal, code, message } => {
                assert_eq!(goal, "build");
                assert_eq!(code, 3);
                assert_eq!(message, "attempt 2");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    // 4. Setup errors are returned without retrying
    #[tokio::test]
    async fn setup_error_not_retried() {
        let call_count = Arc::new(AtomicUsize::new(0));
        let cc = call_count.clone();

        let result = execute_with_retry(
            move || {
                let cc = cc.clone();
                async move {
                    cc.fetch_add(1, Ordering::SeqCst);
                    Err(GoalflowError::ValidationError("bad wait rule".into()))
                }
            },
            &no_wait(5),
            "build",
        )
        .await;

        assert!(matches!(result.unwrap_err(), GoalflowError::ValidationError(_)));
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    // 5. Fixed backoff returns constant delay
    #[test]
    fn fixed_backoff_constant_delay() {
        let policy = BackoffPolicy::Fixed(Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(200));
    }

    // 6. Exponential backoff doubles correctly and respects max
    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let policy = BackoffPolicy::Exponential {
            base: Duration::from_millis(100),
            max: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(64), Duration::from_millis(500));
    }

    // 7. Default policy
    #[test]
    fn default_policy_is_five_retries_one_to_five_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.retries, 5);
        assert_eq!(policy.backoff.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.backoff.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.backoff.delay_for_attempt(10), Duration::from_secs(5));
    }

    // 8. Wrapper re-runs the inner executor
    #[tokio::test]
    async fn retrying_executor_wraps_inner() {
        let call_count = Arc::new(AtomicUsize::new(0));
        let cc = call_count.clone();
        let inner = executor_fn(move |_inv| {
            let cc = cc.clone();
            async move {
                if cc.fetch_add(1, Ordering::SeqCst) < 2 {
                    Ok(ExecuteGoalResult::failed(1, "flaky"))
                } else {
                    Ok(ExecuteGoalResult::success())
                }
            }
        });

        let exec = retrying("build", inner, no_wait(5));
        let inv = GoalInvocation::new(event("build", GoalState::InProcess, 1));
        assert!(exec.execute(&inv).await.unwrap().is_success());
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }
}
