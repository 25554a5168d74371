//! Machine configuration loaded from JSON.

use std::path::Path;
use std::time::Duration;

use goalflow_types::{GoalflowError, Registration, Result};
use serde::{Deserialize, Serialize};

use crate::queue::QueueOptions;
use crate::retry::{BackoffPolicy, RetryPolicy};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryOptions {
    pub retries: usize,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            retries: 5,
            min_delay_ms: 1000,
            max_delay_ms: 5000,
        }
    }
}

impl RetryOptions {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retries,
            backoff: BackoffPolicy::Exponential {
                base: Duration::from_millis(self.min_delay_ms),
                max: Duration::from_millis(self.max_delay_ms),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    /// Events read per page when reconciling a goal-set.
    pub page_size: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self { page_size: 100 }
    }
}

fn default_registration() -> Registration {
    Registration::new("goalflow", env!("CARGO_PKG_VERSION"))
}

/// Top-level configuration for a [`GoalMachine`](crate::machine::GoalMachine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GoalflowConfig {
    pub registration: Registration,
    /// Installs the queue goal when present.
    pub queue: Option<QueueOptions>,
    pub retry: RetryOptions,
    pub store: StoreOptions,
    pub event_bus_capacity: usize,
}

impl Default for GoalflowConfig {
    fn default() -> Self {
        Self {
            registration: default_registration(),
            queue: None,
            retry: RetryOptions::default(),
            store: StoreOptions::default(),
            event_bus_capacity: 256,
        }
    }
}

impl GoalflowConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: GoalflowConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.registration.name.trim().is_empty() {
            return Err(GoalflowError::ValidationError(
                "registration.name must not be empty".into(),
            ));
        }
        if let Some(queue) = &self.queue {
            if queue.concurrent == 0 {
                return Err(GoalflowError::ValidationError(
                    "queue.concurrent must be at least 1".into(),
                ));
            }
        }
        if self.store.page_size == 0 {
            return Err(GoalflowError::ValidationError(
                "store.page_size must be at least 1".into(),
            ));
        }
        if self.retry.min_delay_ms > self.retry.max_delay_ms {
            return Err(GoalflowError::ValidationError(format!(
                "retry.min_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.min_delay_ms, self.retry.max_delay_ms
            )));
        }
        if self.event_bus_capacity == 0 {
            return Err(GoalflowError::ValidationError(
                "event_bus_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
