//! Change context handed to push tests and fulfillment callbacks.

use std::collections::HashMap;

use async_trait::async_trait;
use goalflow_types::{ChangeRef, GoalflowError, Result};
use serde::{Deserialize, Serialize};

/// Metadata about the push a goal-set is planned for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeContext {
    pub change: ChangeRef,
    #[serde(default)]
    pub commit_message: String,
    #[serde(default)]
    pub changed_files: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ChangeContext {
    pub fn new(change: ChangeRef) -> Self {
        Self {
            change,
            commit_message: String::new(),
            changed_files: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_commit_message(mut self, message: impl Into<String>) -> Self {
        self.commit_message = message.into();
        self
    }

    pub fn with_changed_files(mut self, files: Vec<String>) -> Self {
        self.changed_files = files;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn branch(&self) -> &str {
        &self.change.branch
    }

    /// True when any changed file path ends with `suffix`.
    pub fn touches(&self, suffix: &str) -> bool {
        self.changed_files.iter().any(|f| f.ends_with(suffix))
    }
}

/// Resolves a change reference carried on an event into full context.
#[async_trait]
pub trait ChangeContextProvider: Send + Sync {
    async fn fetch(&self, change: &ChangeRef) -> Result<ChangeContext>;
}

/// Provider backed by a fixed map, keyed by commit sha.
#[derive(Debug, Default)]
pub struct StaticChangeContextProvider {
    contexts: HashMap<String, ChangeContext>,
}

impl StaticChangeContextProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, context: ChangeContext) {
        self.contexts.insert(context.change.sha.clone(), context);
    }
}

#[async_trait]
impl ChangeContextProvider for StaticChangeContextProvider {
    async fn fetch(&self, change: &ChangeRef) -> Result<ChangeContext> {
        self.contexts
            .get(&change.sha)
            .cloned()
            .ok_or_else(|| GoalflowError::Other(format!("No change context known for {change}")))
    }
}
