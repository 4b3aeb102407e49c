//! Goals and the per-run context log

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Immutable description of what one run is attempting
///
/// The `directive` is owned by the orchestrator and stamped onto the goal
/// when the run starts; callers only need to supply the task and its
/// completion criteria (usually via [`crate::codec::encode_request`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    /// What is being attempted
    pub task: String,
    /// Persona / prime directive of the orchestrator executing the task
    #[serde(default)]
    pub directive: String,
    /// Stopping condition the decision service evaluates progress against
    pub completion_criteria: String,
    /// Pre-fetched reader context, rendered as a prompt blob
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<String>,
}

impl Goal {
    pub fn new(task: impl Into<String>, completion_criteria: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            directive: String::new(),
            completion_criteria: completion_criteria.into(),
            sources: None,
        }
    }

    /// Attach a pre-fetched sources blob
    pub fn with_sources(mut self, sources: impl Into<String>) -> Self {
        self.sources = Some(sources.into());
        self
    }
}

/// Record of one completed operator invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextEntry {
    /// Operator name
    pub task: String,
    /// Operator description, repeated so prompts stay self-contained
    pub task_description: String,
    /// The operator's typed result
    pub task_result: Value,
}

/// Append-only log of completed operator invocations within one run
///
/// Owned exclusively by the running orchestrator instance; entries are
/// never mutated or removed once appended, so its length always equals
/// the number of operators that have completed successfully.
#[derive(Debug, Default)]
pub struct ContextLog {
    entries: Vec<ContextEntry>,
}

impl ContextLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a completed operator's record
    pub fn push(&mut self, entry: ContextEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[ContextEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
