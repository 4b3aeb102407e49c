//! Orchestration error types

use thiserror::Error;

use crate::decision::DecisionError;

/// Errors that can end or misconfigure an orchestration run
#[derive(Debug, Error)]
pub enum OrchestraError {
    /// A capability was registered under a name that is already taken
    #[error("duplicate capability name: {0}")]
    DuplicateCapability(String),

    /// The decision service failed outright
    #[error("decision service error: {0}")]
    Decision(#[from] DecisionError),

    /// A decision-service reply did not match the expected shape
    #[error("reply for {context} violated its schema: {detail}")]
    SchemaViolation { context: String, detail: String },

    /// An operator's own execution failed
    #[error("operator {operator} failed: {error}")]
    OperatorFailed {
        operator: String,
        error: anyhow::Error,
    },

    /// The candidate input could not be reshaped into the operator's contract
    #[error("could not reformat input for operator {operator}: {detail}")]
    ReformatFailed { operator: String, detail: String },

    /// The scheduler could not determine a next step
    #[error("no next step could be determined after {completed_steps} completed steps")]
    Stalled { completed_steps: usize },
}

impl OrchestraError {
    /// Name of the operator this error is attributed to, if any
    pub fn operator(&self) -> Option<&str> {
        match self {
            Self::OperatorFailed { operator, .. } | Self::ReformatFailed { operator, .. } => {
                Some(operator)
            }
            _ => None,
        }
    }

    /// Whether the run stalled (scheduling dead-end) rather than failed outright
    pub fn is_stalled(&self) -> bool {
        matches!(self, Self::Stalled { .. })
    }
}
