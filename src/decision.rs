//! Decision service boundary
//!
//! The decision service is the only source of "intelligence" in the core:
//! an external, non-deterministic function that maps a structured prompt
//! plus a reply schema to structured data. Everything the orchestrator,
//! registry, and steps ask of it goes through the [`Decider`] trait.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// One selectable item in a decision request's option menu
#[derive(Debug, Clone, serde::Serialize)]
pub struct OptionSpec {
    pub name: String,
    pub description: String,
    /// Structural contract for the option's arguments, if it has one
    pub schema: Option<Value>,
}

/// A structured request to the decision service
///
/// Mirrors a single function-constrained chat completion: instructions,
/// an optional menu of options the reply may select from, and the JSON
/// schema the reply must conform to.
#[derive(Debug, Clone)]
pub struct DecisionRequest {
    /// Prompt text
    pub instructions: String,
    /// Options enumerated for the service to pick between (may be empty)
    pub options: Vec<OptionSpec>,
    /// Schema of acceptable replies
    pub reply_schema: Value,
    /// Name of the reply the service should produce
    pub reply_name: String,
}

impl DecisionRequest {
    pub fn new(
        instructions: impl Into<String>,
        reply_name: impl Into<String>,
        reply_schema: Value,
    ) -> Self {
        Self {
            instructions: instructions.into(),
            options: Vec::new(),
            reply_schema,
            reply_name: reply_name.into(),
        }
    }

    /// Attach an option menu
    pub fn with_options(mut self, options: Vec<OptionSpec>) -> Self {
        self.options = options;
        self
    }
}

/// Decision service errors
#[derive(Debug, Error)]
pub enum DecisionError {
    /// The service could not be reached or failed mid-call
    #[error("transport error: {0}")]
    Transport(String),

    /// The service replied with something that is not structured data
    #[error("malformed reply: {0}")]
    Malformed(String),

    /// The call exceeded the configured deadline
    #[error("decision timed out after {0:?}")]
    TimedOut(Duration),
}

/// External decision service
///
/// Stateless per call from the core's point of view. Implementations
/// typically wrap an LLM chat endpoint with function calling.
#[async_trait]
pub trait Decider: Send + Sync {
    /// Produce a structured reply for the request
    ///
    /// The reply is expected to conform to `request.reply_schema`; the
    /// core validates it and treats mismatches as a first-class failure
    /// mode, so implementations may return best-effort data.
    async fn decide(&self, request: DecisionRequest) -> Result<Value, DecisionError>;
}

#[async_trait]
impl Decider for std::sync::Arc<dyn Decider> {
    async fn decide(&self, request: DecisionRequest) -> Result<Value, DecisionError> {
        (**self).decide(request).await
    }
}

/// Call the decider with a deadline
///
/// A hung decision call must never block the run indefinitely; the
/// deadline converts it into [`DecisionError::TimedOut`] at the call site.
pub(crate) async fn decide_bounded(
    decider: &dyn Decider,
    request: DecisionRequest,
    deadline: Duration,
) -> Result<Value, DecisionError> {
    match tokio::time::timeout(deadline, decider.decide(request)).await {
        Ok(reply) => reply,
        Err(_) => Err(DecisionError::TimedOut(deadline)),
    }
}
