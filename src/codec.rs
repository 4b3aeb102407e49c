//! Human-request encoding and result decoding
//!
//! The surrounding application speaks natural language; runs speak goals
//! and typed payloads. These two translations sit on either side of a
//! run: a raw request becomes an execution task with completion criteria,
//! and a final payload becomes a human-friendly response.

use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::context::Goal;
use crate::decision::{decide_bounded, Decider};
use crate::error::OrchestraError;
use crate::{prompt, schema};

/// Derive a [`Goal`] from a raw human request
///
/// The directive steers what kind of task gets derived but is not stored
/// on the returned goal; the orchestrator stamps its own at run start.
pub async fn encode_request(
    decider: &dyn Decider,
    human_request: &str,
    directive: &str,
    deadline: Duration,
) -> Result<Goal, OrchestraError> {
    let request = prompt::encode_request(human_request, directive);
    let reply_schema = request.reply_schema.clone();

    let reply = decide_bounded(decider, request, deadline).await?;
    schema::validate(&reply_schema, &reply).map_err(|detail| OrchestraError::SchemaViolation {
        context: "execution task".into(),
        detail,
    })?;

    let task = reply["task"].as_str().unwrap_or_default().to_string();
    let criteria = reply["completion_criteria"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    debug!(task = %task, completion_criteria = %criteria, "encoded human request");

    Ok(Goal::new(task, criteria))
}

/// Convert a run's final payload into a human-friendly response
pub async fn decode_result(
    decider: &dyn Decider,
    result: &Value,
    goal: &Goal,
    deadline: Duration,
) -> Result<String, OrchestraError> {
    let request = prompt::decode_result(result, goal);
    let reply_schema = request.reply_schema.clone();

    let reply = decide_bounded(decider, request, deadline).await?;
    schema::validate(&reply_schema, &reply).map_err(|detail| OrchestraError::SchemaViolation {
        context: "human response".into(),
        detail,
    })?;

    Ok(reply["response"].as_str().unwrap_or_default().to_string())
}
