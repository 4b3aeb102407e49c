//! Step lifecycle and the next-step scheduler
//!
//! A step binds exactly one operator to one scheduling decision and owns
//! its lifecycle: optional input reformatting, execution, reporting, and
//! handing control back to the scheduler. The chain is an explicit loop
//! with the context log as the accumulator, so stack depth stays bounded
//! and every iteration is a natural timeout/cancellation boundary.

use std::fmt;
use std::sync::Arc;

use anyhow::anyhow;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::capability::Operator;
use crate::context::{ContextEntry, ContextLog, Goal};
use crate::decision::{decide_bounded, Decider};
use crate::error::OrchestraError;
use crate::events::{EventSender, RunEvent};
use crate::orchestrator::{RunId, RunLimits};
use crate::registry::Registry;
use crate::{prompt, schema};

/// Unique identifier for one step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct StepId(Uuid);

impl StepId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StepId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Step lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Pending,
    Executing,
    Completed,
    Failed,
    ReformatFailed,
}

/// One bound operator invocation, discarded after its terminal state is reported
struct Step {
    id: StepId,
    status: StepStatus,
}

impl Step {
    fn new() -> Self {
        Self {
            id: StepId::new(),
            status: StepStatus::Pending,
        }
    }

    fn finish(&mut self, status: StepStatus) {
        self.status = status;
        debug!(step_id = %self.id, status = ?self.status, "step finished");
    }
}

/// Drives the step chain for one run
pub(crate) struct Scheduler<'a> {
    pub registry: &'a Registry,
    pub decider: &'a dyn Decider,
    pub limits: &'a RunLimits,
    pub events: &'a EventSender,
    pub run_id: RunId,
}

impl Scheduler<'_> {
    /// Run the chain to completion
    ///
    /// Ends with the terminal operator's payload, the first step failure,
    /// or [`OrchestraError::Stalled`] when no valid next step can be
    /// determined within the configured attempts.
    pub(crate) async fn drive(&self, goal: &Goal) -> Result<Value, OrchestraError> {
        let mut log = ContextLog::new();

        loop {
            let Some((operator, instruction)) = self.next_step(goal, &log).await else {
                info!(run_id = %self.run_id, completed_steps = log.len(), "no next step, run stalls");
                return Err(OrchestraError::Stalled {
                    completed_steps: log.len(),
                });
            };

            let (result, terminal) = self.run_step(goal, &mut log, operator, instruction).await?;
            if terminal {
                info!(run_id = %self.run_id, completed_steps = log.len(), "terminal operator completed");
                return Ok(result);
            }
        }
    }

    /// Ask the decision service for the next operator and instruction
    ///
    /// An unparseable reply or an unregistered operator name counts as a
    /// failed attempt; exhausting the attempts is a scheduling dead-end,
    /// reported as `None` rather than an error so the caller can surface
    /// the distinct stalled outcome.
    async fn next_step(
        &self,
        goal: &Goal,
        log: &ContextLog,
    ) -> Option<(Arc<dyn Operator>, Value)> {
        let operators = self.registry.operators();
        if operators.is_empty() {
            warn!(run_id = %self.run_id, "no operators registered");
            return None;
        }

        for attempt in 1..=self.limits.schedule_attempts.max(1) {
            if attempt > 1 {
                tokio::time::sleep(self.limits.retry_backoff * (attempt - 1)).await;
            }

            let request = prompt::next_step(goal, log, operators);
            let reply =
                match decide_bounded(self.decider, request, self.limits.decision_timeout).await {
                    Ok(reply) => reply,
                    Err(error) => {
                        warn!(run_id = %self.run_id, %error, attempt, "next-step decision failed");
                        continue;
                    }
                };

            let Some(action) = reply.get("action").and_then(Value::as_str) else {
                warn!(run_id = %self.run_id, attempt, "next-step reply carried no action");
                continue;
            };
            let instruction = reply.get("input").cloned().unwrap_or(Value::Null);

            match self.registry.operator(action) {
                Some(operator) => {
                    debug!(run_id = %self.run_id, operator = %action, "next step chosen");
                    return Some((Arc::clone(operator), instruction));
                }
                None => {
                    warn!(run_id = %self.run_id, operator = %action, attempt, "unregistered operator named");
                    continue;
                }
            }
        }

        None
    }

    /// Execute one step: reformat the candidate input, invoke the
    /// operator, and append the result to the context log
    async fn run_step(
        &self,
        goal: &Goal,
        log: &mut ContextLog,
        operator: Arc<dyn Operator>,
        candidate: Value,
    ) -> Result<(Value, bool), OrchestraError> {
        let mut step = Step::new();
        let name = operator.name().to_string();

        self.events.emit(RunEvent::StepStarted {
            run_id: self.run_id,
            step_id: step.id,
            operator: name.clone(),
        });
        step.status = StepStatus::Executing;

        let has_candidate = !(candidate.is_null() || candidate.as_str() == Some(""));
        let input = if has_candidate {
            match self.reformat(operator.as_ref(), &candidate, log).await {
                Ok(input) => input,
                Err(detail) => {
                    step.finish(StepStatus::ReformatFailed);
                    self.events.emit(RunEvent::ReformatFailed {
                        run_id: self.run_id,
                        step_id: step.id,
                        operator: name.clone(),
                        error: detail.clone(),
                    });
                    return Err(OrchestraError::ReformatFailed {
                        operator: name,
                        detail,
                    });
                }
            }
        } else {
            Value::Null
        };

        let outcome = tokio::time::timeout(
            self.limits.capability_timeout,
            operator.execute(input, goal, log),
        )
        .await;

        match outcome {
            Err(_) => {
                step.finish(StepStatus::Failed);
                let error = anyhow!("timed out after {:?}", self.limits.capability_timeout);
                self.events.emit(RunEvent::StepFailed {
                    run_id: self.run_id,
                    step_id: step.id,
                    operator: name.clone(),
                    error: error.to_string(),
                });
                Err(OrchestraError::OperatorFailed {
                    operator: name,
                    error,
                })
            }
            Ok(Err(error)) => {
                step.finish(StepStatus::Failed);
                self.events.emit(RunEvent::StepFailed {
                    run_id: self.run_id,
                    step_id: step.id,
                    operator: name.clone(),
                    error: error.to_string(),
                });
                Err(OrchestraError::OperatorFailed {
                    operator: name,
                    error,
                })
            }
            Ok(Ok(result)) => {
                step.finish(StepStatus::Completed);
                log.push(ContextEntry {
                    task: name.clone(),
                    task_description: operator.description().to_string(),
                    task_result: result.clone(),
                });
                self.events.emit(RunEvent::StepCompleted {
                    run_id: self.run_id,
                    step_id: step.id,
                    operator: name,
                });
                Ok((result, operator.is_terminal()))
            }
        }
    }

    /// Restructure a candidate input into the operator's input contract
    async fn reformat(
        &self,
        operator: &dyn Operator,
        candidate: &Value,
        log: &ContextLog,
    ) -> Result<Value, String> {
        let mut last_failure = String::from("no attempts made");

        for attempt in 1..=self.limits.reformat_attempts.max(1) {
            if attempt > 1 {
                tokio::time::sleep(self.limits.retry_backoff * (attempt - 1)).await;
            }

            let request = prompt::reformat(operator, candidate, log);
            match decide_bounded(self.decider, request, self.limits.decision_timeout).await {
                Ok(reply) => match schema::validate(operator.input_schema(), &reply) {
                    Ok(()) => return Ok(reply),
                    Err(detail) => {
                        warn!(
                            run_id = %self.run_id,
                            operator = %operator.name(),
                            %detail,
                            attempt,
                            "reformatted input rejected"
                        );
                        last_failure = detail;
                    }
                },
                Err(error) => {
                    warn!(
                        run_id = %self.run_id,
                        operator = %operator.name(),
                        %error,
                        attempt,
                        "reformat decision failed"
                    );
                    last_failure = error.to_string();
                }
            }
        }

        Err(last_failure)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::capability::FnOperator;
    use crate::decision::script::ScriptedDecider;

    fn present_operator() -> FnOperator {
        FnOperator::new(
            "present",
            "Present the final result",
            json!({
                "type": "object",
                "properties": { "content": { "type": "string" } },
                "required": ["content"]
            }),
            json!({"type": "object"}),
            |input, _, _| async move { Ok(json!({"presented": input["content"]})) },
        )
        .terminal()
    }

    fn lookup_operator() -> FnOperator {
        FnOperator::new(
            "lookup",
            "Look up a fact",
            json!({
                "type": "object",
                "properties": { "subject": { "type": "string" } },
                "required": ["subject"]
            }),
            json!({"type": "object"}),
            |input, _, entries| async move {
                Ok(json!({"subject": input["subject"], "seen_steps": entries.len()}))
            },
        )
    }

    fn scheduler<'a>(
        registry: &'a Registry,
        decider: &'a ScriptedDecider,
        limits: &'a RunLimits,
        events: &'a EventSender,
    ) -> Scheduler<'a> {
        Scheduler {
            registry,
            decider,
            limits,
            events,
            run_id: RunId::new(),
        }
    }

    #[tokio::test]
    async fn terminal_operator_short_circuits_the_chain() {
        let registry = Registry::builder()
            .with_operator(present_operator())
            .unwrap()
            .build();
        let decider = ScriptedDecider::new(vec![
            json!({"action": "present", "input": "the price is 100"}),
            json!({"content": "the price is 100"}),
        ]);
        let limits = RunLimits::default();
        let events = EventSender::disabled();

        let result = scheduler(&registry, &decider, &limits, &events)
            .drive(&Goal::new("price of X", "present the price"))
            .await
            .unwrap();

        assert_eq!(result["presented"], "the price is 100");
        // one scheduling call and one reformat call, nothing after the terminal step
        assert_eq!(decider.requests().len(), 2);
    }

    #[tokio::test]
    async fn context_log_grows_by_one_per_completed_step() {
        let registry = Registry::builder()
            .with_operator(lookup_operator())
            .unwrap()
            .with_operator(present_operator())
            .unwrap()
            .build();
        let decider = ScriptedDecider::new(vec![
            json!({"action": "lookup", "input": "find the asset"}),
            json!({"subject": "asset X"}),
            json!({"action": "present", "input": "wrap it up"}),
            json!({"content": "done"}),
        ]);
        let limits = RunLimits::default();
        let events = EventSender::disabled();

        scheduler(&registry, &decider, &limits, &events)
            .drive(&Goal::new("price of X", "present the price"))
            .await
            .unwrap();

        // the lookup operator observed an empty log; the next-step prompt
        // after it enumerated exactly one completed step
        let requests = decider.requests();
        assert!(requests[2].instructions.contains("EXECUTED STEPS 1"));
        assert!(requests[2].instructions.contains("BEGIN STEP 1."));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_operator_name_stalls_without_panic() {
        let registry = Registry::builder()
            .with_operator(present_operator())
            .unwrap()
            .build();
        let decider = ScriptedDecider::new(vec![
            json!({"action": "vanish", "input": "ok"}),
            json!({"action": "vanish", "input": "ok"}),
        ]);
        let limits = RunLimits::default();
        let events = EventSender::disabled();

        let result = scheduler(&registry, &decider, &limits, &events)
            .drive(&Goal::new("price of X", "present the price"))
            .await;

        assert!(matches!(
            result,
            Err(OrchestraError::Stalled { completed_steps: 0 })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_selection_retries_then_succeeds() {
        let registry = Registry::builder()
            .with_operator(present_operator())
            .unwrap()
            .build();
        let decider = ScriptedDecider::new(vec![
            json!({"chosen": "present"}),
            json!({"action": "present", "input": "second try"}),
            json!({"content": "second try"}),
        ]);
        let limits = RunLimits::default();
        let events = EventSender::disabled();

        let result = scheduler(&registry, &decider, &limits, &events)
            .drive(&Goal::new("price of X", "present the price"))
            .await
            .unwrap();

        assert_eq!(result["presented"], "second try");
    }

    #[tokio::test]
    async fn operator_failure_ends_the_run() {
        let failing = FnOperator::new(
            "explode",
            "Always fails",
            json!({"type": "object"}),
            json!({"type": "object"}),
            |_, _, _| async move { anyhow::bail!("ledger unavailable") },
        );
        let registry = Registry::builder().with_operator(failing).unwrap().build();
        let decider = ScriptedDecider::new(vec![
            json!({"action": "explode", "input": "go"}),
            json!({}),
        ]);
        let limits = RunLimits::default();
        let events = EventSender::disabled();

        let result = scheduler(&registry, &decider, &limits, &events)
            .drive(&Goal::new("do the thing", "thing done"))
            .await;

        match result {
            Err(OrchestraError::OperatorFailed { operator, error }) => {
                assert_eq!(operator, "explode");
                assert!(error.to_string().contains("ledger unavailable"));
            }
            other => panic!("expected operator failure, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reformat_exhaustion_is_a_hard_stop() {
        let registry = Registry::builder()
            .with_operator(present_operator())
            .unwrap()
            .build();
        // both reformat attempts return input missing the required field
        let decider = ScriptedDecider::new(vec![
            json!({"action": "present", "input": "something"}),
            json!({"body": "wrong shape"}),
            json!({"body": "still wrong"}),
        ]);
        let limits = RunLimits::default();
        let events = EventSender::disabled();

        let result = scheduler(&registry, &decider, &limits, &events)
            .drive(&Goal::new("price of X", "present the price"))
            .await;

        assert!(matches!(
            result,
            Err(OrchestraError::ReformatFailed { operator, .. }) if operator == "present"
        ));
        // no further scheduling was attempted after the reformat failure
        assert_eq!(decider.requests().len(), 3);
    }

    #[tokio::test]
    async fn empty_instruction_skips_reformat() {
        let nullary = FnOperator::new(
            "snapshot",
            "Needs no input",
            json!({"type": "object"}),
            json!({"type": "object"}),
            |input, _, _| async move { Ok(json!({"input_was_null": input.is_null()})) },
        )
        .terminal();
        let registry = Registry::builder().with_operator(nullary).unwrap().build();
        let decider = ScriptedDecider::new(vec![json!({"action": "snapshot", "input": ""})]);
        let limits = RunLimits::default();
        let events = EventSender::disabled();

        let result = scheduler(&registry, &decider, &limits, &events)
            .drive(&Goal::new("snapshot now", "snapshot taken"))
            .await
            .unwrap();

        assert_eq!(result["input_was_null"], true);
        assert_eq!(decider.requests().len(), 1);
    }
}
