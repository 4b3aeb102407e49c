//! Main orchestrator - gathers reader context and drives the step chain

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::capability::Reader;
use crate::context::Goal;
use crate::decision::Decider;
use crate::error::OrchestraError;
use crate::events::{EventSender, RunChannel, RunEvent};
use crate::prompt::{self, SourceRecord};
use crate::registry::Registry;
use crate::step::Scheduler;

/// Unique identifier for one orchestration run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Timeouts and retry policy applied to every run
///
/// A hung decision-service call or capability invocation must never block
/// a run indefinitely; each asynchronous operation gets a deadline, and
/// the recoverable decision failures get bounded retries with a linear
/// backoff.
#[derive(Debug, Clone)]
pub struct RunLimits {
    /// Deadline per decision-service call
    pub decision_timeout: Duration,
    /// Deadline per reader/operator invocation
    pub capability_timeout: Duration,
    /// Attempts to reshape a candidate input before the step hard-stops
    pub reformat_attempts: u32,
    /// Attempts to parse a next-step selection before the run stalls
    pub schedule_attempts: u32,
    /// Base delay between retry attempts, scaled by the attempt number
    pub retry_backoff: Duration,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            decision_timeout: Duration::from_secs(30),
            capability_timeout: Duration::from_secs(60),
            reformat_attempts: 2,
            schedule_attempts: 2,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

/// The orchestration entry point
///
/// Owns the prime directive and the decision-service handle; shares the
/// read-only registry. Independent runs may execute concurrently against
/// the same orchestrator, each with its own context log.
pub struct Orchestrator {
    registry: Arc<Registry>,
    decider: Arc<dyn Decider>,
    directive: String,
    limits: RunLimits,
    events: EventSender,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<Registry>,
        decider: Arc<dyn Decider>,
        directive: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            decider,
            directive: directive.into(),
            limits: RunLimits::default(),
            events: EventSender::disabled(),
        }
    }

    /// Create an orchestrator and a channel for observing run events
    pub fn with_channel(
        registry: Arc<Registry>,
        decider: Arc<dyn Decider>,
        directive: impl Into<String>,
    ) -> (Self, RunChannel) {
        let (channel, events) = RunChannel::new();
        let mut orchestrator = Self::new(registry, decider, directive);
        orchestrator.events = events;
        (orchestrator, channel)
    }

    /// Override the default timeouts and retry policy
    pub fn with_limits(mut self, limits: RunLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Execute one goal to completion
    ///
    /// Completes exactly once: with the terminal operator's payload, or
    /// with the first step failure, or with [`OrchestraError::Stalled`]
    /// when no next step could be determined.
    #[instrument(skip_all, fields(task = %goal.task))]
    pub async fn run(&self, goal: Goal) -> Result<Value, OrchestraError> {
        let run_id = RunId::new();
        info!(run_id = %run_id, "starting run");
        self.events.emit(RunEvent::RunStarted {
            run_id,
            task: goal.task.clone(),
        });

        let goal = self.gather_context(run_id, goal).await;

        let scheduler = Scheduler {
            registry: &self.registry,
            decider: &*self.decider,
            limits: &self.limits,
            events: &self.events,
            run_id,
        };
        let result = scheduler.drive(&goal).await;

        match &result {
            Ok(_) => info!(run_id = %run_id, "run completed"),
            Err(error) => warn!(run_id = %run_id, %error, "run ended without completion"),
        }
        self.events.emit(RunEvent::RunFinished {
            run_id,
            success: result.is_ok(),
        });

        result
    }

    /// Stamp the directive onto the goal, then select and invoke the
    /// relevant readers concurrently
    ///
    /// Each reader is isolated: a failed or skipped reader is dropped
    /// from the sources blob and the run proceeds without it.
    async fn gather_context(&self, run_id: RunId, mut goal: Goal) -> Goal {
        goal.directive = self.directive.clone();

        let selected = self
            .registry
            .select_readers(&goal, &*self.decider, self.limits.decision_timeout)
            .await;
        self.events.emit(RunEvent::ReadersSelected {
            run_id,
            sources: selected.clone(),
        });
        if selected.is_empty() {
            return goal;
        }

        let goal_ref = &goal;
        let reads = selected.iter().map(|name| async move {
            let Some(reader) = self.registry.reader(name) else {
                warn!(run_id = %run_id, reader = %name, "selected reader is not registered");
                return None;
            };

            let outcome = tokio::time::timeout(
                self.limits.capability_timeout,
                reader.read(goal_ref, &*self.decider, self.limits.decision_timeout),
            )
            .await;

            match outcome {
                Err(_) => {
                    warn!(run_id = %run_id, reader = %name, "reader timed out");
                    self.events.emit(RunEvent::ReaderSkipped {
                        run_id,
                        reader: name.clone(),
                        reason: "timed out".into(),
                    });
                    None
                }
                Ok(Err(error)) => {
                    warn!(run_id = %run_id, reader = %name, %error, "reader failed");
                    self.events.emit(RunEvent::ReaderSkipped {
                        run_id,
                        reader: name.clone(),
                        reason: error.to_string(),
                    });
                    None
                }
                Ok(Ok(None)) => {
                    self.events.emit(RunEvent::ReaderSkipped {
                        run_id,
                        reader: name.clone(),
                        reason: "query did not validate".into(),
                    });
                    None
                }
                Ok(Ok(Some(result))) => {
                    self.events.emit(RunEvent::ReaderFetched {
                        run_id,
                        reader: name.clone(),
                    });
                    Some(SourceRecord {
                        name: reader.name().to_string(),
                        description: reader.description().to_string(),
                        result,
                    })
                }
            }
        });

        let records: Vec<SourceRecord> = join_all(reads).await.into_iter().flatten().collect();

        if !records.is_empty() {
            goal.sources = Some(prompt::render_sources(&records));
        }
        goal
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::capability::{FnOperator, FnReader};
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
            |input, _, _| async move {
                Ok(json!([{"name": "present", "payload": {"content": input["content"]}}]))
            },
        )
        .terminal()
    }

    fn price_reader() -> FnReader {
        FnReader::new(
            "get_price",
            "Get the price of a specific asset",
            json!({
                "type": "object",
                "properties": { "asset": { "type": "string" } },
                "required": ["asset"]
            }),
            json!({"type": "object", "properties": {"price": {"type": "number"}}}),
            |query| async move { Ok(json!({"asset": query["asset"], "price": 100})) },
        )
    }

    fn failing_reader(name: &str) -> FnReader {
        FnReader::new(
            name,
            "Reader that always fails to fetch",
            json!({"type": "object"}),
            json!({"type": "object"}),
            |_| async move { anyhow::bail!("upstream unreachable") },
        )
    }

    fn trading_goal() -> Goal {
        Goal::new("what is the price of asset X", "present the price")
    }

    #[tokio::test]
    async fn price_query_runs_end_to_end() {
        let registry = Arc::new(
            Registry::builder()
                .with_reader(price_reader())
                .unwrap()
                .with_operator(present_operator())
                .unwrap()
                .build(),
        );
        let decider = Arc::new(ScriptedDecider::new(vec![
            json!({"sources": ["get_price"]}),
            json!({"params": {"asset": "X"}}),
            json!({"action": "present", "input": "the price of X is 100"}),
            json!({"content": "the price of X is 100"}),
        ]));
        let (orchestrator, channel) = Orchestrator::with_channel(
            Arc::clone(&registry),
            decider.clone() as Arc<dyn Decider>,
            "trading assistant",
        );

        let result = orchestrator.run(trading_goal()).await.unwrap();

        assert_eq!(result[0]["name"], "present");
        assert_eq!(result[0]["payload"]["content"], "the price of X is 100");

        // the scheduling prompt saw the gathered price data
        let requests = decider.requests();
        assert!(requests[2].instructions.contains("SOURCE get_price"));
        assert!(requests[2].instructions.contains("\"price\":100"));
        // and every prompt carried the orchestrator's directive
        assert!(requests[0].instructions.contains("trading assistant"));

        let mut finished = false;
        while let Some(event) = channel.try_recv() {
            if let RunEvent::RunFinished { success, .. } = event {
                finished = true;
                assert!(success);
            }
        }
        assert!(finished);
    }

    #[tokio::test]
    async fn failed_reader_is_isolated_from_the_batch() {
        let registry = Arc::new(
            Registry::builder()
                .with_reader(failing_reader("get_news"))
                .unwrap()
                .with_reader(price_reader())
                .unwrap()
                .with_operator(present_operator())
                .unwrap()
                .build(),
        );
        let decider = Arc::new(ScriptedDecider::new(vec![
            json!({"sources": ["get_news", "get_price"]}),
            json!({"params": {}}),
            json!({"params": {"asset": "X"}}),
            json!({"action": "present", "input": "summarise"}),
            json!({"content": "the price of X is 100"}),
        ]));
        let orchestrator = Orchestrator::new(
            Arc::clone(&registry),
            decider.clone() as Arc<dyn Decider>,
            "trading assistant",
        );

        let result = orchestrator.run(trading_goal()).await;
        assert!(result.is_ok());

        let next_step_request = decider
            .requests()
            .into_iter()
            .find(|r| r.reply_name == "next_step")
            .expect("a scheduling request was made");
        assert!(next_step_request.instructions.contains("SOURCE get_price"));
        assert!(!next_step_request.instructions.contains("SOURCE get_news"));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_run_reports_a_distinct_outcome() {
        let registry = Arc::new(
            Registry::builder()
                .with_operator(present_operator())
                .unwrap()
                .build(),
        );
        let decider = Arc::new(ScriptedDecider::new(vec![
            json!({"sources": []}),
            json!({"nonsense": true}),
            json!({"nonsense": true}),
        ]));
        let (orchestrator, channel) = Orchestrator::with_channel(
            Arc::clone(&registry),
            decider as Arc<dyn Decider>,
            "trading assistant",
        );

        // registry has no readers, so the selection call is skipped and
        // the two scripted replies both land on scheduling attempts
        let result = orchestrator.run(trading_goal()).await;

        match result {
            Err(error) => assert!(error.is_stalled()),
            Ok(_) => panic!("expected a stalled run"),
        }

        let mut finished_success = None;
        while let Some(event) = channel.try_recv() {
            if let RunEvent::RunFinished { success, .. } = event {
                finished_success = Some(success);
            }
        }
        assert_eq!(finished_success, Some(false));
    }

    #[tokio::test]
    async fn unregistered_selected_reader_is_skipped() {
        let registry = Arc::new(
            Registry::builder()
                .with_reader(price_reader())
                .unwrap()
                .with_operator(present_operator())
                .unwrap()
                .build(),
        );
        let decider = Arc::new(ScriptedDecider::new(vec![
            json!({"sources": ["ghost"]}),
            json!({"action": "present", "input": ""}),
        ]));
        let orchestrator = Orchestrator::new(
            Arc::clone(&registry),
            decider.clone() as Arc<dyn Decider>,
            "trading assistant",
        );

        let result = orchestrator.run(trading_goal()).await;
        assert!(result.is_ok());

        let next_step_request = decider
            .requests()
            .into_iter()
            .find(|r| r.reply_name == "next_step")
            .expect("a scheduling request was made");
        assert!(next_step_request
            .instructions
            .contains("No data sources required"));
    }

    #[tokio::test]
    async fn concurrent_runs_share_one_registry() {
        let registry = Arc::new(
            Registry::builder()
                .with_operator(present_operator())
                .unwrap()
                .build(),
        );

        let run = |task: &str, content: &str| {
            let decider = Arc::new(ScriptedDecider::new(vec![
                json!({"action": "present", "input": content}),
                json!({"content": content}),
            ]));
            let orchestrator = Orchestrator::new(
                Arc::clone(&registry),
                decider as Arc<dyn Decider>,
                "trading assistant",
            );
            let goal = Goal::new(task, "present the price");
            async move { orchestrator.run(goal).await }
        };

        let (first, second) =
            tokio::join!(run("price of X", "X is 100"), run("price of Y", "Y is 7"));

        assert_eq!(first.unwrap()[0]["payload"]["content"], "X is 100");
        assert_eq!(second.unwrap()[0]["payload"]["content"], "Y is 7");
    }

    #[tokio::test]
    async fn operator_failure_surfaces_through_run() {
        let failing = FnOperator::new(
            "transfer",
            "Move tokens between accounts",
            json!({"type": "object"}),
            json!({"type": "object"}),
            |_, _, _| async move { anyhow::bail!("insufficient balance") },
        );
        let registry = Arc::new(
            Registry::builder()
                .with_operator(failing)
                .unwrap()
                .with_operator(present_operator())
                .unwrap()
                .build(),
        );
        let decider = Arc::new(ScriptedDecider::new(vec![
            json!({"action": "transfer", "input": ""}),
        ]));
        let orchestrator = Orchestrator::new(
            Arc::clone(&registry),
            decider as Arc<dyn Decider>,
            "trading assistant",
        );

        let result = orchestrator
            .run(Goal::new("move 5 tokens to bob", "tokens moved"))
            .await;

        assert!(matches!(
            result,
            Err(OrchestraError::OperatorFailed { operator, .. }) if operator == "transfer"
        ));
    }
}
