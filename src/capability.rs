//! Capability contracts - readers fetch context, operators do work
//!
//! Both kinds share the same surface: a unique name, a prompt-facing
//! description, and structural contracts for what goes in and out. The
//! description is documentation for the decision service, never executed.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, warn};

use crate::context::{ContextEntry, ContextLog, Goal};
use crate::decision::{decide_bounded, Decider};
use crate::{prompt, schema};

/// Prompt-facing summary of a capability
#[derive(Debug, Clone, serde::Serialize)]
pub struct CapabilityMeta {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub output_schema: Value,
}

impl CapabilityMeta {
    pub fn of_operator(operator: &dyn Operator) -> Self {
        Self {
            name: operator.name().to_string(),
            description: operator.description().to_string(),
            input_schema: operator.input_schema().clone(),
            output_schema: operator.output_schema().clone(),
        }
    }

    pub fn of_reader(reader: &dyn Reader) -> Self {
        Self {
            name: reader.name().to_string(),
            description: reader.description().to_string(),
            input_schema: reader.query_schema().clone(),
            output_schema: reader.result_schema().clone(),
        }
    }
}

/// Side-effect-free data-fetch capability
///
/// Readers are invoked in two phases: the decision service constructs a
/// query from the goal, and only a query that validates against
/// [`Reader::query_schema`] reaches [`Reader::fetch`].
#[async_trait]
pub trait Reader: Send + Sync {
    /// Unique name within a registry; the literal value the decision
    /// service emits to select this reader
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Contract the constructed query must satisfy
    fn query_schema(&self) -> &Value;

    /// Shape of the data this reader produces
    fn result_schema(&self) -> &Value;

    /// Fetch data for a validated query
    async fn fetch(&self, query: Value) -> anyhow::Result<Value>;

    /// Two-phase invocation against a goal
    ///
    /// `Ok(None)` means the constructed query did not validate and the
    /// reader yields no result - an omission, never a fatal condition.
    /// Fetch-level failures (and decision transport failures) propagate
    /// as errors for the caller to isolate.
    async fn read(
        &self,
        goal: &Goal,
        decider: &dyn Decider,
        deadline: Duration,
    ) -> anyhow::Result<Option<Value>> {
        let request = prompt::reader_query(
            goal,
            self.name(),
            self.description(),
            self.query_schema(),
        );

        let reply = decide_bounded(decider, request, deadline).await?;
        let query = reply.get("params").cloned().unwrap_or(Value::Null);

        if let Err(detail) = schema::validate(self.query_schema(), &query) {
            warn!(reader = %self.name(), %detail, "constructed query rejected, skipping reader");
            return Ok(None);
        }

        debug!(reader = %self.name(), "query validated, fetching");
        let result = self.fetch(query).await?;
        Ok(Some(result))
    }
}

/// Effectful or compute capability, one step of work
///
/// Side effects are the operator's private concern; the core only needs
/// the success/failure outcome and, on success, the typed payload.
#[async_trait]
pub trait Operator: Send + Sync {
    /// Unique name within a registry; the literal value the decision
    /// service emits to select this operator
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Contract the (possibly reformatted) input must satisfy
    fn input_schema(&self) -> &Value;

    /// Shape of the result appended to the context log
    fn output_schema(&self) -> &Value;

    /// Whether completing this operator ends the run, with its output
    /// delivered as the run's final payload
    fn is_terminal(&self) -> bool {
        false
    }

    /// Perform the step
    async fn execute(&self, input: Value, goal: &Goal, log: &ContextLog)
        -> anyhow::Result<Value>;
}

type ReaderFn = Box<dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// [`Reader`] built from a closure, for registration without a hand-written impl
pub struct FnReader {
    name: String,
    description: String,
    query_schema: Value,
    result_schema: Value,
    fetch: ReaderFn,
}

impl FnReader {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        query_schema: Value,
        result_schema: Value,
        fetch: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            query_schema,
            result_schema,
            fetch: Box::new(move |query| fetch(query).boxed()),
        }
    }
}

#[async_trait]
impl Reader for FnReader {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn query_schema(&self) -> &Value {
        &self.query_schema
    }

    fn result_schema(&self) -> &Value {
        &self.result_schema
    }

    async fn fetch(&self, query: Value) -> anyhow::Result<Value> {
        (self.fetch)(query).await
    }
}

type OperatorFn = Box<
    dyn Fn(Value, Goal, Vec<ContextEntry>) -> BoxFuture<'static, anyhow::Result<Value>>
        + Send
        + Sync,
>;

/// [`Operator`] built from a closure
///
/// The closure receives owned snapshots of the goal and context entries.
pub struct FnOperator {
    name: String,
    description: String,
    input_schema: Value,
    output_schema: Value,
    terminal: bool,
    run: OperatorFn,
}

impl FnOperator {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        output_schema: Value,
        run: F,
    ) -> Self
    where
        F: Fn(Value, Goal, Vec<ContextEntry>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            output_schema,
            terminal: false,
            run: Box::new(move |input, goal, entries| run(input, goal, entries).boxed()),
        }
    }

    /// Mark this operator as a terminal presentation capability
    pub fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }
}

#[async_trait]
impl Operator for FnOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> &Value {
        &self.input_schema
    }

    fn output_schema(&self) -> &Value {
        &self.output_schema
    }

    fn is_terminal(&self) -> bool {
        self.terminal
    }

    async fn execute(
        &self,
        input: Value,
        goal: &Goal,
        log: &ContextLog,
    ) -> anyhow::Result<Value> {
        (self.run)(input, goal.clone(), log.entries().to_vec()).await
    }
}
