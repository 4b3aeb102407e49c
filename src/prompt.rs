//! Decision-request shaping
//!
//! Every request body the core sends to the decision service is built
//! here: pure string and schema construction, no I/O. The section tags
//! keep each request self-contained - the decision service is stateless
//! per call.

use std::fmt::Write;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::capability::{CapabilityMeta, Operator, Reader};
use crate::context::{ContextLog, Goal};
use crate::decision::{DecisionRequest, OptionSpec};

/// One reader's gathered data, ready for the sources blob
pub(crate) struct SourceRecord {
    pub name: String,
    pub description: String,
    pub result: Value,
}

fn goal_header(goal: &Goal) -> String {
    format!(
        "I am an assistant whose prime directive is: {directive}\n\
         I will end execution once my completion criteria of \"{criteria}\" is met.\n\
         My current task is:\n{task}\n\
         I want to complete this as long as it is achievable by my prime directive.\n",
        directive = goal.directive,
        criteria = goal.completion_criteria,
        task = goal.task,
    )
}

/// Numbered summary of every completed step, oldest first
pub(crate) fn render_stack(log: &ContextLog) -> String {
    let mut out = String::new();
    for (i, entry) in log.entries().iter().enumerate() {
        let _ = write!(
            out,
            "BEGIN STEP {n}.\n{task}.\n{description}.\n{result}.\nEND STEP {n}.\n",
            n = i + 1,
            task = entry.task,
            description = entry.task_description,
            result = entry.task_result,
        );
    }
    out
}

/// Per-reader summary blob attached to the goal after context gathering
pub(crate) fn render_sources(records: &[SourceRecord]) -> String {
    let mut out = String::from("<sources>\n");
    for record in records {
        let _ = write!(
            out,
            "<source>\nSOURCE {name}\nSOURCE DESCRIPTION {description}\nRESULTS:\n{result}\n</source>\n",
            name = record.name,
            description = record.description,
            result = record.result,
        );
    }
    out.push_str("</sources>");
    out
}

/// Ask which readers are relevant to the goal
pub(crate) fn reader_selection(goal: &Goal, readers: &[Arc<dyn Reader>]) -> DecisionRequest {
    let mut listing = String::new();
    for reader in readers {
        let _ = write!(
            listing,
            "SOURCE: {name}\nDESCRIPTION: {description}\n\n",
            name = reader.name(),
            description = reader.description(),
        );
    }

    let instructions = format!(
        "<foundational-information>\n{header}</foundational-information>\n\n\
         <instructions>\n\
         First I want to determine whether the task needs context data from my sources.\n\
         Here are my sources:\n\n<sources>\n{listing}</sources>\n\
         If any of the listed sources are helpful towards achieving my task, include their names.\n\
         If none of the sources are useful, include none of them.\n\
         </instructions>",
        header = goal_header(goal),
        listing = listing,
    );

    let options = readers
        .iter()
        .map(|reader| OptionSpec {
            name: reader.name().to_string(),
            description: reader.description().to_string(),
            schema: None,
        })
        .collect();

    DecisionRequest::new(
        instructions,
        "select_sources",
        json!({
            "type": "object",
            "properties": {
                "sources": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["sources"]
        }),
    )
    .with_options(options)
}

/// Ask the service to construct a query object for one reader
pub(crate) fn reader_query(
    goal: &Goal,
    name: &str,
    description: &str,
    query_schema: &Value,
) -> DecisionRequest {
    let instructions = format!(
        "I am an assistant whose prime directive is: {directive}\n\
         <task>\n\
         My current task is:\n{task}\n\n\
         In order to complete this task I need to query this data source:\n\
         DATA SOURCE NAME {name}\n\
         DATA SOURCE DESCRIPTION {description}\n\
         </task>\n\
         <main-instruction>\n\
         Construct a query for this data source.\n\
         </main-instruction>",
        directive = goal.directive,
        task = goal.task,
    );

    DecisionRequest::new(
        instructions,
        "create_query_params",
        json!({
            "type": "object",
            "properties": { "params": query_schema },
            "required": ["params"]
        }),
    )
}

/// Ask which operator to run next, and with what instruction
///
/// Terminal presentation operators are enumerated alongside the rest; the
/// reply is constrained to the registered names.
pub(crate) fn next_step(
    goal: &Goal,
    log: &ContextLog,
    operators: &[Arc<dyn Operator>],
) -> DecisionRequest {
    let mut library = String::new();
    let mut names = Vec::with_capacity(operators.len());
    let mut terminal_names = Vec::new();
    for operator in operators {
        names.push(operator.name().to_string());
        if operator.is_terminal() {
            terminal_names.push(operator.name().to_string());
        }
        let _ = write!(
            library,
            "ACTION: {name} - {description}.\nInputSchema: {input}.\nOutputSchema: {output}.\n\n",
            name = operator.name(),
            description = operator.description(),
            input = operator.input_schema(),
            output = operator.output_schema(),
        );
    }

    let stack = render_stack(log);
    let instructions = format!(
        "<system-information>\n{header}</system-information>\n\n\
         <how-i-work>\n\
         I also have a number of data sources I can reference:\n{sources}\n\
         </how-i-work>\n\n\
         <execution-stack>\n\
         EXECUTED STEPS {count}\n{stack_label}\n{stack}\
         </execution-stack>\n\n\
         <library>\n\
         Available actions to do next:\n{library}\
         </library>\n\n\
         <what-to-do>\n\
         Choose one of the above actions for the next step.\n\
         If there are no more steps forward, or the task can be completed from the data \
         sources alone, choose a presentation action ({terminals}) and pass in the relevant \
         result data.\n\
         </what-to-do>",
        header = goal_header(goal),
        sources = goal
            .sources
            .as_deref()
            .unwrap_or("No data sources required for this task"),
        count = log.len(),
        stack_label = if log.is_empty() {
            "no steps have been completed yet"
        } else {
            "COMPLETED STEPS"
        },
        stack = stack,
        library = library,
        terminals = terminal_names.join(", "),
    );

    let options = operators
        .iter()
        .map(|operator| {
            let meta = CapabilityMeta::of_operator(operator.as_ref());
            OptionSpec {
                name: meta.name,
                description: meta.description,
                schema: Some(meta.input_schema),
            }
        })
        .collect();

    DecisionRequest::new(
        instructions,
        "next_step",
        json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "enum": names },
                "input": { "type": "string" }
            },
            "required": ["action", "input"]
        }),
    )
    .with_options(options)
}

/// Ask the service to restructure a candidate input into an operator's contract
pub(crate) fn reformat(
    operator: &dyn Operator,
    candidate: &Value,
    log: &ContextLog,
) -> DecisionRequest {
    let instructions = format!(
        "<instruction>\n\
         Structure the result into the correct format for the next action. \
         You can draw on the execution stack for more context.\n\
         </instruction>\n\n\
         <action>\n{name}: {description}\n</action>\n\n\
         <execution-stack>\n{stack}</execution-stack>\n\n\
         <previous-result>\n{candidate}\n</previous-result>",
        name = operator.name(),
        description = operator.description(),
        stack = render_stack(log),
        candidate = candidate,
    );

    DecisionRequest::new(instructions, operator.name(), operator.input_schema().clone())
}

/// Derive an execution task and completion criteria from a raw human request
pub(crate) fn encode_request(human_request: &str, directive: &str) -> DecisionRequest {
    let instructions = format!(
        "<system-information>\n\
         I am an assistant whose prime directive is: {directive}\n\
         </system-information>\n\
         <instructions>\n\
         Based on the human request, determine a goal I can achieve that is aligned with \
         my prime directive.\n\
         Also determine a simple and straightforward completion criteria, not more than \
         5 words, that I can evaluate my progress against and know when to stop executing.\n\
         </instructions>\n\
         <input>\nHere is what the human says:\n{human_request}\n</input>",
    );

    DecisionRequest::new(
        instructions,
        "to_execution_task",
        json!({
            "type": "object",
            "properties": {
                "task": { "type": "string" },
                "completion_criteria": { "type": "string" }
            },
            "required": ["task", "completion_criteria"]
        }),
    )
}

/// Convert a final payload into a human-friendly response
pub(crate) fn decode_result(result: &Value, goal: &Goal) -> DecisionRequest {
    let instructions = format!(
        "Based on the result of the task and the initial request, convert the result \
         into a human-friendly response.\n\
         Here is the result of the task:\n{result}\n\
         Here is the initial request:\n{task}",
        result = result,
        task = goal.task,
    );

    DecisionRequest::new(
        instructions,
        "to_human_response",
        json!({
            "type": "object",
            "properties": { "response": { "type": "string" } },
            "required": ["response"]
        }),
    )
}
