//! # Conclave
//!
//! Goal-directed capability orchestration - the deciding circle.
//!
//! Given a goal and a fixed prime directive, the orchestrator repeatedly
//! asks an external decision service which registered capability to invoke
//! next, executes it, accumulates results in an append-only context log,
//! and stops when a terminal presentation capability completes.
//!
//! ## Architecture
//!
//! ```text
//!                        ┌──────────────────────┐
//!                        │     ORCHESTRATOR     │
//!                        │  run(goal) → payload │
//!                        └──────────┬───────────┘
//!                    context        │        step chain
//!              ┌────────────────────┴────────────────────┐
//!              ▼                                         ▼
//!   ┌─────────────────────┐                 ┌─────────────────────────┐
//!   │  READERS (fan-out)  │                 │  SCHEDULER (sequential) │
//!   │ query → validate →  │                 │ choose → reformat →     │
//!   │ fetch, isolated     │                 │ execute → append → loop │
//!   └──────────┬──────────┘                 └────────────┬────────────┘
//!              │                                         │
//!              └──────────────► DECISION ◄───────────────┘
//!                               SERVICE
//! ```
//!
//! ## Key Concepts
//!
//! - **Reader**: side-effect-free capability that fetches contextual data
//!   for a goal-derived query
//! - **Operator**: capability that performs one step of work; a terminal
//!   operator's output is the run's final payload
//! - **Registry**: immutable-after-setup collection of named capabilities
//! - **Context Log**: append-only record of completed operator invocations
//!   within one run
//! - **Decider**: the external decision service, the only source of
//!   "intelligence" in the core

pub mod capability;
pub mod codec;
pub mod context;
pub mod decision;
pub mod error;
pub mod events;
pub mod orchestrator;
mod prompt;
pub mod registry;
mod schema;
pub mod step;

pub use capability::{CapabilityMeta, FnOperator, FnReader, Operator, Reader};
pub use codec::{decode_result, encode_request};
pub use context::{ContextEntry, ContextLog, Goal};
pub use decision::{Decider, DecisionError, DecisionRequest, OptionSpec};
pub use error::OrchestraError;
pub use events::{RunChannel, RunEvent};
pub use orchestrator::{Orchestrator, RunId, RunLimits};
pub use registry::{Registry, RegistryBuilder};
pub use step::{StepId, StepStatus};
