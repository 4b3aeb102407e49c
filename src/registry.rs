//! Capability registry
//!
//! Readers and operators are registered once at process start, then the
//! registry is frozen and shared read-only across concurrent runs.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::capability::{Operator, Reader};
use crate::context::Goal;
use crate::decision::{decide_bounded, Decider};
use crate::error::OrchestraError;
use crate::prompt;

/// Accumulates capabilities before the registry is frozen
///
/// Registration is the only mutation surface exposed to application code,
/// and it must finish before any run starts. Names are unique across both
/// kinds; a duplicate is a configuration error caught here rather than a
/// silent shadowing at selection time.
#[derive(Default)]
pub struct RegistryBuilder {
    readers: Vec<Arc<dyn Reader>>,
    operators: Vec<Arc<dyn Operator>>,
    names: HashSet<String>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn claim_name(&mut self, name: &str) -> Result<(), OrchestraError> {
        if !self.names.insert(name.to_string()) {
            return Err(OrchestraError::DuplicateCapability(name.to_string()));
        }
        Ok(())
    }

    pub fn with_reader(
        mut self,
        reader: impl Reader + 'static,
    ) -> Result<Self, OrchestraError> {
        self.claim_name(reader.name())?;
        self.readers.push(Arc::new(reader));
        Ok(self)
    }

    pub fn with_operator(
        mut self,
        operator: impl Operator + 'static,
    ) -> Result<Self, OrchestraError> {
        self.claim_name(operator.name())?;
        self.operators.push(Arc::new(operator));
        Ok(self)
    }

    /// Freeze the registry
    pub fn build(self) -> Registry {
        let reader_index = self
            .readers
            .iter()
            .enumerate()
            .map(|(i, r)| (r.name().to_string(), i))
            .collect();
        let operator_index = self
            .operators
            .iter()
            .enumerate()
            .map(|(i, o)| (o.name().to_string(), i))
            .collect();

        Registry {
            readers: self.readers,
            operators: self.operators,
            reader_index,
            operator_index,
        }
    }
}

/// Immutable collection of named readers and operators
///
/// Lookup is total over the names known at build time; an unknown name is
/// a distinguishable `None`, reachable from a malformed decision-service
/// reply, and never a panic.
pub struct Registry {
    readers: Vec<Arc<dyn Reader>>,
    operators: Vec<Arc<dyn Operator>>,
    reader_index: HashMap<String, usize>,
    operator_index: HashMap<String, usize>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn reader(&self, name: &str) -> Option<&Arc<dyn Reader>> {
        self.reader_index.get(name).map(|&i| &self.readers[i])
    }

    pub fn operator(&self, name: &str) -> Option<&Arc<dyn Operator>> {
        self.operator_index.get(name).map(|&i| &self.operators[i])
    }

    /// All readers, in registration order
    pub fn readers(&self) -> &[Arc<dyn Reader>] {
        &self.readers
    }

    /// All operators, in registration order
    pub fn operators(&self) -> &[Arc<dyn Operator>] {
        &self.operators
    }

    /// Ask the decision service which readers are relevant to the goal
    ///
    /// Readers are an optimization, not mandatory: any transport, parse,
    /// or shape failure degrades to an empty selection rather than
    /// failing the run.
    pub async fn select_readers(
        &self,
        goal: &Goal,
        decider: &dyn Decider,
        deadline: Duration,
    ) -> Vec<String> {
        if self.readers.is_empty() {
            return Vec::new();
        }

        let request = prompt::reader_selection(goal, &self.readers);
        let reply = match decide_bounded(decider, request, deadline).await {
            Ok(reply) => reply,
            Err(error) => {
                warn!(%error, "reader selection failed, selecting none");
                return Vec::new();
            }
        };

        match reply.get("sources").and_then(Value::as_array) {
            Some(names) => {
                let selected: Vec<String> = names
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect();
                debug!(count = selected.len(), "readers selected");
                selected
            }
            None => {
                warn!("reader selection reply had no source list, selecting none");
                Vec::new()
            }
        }
    }
}
