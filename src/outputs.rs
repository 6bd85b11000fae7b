use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ProvisionError, Result};
use crate::plan::{NodeId, PlanNode};
use crate::resource::Reference;

/// Named value surfaced for operators and downstream tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputEntry {
    pub name: String,
    pub value: String,
    pub reference: Reference,
}

impl OutputEntry {
    pub fn new(name: impl Into<String>, reference: Reference) -> Self {
        Self {
            name: name.into(),
            value: reference.to_string(),
            reference,
        }
    }
}

/// Accumulates outputs in build order and rejects duplicate names.
#[derive(Debug, Default)]
pub struct OutputCollector {
    entries: IndexMap<String, (NodeId, OutputEntry)>,
}

impl OutputCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one node's outputs. The first duplicate name aborts.
    pub fn record(&mut self, node: NodeId, outputs: &[OutputEntry]) -> Result<()> {
        for entry in outputs {
            if let Some((first, _)) = self.entries.get(&entry.name) {
                return Err(ProvisionError::DuplicateOutputName {
                    name: entry.name.clone(),
                    first: *first,
                    second: node,
                });
            }
            debug!(node = %node, output = %entry.name, "collected output");
            self.entries
                .insert(entry.name.clone(), (node, entry.clone()));
        }
        Ok(())
    }

    /// Walks `nodes` in build order and gathers every declared output.
    pub fn collect(mut self, nodes: &[PlanNode]) -> Result<Vec<OutputEntry>> {
        for node in nodes {
            self.record(node.id, &node.handle.outputs)?;
        }
        Ok(self.finish())
    }

    pub fn finish(self) -> Vec<OutputEntry> {
        self.entries.into_values().map(|(_, entry)| entry).collect()
    }
}
