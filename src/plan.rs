use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::outputs::OutputEntry;
use crate::resource::{Reference, ResourceDeclaration};
use crate::settings::Stage;

/// Nodes of the fixed environment topology, in build order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeId {
    Network,
    SecurityGroups,
    Bastion,
    Certificate,
    RelationalDatabase,
    KeyValueTable,
    ApplicationRuntime,
    ApiFrontDoor,
    Identity,
}

/// Established build order. A node may only depend on nodes listed before it.
pub const BUILD_ORDER: [NodeId; 9] = [
    NodeId::Network,
    NodeId::SecurityGroups,
    NodeId::Bastion,
    NodeId::Certificate,
    NodeId::RelationalDatabase,
    NodeId::KeyValueTable,
    NodeId::ApplicationRuntime,
    NodeId::ApiFrontDoor,
    NodeId::Identity,
];

impl NodeId {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeId::Network => "Network",
            NodeId::SecurityGroups => "SecurityGroups",
            NodeId::Bastion => "Bastion",
            NodeId::Certificate => "Certificate",
            NodeId::RelationalDatabase => "RelationalDatabase",
            NodeId::KeyValueTable => "KeyValueTable",
            NodeId::ApplicationRuntime => "ApplicationRuntime",
            NodeId::ApiFrontDoor => "ApiFrontDoor",
            NodeId::Identity => "Identity",
        }
    }

    /// Position in [`BUILD_ORDER`].
    pub fn rank(&self) -> usize {
        BUILD_ORDER
            .iter()
            .position(|node| node == self)
            .unwrap_or(BUILD_ORDER.len())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an optional node: either its handle or an explicit absence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeSlot<H> {
    Present(H),
    Absent,
}

impl<H> NodeSlot<H> {
    pub fn is_present(&self) -> bool {
        matches!(self, NodeSlot::Present(_))
    }

    pub fn as_ref(&self) -> NodeSlot<&H> {
        match self {
            NodeSlot::Present(handle) => NodeSlot::Present(handle),
            NodeSlot::Absent => NodeSlot::Absent,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(H) -> U) -> NodeSlot<U> {
        match self {
            NodeSlot::Present(handle) => NodeSlot::Present(f(handle)),
            NodeSlot::Absent => NodeSlot::Absent,
        }
    }
}

/// Provider-agnostic view of what a node built: identifiers other nodes can
/// consume, descriptive attributes, the declarations it contributes and the
/// outputs it wants surfaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceHandle {
    pub node: NodeId,
    pub identifiers: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
    pub resources: Vec<ResourceDeclaration>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<OutputEntry>,
}

impl ResourceHandle {
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            identifiers: BTreeMap::new(),
            attributes: BTreeMap::new(),
            resources: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn identifier(mut self, name: &str, reference: &Reference) -> Self {
        self.identifiers
            .insert(name.to_string(), Value::String(reference.to_string()));
        self
    }

    pub fn identifier_list(mut self, name: &str, references: &[Reference]) -> Self {
        let values = references
            .iter()
            .map(|reference| Value::String(reference.to_string()))
            .collect();
        self.identifiers.insert(name.to_string(), Value::Array(values));
        self
    }

    pub fn attribute(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.to_string(), value.into());
        self
    }

    pub fn resources(mut self, resources: impl IntoIterator<Item = ResourceDeclaration>) -> Self {
        self.resources.extend(resources);
        self
    }

    pub fn output(mut self, name: impl Into<String>, reference: Reference) -> Self {
        self.outputs.push(OutputEntry::new(name, reference));
        self
    }
}

/// One provider invocation bound to its resolved inputs and produced handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    pub id: NodeId,
    pub depends_on: Vec<NodeId>,
    pub inputs: Value,
    pub handle: ResourceHandle,
}

/// Optional node left out of the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedNode {
    pub id: NodeId,
    pub reason: String,
}

/// Dependency-ordered provisioning plan for one environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub stage: Stage,
    pub nodes: Vec<PlanNode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedNode>,
}

impl Plan {
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|node| node.id).collect()
    }

    pub fn node(&self, id: NodeId) -> Option<&PlanNode> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    pub fn resources(&self) -> impl Iterator<Item = &ResourceDeclaration> {
        self.nodes.iter().flat_map(|node| node.handle.resources.iter())
    }

    /// Returns a compact summary string for CLI output.
    pub fn summary(&self) -> String {
        format!(
            "Plan for {}: {} nodes ({}), {} resources, {} skipped",
            self.stage,
            self.nodes.len(),
            self.node_ids()
                .iter()
                .map(NodeId::as_str)
                .collect::<Vec<_>>()
                .join(" -> "),
            self.resources().count(),
            self.skipped.len()
        )
    }

    /// SHA-256 over node order, identifiers and attributes. Two plans built
    /// from the same config share a fingerprint.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for node in &self.nodes {
            hasher.update(node.id.as_str().as_bytes());
            for (key, value) in node
                .handle
                .identifiers
                .iter()
                .chain(node.handle.attributes.iter())
            {
                hasher.update(key.as_bytes());
                hasher.update(value.to_string().as_bytes());
            }
        }
        format!("sha256:{:x}", hasher.finalize())
    }
}
