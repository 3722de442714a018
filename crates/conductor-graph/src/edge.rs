use serde::{Deserialize, Serialize};

use conductor_core::types::{EdgeId, NodeId, DEFAULT_INPUT, DEFAULT_OUTPUT};

/// A directed connection from an output property to an input property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    /// Source node id.
    pub source: NodeId,
    /// Target node id.
    pub target: NodeId,
    /// Output property read on the source.
    #[serde(default = "default_output")]
    pub source_property: String,
    /// Input property written on the target.
    #[serde(default = "default_input")]
    pub target_property: String,
}

fn default_output() -> String {
    DEFAULT_OUTPUT.to_string()
}

fn default_input() -> String {
    DEFAULT_INPUT.to_string()
}

impl Edge {
    /// Connect `source.result` to `target.input` under a fresh id.
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        Self {
            id: EdgeId::new(),
            source: source.into(),
            target: target.into(),
            source_property: default_output(),
            target_property: default_input(),
        }
    }

    /// Read from a named output property.
    pub fn from_output(mut self, property: impl Into<String>) -> Self {
        self.source_property = property.into();
        self
    }

    /// Write to a named input property.
    pub fn to_input(mut self, property: impl Into<String>) -> Self {
        self.target_property = property.into();
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = EdgeId(id.into());
        self
    }

    /// Whether the edge touches `node` at either end.
    pub fn touches(&self, node: &NodeId) -> bool {
        &self.source == node || &self.target == node
    }
}

impl std::fmt::Display for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{} -> {}.{}",
            self.source, self.source_property, self.target, self.target_property
        )
    }
}
