use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Values flowing across edges are plain JSON.
pub type Value = serde_json::Value;

/// Property name → value map used for node inputs and outputs.
pub type ValueMap = BTreeMap<String, Value>;

/// Conventional input property used when an edge names none.
pub const DEFAULT_INPUT: &str = "input";

/// Conventional output property used when an edge names none.
pub const DEFAULT_OUTPUT: &str = "result";

/// Identifier of a node, unique within its graph.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier of an edge, unique within its graph.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(pub String);

impl EdgeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_str(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EdgeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EdgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Runtime status of a node instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeStatus {
    /// Never invoked since it was added.
    #[default]
    NotExecuted,
    /// Skipped in the last pass because required inputs were missing.
    Pending,
    /// Produced output in the last pass it took part in.
    Executed,
    /// Last invocation failed.
    Failed { error: String },
}

/// A node-local failure recorded during a pass or while opening.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeFailure {
    pub node_id: NodeId,
    pub kind: String,
    pub error: String,
}

/// Events emitted by a running graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GraphEvent {
    /// Graph opened; carries nodes whose open hook failed.
    Opened { failures: Vec<NodeFailure> },
    /// Graph closed and every resource disposed.
    Closed,
    /// A pass completed.
    Update {
        pass: u64,
        invoked: usize,
        failed: usize,
        at: DateTime<Utc>,
    },
    /// An output property changed value.
    Output {
        node_id: NodeId,
        property: String,
        value: Value,
    },
    /// An input property changed value through edge propagation.
    Input {
        node_id: NodeId,
        property: String,
        value: Value,
    },
    /// A node invocation failed.
    NodeFailed(NodeFailure),
}

/// Lenient falsiness: string "false"/"0", `false`, `null`, and empty arrays.
pub fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => matches!(s.as_str(), "false" | "FALSE" | "0"),
        Value::Array(items) => items.is_empty(),
        Value::Number(_) | Value::Object(_) => false,
    }
}

pub fn is_truthy(value: &Value) -> bool {
    !is_falsy(value)
}
