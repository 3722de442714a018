use std::sync::Arc;

use serde::{Deserialize, Serialize};

use conductor_core::types::{NodeId, NodeStatus, Value, ValueMap};

use crate::descriptor::NodeDescriptor;

/// A live node in a graph.
#[derive(Debug, Clone)]
pub struct NodeInstance {
    pub id: NodeId,
    pub descriptor: Arc<NodeDescriptor>,
    /// Per-instance configuration, e.g. a constant's value.
    pub data: Value,
    /// Values carried in by edges. Only the executor and edge removal write here.
    pub inputs: ValueMap,
    /// Last produced outputs.
    pub outputs: ValueMap,
    pub status: NodeStatus,
}

impl NodeInstance {
    pub fn new(id: impl Into<NodeId>, descriptor: Arc<NodeDescriptor>, data: Value) -> Self {
        Self {
            id: id.into(),
            descriptor,
            data,
            inputs: ValueMap::new(),
            outputs: ValueMap::new(),
            status: NodeStatus::NotExecuted,
        }
    }

    pub fn kind(&self) -> &str {
        &self.descriptor.kind
    }

    /// Every required input property holds a value.
    pub fn is_ready(&self) -> bool {
        self.descriptor.input.is_satisfied_by(&self.inputs)
    }

    pub fn state(&self) -> NodeState {
        NodeState {
            id: self.id.clone(),
            kind: self.kind().to_string(),
            data: self.data.clone(),
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
            status: self.status.clone(),
            ready: self.is_ready(),
        }
    }
}

/// Serializable view of a node's runtime state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
    pub inputs: ValueMap,
    pub outputs: ValueMap,
    pub status: NodeStatus,
    pub ready: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::shape::{Shape, ValueKind};
    use serde_json::json;

    fn gate() -> Arc<NodeDescriptor> {
        Arc::new(
            NodeDescriptor::new("and").with_input(
                Shape::empty()
                    .with("a", ValueKind::Any)
                    .with("b", ValueKind::Any),
            ),
        )
    }

    #[test]
    fn test_readiness_is_monotonic_in_inputs() {
        let mut node = NodeInstance::new("c", gate(), Value::Null);
        assert!(!node.is_ready());
        node.inputs.insert("a".into(), json!(true));
        assert!(!node.is_ready());
        node.inputs.insert("b".into(), json!(false));
        assert!(node.is_ready());
        node.inputs.insert("b".into(), json!(true));
        assert!(node.is_ready());
    }

    #[test]
    fn test_state_serialization() {
        let node = NodeInstance::new("c", gate(), json!({"label": "gate"}));
        let state = serde_json::to_value(node.state()).unwrap();
        assert_eq!(state["type"], "and");
        assert_eq!(state["status"]["type"], "not_executed");
        assert_eq!(state["ready"], false);
        assert_eq!(state["data"]["label"], "gate");
    }
}
