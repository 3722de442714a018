use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use conductor_core::error::{ConductorError, Result};
use conductor_core::types::{EdgeId, NodeId, Value, ValueMap};

use crate::edge::Edge;
use crate::instance::NodeInstance;

/// Node and edge maps with synchronous structural mutation.
///
/// Edges keep insertion order; array-kinded inputs fed by several edges are
/// assembled in that order. Values carried by each edge are kept so an input
/// can be rebuilt when one of its edges goes away.
#[derive(Debug, Default)]
pub struct GraphStore {
    nodes: BTreeMap<NodeId, NodeInstance>,
    edges: Vec<Edge>,
    carried: HashMap<EdgeId, Value>,
}

/// An input property that took a new value.
#[derive(Debug, Clone, PartialEq)]
pub struct InputChange {
    pub node_id: NodeId,
    pub property: String,
    /// `None` when the input lost its value.
    pub value: Option<Value>,
}

/// Effects of storing a node's produced outputs.
#[derive(Debug, Default)]
pub struct Propagation {
    /// Output properties whose value differs from the previous output.
    pub outputs: Vec<(String, Value)>,
    pub inputs: Vec<InputChange>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn add_node(&mut self, node: NodeInstance) -> Result<()> {
        if self.nodes.contains_key(&node.id) {
            return Err(ConductorError::DuplicateId {
                kind: "node",
                id: node.id.to_string(),
            });
        }
        debug!(node_id = %node.id, kind = %node.kind(), "Node added");
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Remove a node and every edge touching it. Missing ids are a no-op.
    pub fn remove_node(&mut self, id: &NodeId) -> Option<NodeInstance> {
        if !self.nodes.contains_key(id) {
            return None;
        }
        let touching: Vec<EdgeId> = self
            .edges
            .iter()
            .filter(|e| e.touches(id))
            .map(|e| e.id.clone())
            .collect();
        for edge_id in &touching {
            self.remove_edge(edge_id);
        }
        debug!(node_id = %id, edges = touching.len(), "Node removed");
        self.nodes.remove(id)
    }

    /// Validate and insert an edge. The graph is unchanged on error.
    pub fn add_edge(&mut self, edge: Edge) -> Result<()> {
        if self.edges.iter().any(|e| e.id == edge.id) {
            return Err(ConductorError::DuplicateId {
                kind: "edge",
                id: edge.id.to_string(),
            });
        }
        let source = self
            .nodes
            .get(&edge.source)
            .ok_or_else(|| ConductorError::NodeNotFound(edge.source.to_string()))?;
        let target = self
            .nodes
            .get(&edge.target)
            .ok_or_else(|| ConductorError::NodeNotFound(edge.target.to_string()))?;

        if !source.descriptor.output.has_property(&edge.source_property) {
            return Err(ConductorError::UnknownProperty {
                node: edge.source.to_string(),
                property: edge.source_property.clone(),
                direction: "output",
            });
        }
        let Some(kind) = target.descriptor.input.kind_of(&edge.target_property) else {
            return Err(ConductorError::UnknownProperty {
                node: edge.target.to_string(),
                property: edge.target_property.clone(),
                direction: "input",
            });
        };
        if !kind.is_array()
            && self
                .edges
                .iter()
                .any(|e| e.target == edge.target && e.target_property == edge.target_property)
        {
            return Err(ConductorError::InputAlreadyBound {
                node: edge.target.to_string(),
                property: edge.target_property.clone(),
            });
        }

        debug!(edge_id = %edge.id, edge = %edge, "Edge added");
        self.edges.push(edge);
        Ok(())
    }

    /// Remove an edge; the value it carried disappears from the target input.
    pub fn remove_edge(&mut self, id: &EdgeId) -> Option<Edge> {
        let pos = self.edges.iter().position(|e| &e.id == id)?;
        let edge = self.edges.remove(pos);
        if self.carried.remove(id).is_some() {
            self.assemble_input(&edge.target, &edge.target_property);
        }
        debug!(edge_id = %id, "Edge removed");
        Some(edge)
    }

    pub fn get_node(&self, id: &NodeId) -> Option<&NodeInstance> {
        self.nodes.get(id)
    }

    pub(crate) fn get_node_mut(&mut self, id: &NodeId) -> Option<&mut NodeInstance> {
        self.nodes.get_mut(id)
    }

    pub fn contains_node(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn get_edge(&self, id: &EdgeId) -> Option<&Edge> {
        self.edges.iter().find(|e| &e.id == id)
    }

    /// Nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeInstance> {
        self.nodes.values()
    }

    /// Edges in insertion order.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn filter_nodes<F>(&self, predicate: F) -> Vec<&NodeInstance>
    where
        F: Fn(&NodeInstance) -> bool,
    {
        self.nodes.values().filter(|n| predicate(n)).collect()
    }

    pub fn incoming(&self, id: &NodeId) -> Vec<&Edge> {
        self.edges.iter().filter(|e| &e.target == id).collect()
    }

    pub fn outgoing(&self, id: &NodeId) -> Vec<&Edge> {
        self.edges.iter().filter(|e| &e.source == id).collect()
    }

    /// Carry the source's last output across a newly added edge.
    ///
    /// Returns the resulting input change, if any.
    pub(crate) fn prime_edge(&mut self, id: &EdgeId) -> Option<InputChange> {
        let edge = self.get_edge(id)?.clone();
        let value = self
            .nodes
            .get(&edge.source)?
            .outputs
            .get(&edge.source_property)?
            .clone();
        self.carry(&edge, value)
    }

    /// Store produced outputs on a node and carry them across its outgoing
    /// edges. Properties absent from `outputs` are not propagated.
    pub(crate) fn propagate(&mut self, id: &NodeId, outputs: ValueMap) -> Propagation {
        let mut propagation = Propagation::default();
        let Some(node) = self.nodes.get_mut(id) else {
            return propagation;
        };
        for (property, value) in &outputs {
            if node.outputs.get(property) != Some(value) {
                propagation.outputs.push((property.clone(), value.clone()));
            }
        }
        node.outputs = outputs.clone();

        let outgoing: Vec<Edge> = self
            .edges
            .iter()
            .filter(|e| &e.source == id)
            .cloned()
            .collect();
        for edge in outgoing {
            if let Some(value) = outputs.get(&edge.source_property) {
                if let Some(change) = self.carry(&edge, value.clone()) {
                    propagation.inputs.push(change);
                }
            }
        }
        propagation
    }

    fn carry(&mut self, edge: &Edge, value: Value) -> Option<InputChange> {
        self.carried.insert(edge.id.clone(), value);
        self.assemble_input(&edge.target, &edge.target_property)
    }

    /// Rebuild one input property from the values carried by its edges.
    fn assemble_input(&mut self, target: &NodeId, property: &str) -> Option<InputChange> {
        let node = self.nodes.get(target)?;
        let is_array = node
            .descriptor
            .input
            .kind_of(property)
            .is_some_and(|k| k.is_array());

        let carried: Vec<&Value> = self
            .edges
            .iter()
            .filter(|e| &e.target == target && e.target_property == property)
            .filter_map(|e| self.carried.get(&e.id))
            .collect();

        let value = if carried.is_empty() {
            None
        } else if is_array {
            let mut items = Vec::new();
            for value in carried {
                match value {
                    Value::Array(values) => items.extend(values.iter().cloned()),
                    other => items.push(other.clone()),
                }
            }
            Some(Value::Array(items))
        } else {
            carried.last().map(|v| (*v).clone())
        };

        let node = self.nodes.get_mut(target)?;
        if node.inputs.get(property) == value.as_ref() {
            return None;
        }
        match &value {
            Some(v) => {
                node.inputs.insert(property.to_string(), v.clone());
            }
            None => {
                node.inputs.remove(property);
            }
        }
        Some(InputChange {
            node_id: target.clone(),
            property: property.to_string(),
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use conductor_core::shape::{Shape, ValueKind};
    use conductor_core::types::DEFAULT_OUTPUT;
    use serde_json::json;

    use crate::descriptor::NodeDescriptor;

    fn source() -> Arc<NodeDescriptor> {
        Arc::new(
            NodeDescriptor::new("source")
                .with_output(Shape::empty().with(DEFAULT_OUTPUT, ValueKind::Any)),
        )
    }

    fn relay() -> Arc<NodeDescriptor> {
        Arc::new(
            NodeDescriptor::new("relay")
                .with_input(Shape::empty().with("input", ValueKind::Any))
                .with_output(Shape::empty().with(DEFAULT_OUTPUT, ValueKind::Any)),
        )
    }

    fn collector() -> Arc<NodeDescriptor> {
        Arc::new(
            NodeDescriptor::new("collector")
                .with_input(Shape::empty().with("items", ValueKind::array(ValueKind::Any))),
        )
    }

    fn node(id: &str, desc: Arc<NodeDescriptor>) -> NodeInstance {
        NodeInstance::new(id, desc, Value::Null)
    }

    fn chain() -> GraphStore {
        let mut store = GraphStore::new();
        store.add_node(node("a", source())).unwrap();
        store.add_node(node("b", relay())).unwrap();
        store.add_node(node("c", relay())).unwrap();
        store.add_edge(Edge::new("a", "b").with_id("ab")).unwrap();
        store.add_edge(Edge::new("b", "c").with_id("bc")).unwrap();
        store
    }

    fn outputs(value: Value) -> ValueMap {
        let mut map = ValueMap::new();
        map.insert(DEFAULT_OUTPUT.into(), value);
        map
    }

    #[test]
    fn test_duplicate_node_id() {
        let mut store = chain();
        let err = store.add_node(node("a", source())).unwrap_err();
        assert!(matches!(err, ConductorError::DuplicateId { kind: "node", .. }));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_duplicate_edge_id() {
        let mut store = chain();
        store.add_node(node("d", relay())).unwrap();
        let err = store.add_edge(Edge::new("a", "d").with_id("ab")).unwrap_err();
        assert!(matches!(err, ConductorError::DuplicateId { kind: "edge", .. }));
    }

    #[test]
    fn test_edge_validation_leaves_graph_unchanged() {
        let mut store = chain();
        let before = store.edges().len();

        let err = store.add_edge(Edge::new("a", "missing")).unwrap_err();
        assert!(matches!(err, ConductorError::NodeNotFound(id) if id == "missing"));

        let err = store
            .add_edge(Edge::new("a", "c").from_output("nope"))
            .unwrap_err();
        assert!(matches!(
            err,
            ConductorError::UnknownProperty { direction: "output", .. }
        ));

        let err = store.add_edge(Edge::new("a", "c").to_input("nope")).unwrap_err();
        assert!(matches!(
            err,
            ConductorError::UnknownProperty { direction: "input", .. }
        ));

        // c.input is scalar and already bound by b -> c.
        let err = store.add_edge(Edge::new("a", "c")).unwrap_err();
        assert!(matches!(err, ConductorError::InputAlreadyBound { .. }));

        assert_eq!(store.edges().len(), before);
    }

    #[test]
    fn test_propagation_along_chain() {
        let mut store = chain();
        let prop = store.propagate(&NodeId::from("a"), outputs(json!(5)));
        assert_eq!(prop.outputs, vec![(DEFAULT_OUTPUT.to_string(), json!(5))]);
        assert_eq!(prop.inputs.len(), 1);
        assert_eq!(prop.inputs[0].node_id, NodeId::from("b"));
        assert_eq!(store.get_node(&"b".into()).unwrap().inputs["input"], json!(5));

        // Same value again changes nothing.
        let prop = store.propagate(&NodeId::from("a"), outputs(json!(5)));
        assert!(prop.outputs.is_empty());
        assert!(prop.inputs.is_empty());
    }

    #[test]
    fn test_remove_node_cascades_edges() {
        let mut store = chain();
        store.propagate(&NodeId::from("a"), outputs(json!(1)));
        store.propagate(&NodeId::from("b"), outputs(json!(1)));

        let removed = store.remove_node(&NodeId::from("b")).unwrap();
        assert_eq!(removed.id, NodeId::from("b"));
        assert!(store.edges().is_empty());
        // The value b carried into c disappears with the edge.
        assert!(store.get_node(&"c".into()).unwrap().inputs.is_empty());

        // Idempotent.
        assert!(store.remove_node(&NodeId::from("b")).is_none());
    }

    #[test]
    fn test_remove_edge_clears_input() {
        let mut store = chain();
        store.propagate(&NodeId::from("a"), outputs(json!("x")));
        assert!(store.get_node(&"b".into()).unwrap().is_ready());

        let edge = store.remove_edge(&EdgeId::from_str("ab")).unwrap();
        assert_eq!(edge.source, NodeId::from("a"));
        assert!(!store.get_node(&"b".into()).unwrap().is_ready());
        assert!(store.remove_edge(&EdgeId::from_str("ab")).is_none());
    }

    #[test]
    fn test_readded_node_has_empty_inputs() {
        let mut store = chain();
        store.propagate(&NodeId::from("a"), outputs(json!(1)));
        store.remove_node(&NodeId::from("b"));
        store.add_node(node("b", relay())).unwrap();
        assert!(store.get_node(&"b".into()).unwrap().inputs.is_empty());
    }

    #[test]
    fn test_array_input_concatenates_in_edge_order() {
        let mut store = GraphStore::new();
        store.add_node(node("x", source())).unwrap();
        store.add_node(node("y", source())).unwrap();
        store.add_node(node("sink", collector())).unwrap();
        store
            .add_edge(Edge::new("x", "sink").to_input("items").with_id("e1"))
            .unwrap();
        store
            .add_edge(Edge::new("y", "sink").to_input("items").with_id("e2"))
            .unwrap();

        store.propagate(&NodeId::from("y"), outputs(json!([2, 3])));
        store.propagate(&NodeId::from("x"), outputs(json!(1)));
        let sink = store.get_node(&"sink".into()).unwrap();
        assert_eq!(sink.inputs["items"], json!([1, 2, 3]));

        store.remove_edge(&EdgeId::from_str("e1"));
        let sink = store.get_node(&"sink".into()).unwrap();
        assert_eq!(sink.inputs["items"], json!([2, 3]));
    }

    #[test]
    fn test_prime_edge_uses_last_output() {
        let mut store = GraphStore::new();
        store.add_node(node("a", source())).unwrap();
        store.add_node(node("b", relay())).unwrap();
        store.propagate(&NodeId::from("a"), outputs(json!(true)));

        store.add_edge(Edge::new("a", "b").with_id("ab")).unwrap();
        let change = store.prime_edge(&EdgeId::from_str("ab")).unwrap();
        assert_eq!(change.node_id, NodeId::from("b"));
        assert_eq!(change.value, Some(json!(true)));
    }

    #[test]
    fn test_filter_and_adjacency() {
        let store = chain();
        let relays = store.filter_nodes(|n| n.kind() == "relay");
        assert_eq!(relays.len(), 2);
        assert_eq!(store.incoming(&"b".into()).len(), 1);
        assert_eq!(store.outgoing(&"b".into()).len(), 1);
        assert!(store.outgoing(&"c".into()).is_empty());
    }
}
