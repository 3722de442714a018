use std::collections::{BTreeMap, BTreeSet, VecDeque};

use conductor_core::types::NodeId;

use crate::store::GraphStore;

/// Forward and backward reachability over the current edge set.
///
/// Adjacency is captured when the resolver is built; build a new one after
/// structural mutation.
#[derive(Debug, Default)]
pub struct DependencyResolver {
    forward: BTreeMap<NodeId, BTreeSet<NodeId>>,
    backward: BTreeMap<NodeId, BTreeSet<NodeId>>,
    nodes: BTreeSet<NodeId>,
}

/// Result of a topological sort restricted to a subset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopoOrder {
    /// Nodes whose predecessors within the subset all precede them.
    pub order: Vec<NodeId>,
    /// Nodes left over because they sit on or behind a cycle.
    pub cyclic: Vec<NodeId>,
}

impl DependencyResolver {
    pub fn new(store: &GraphStore) -> Self {
        let mut resolver = Self {
            nodes: store.nodes().map(|n| n.id.clone()).collect(),
            ..Default::default()
        };
        for edge in store.edges() {
            resolver
                .forward
                .entry(edge.source.clone())
                .or_default()
                .insert(edge.target.clone());
            resolver
                .backward
                .entry(edge.target.clone())
                .or_default()
                .insert(edge.source.clone());
        }
        resolver
    }

    /// Direct successors.
    pub fn successors(&self, id: &NodeId) -> impl Iterator<Item = &NodeId> {
        self.forward.get(id).into_iter().flatten()
    }

    /// Direct predecessors.
    pub fn predecessors(&self, id: &NodeId) -> impl Iterator<Item = &NodeId> {
        self.backward.get(id).into_iter().flatten()
    }

    /// Every node reachable downstream of `id`, excluding `id` itself.
    pub fn dependents(&self, id: &NodeId) -> BTreeSet<NodeId> {
        let mut found = reach(&self.forward, std::slice::from_ref(id));
        found.remove(id);
        found
    }

    /// Every node `id` transitively reads from, excluding `id` itself.
    pub fn dependencies(&self, id: &NodeId) -> BTreeSet<NodeId> {
        let mut found = reach(&self.backward, std::slice::from_ref(id));
        found.remove(id);
        found
    }

    /// Union of the dependents of every start node.
    ///
    /// A start node appears in the result only when another start node (or a
    /// cycle) reaches it.
    pub fn dependents_of_all<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a NodeId>,
    ) -> BTreeSet<NodeId> {
        let mut all = BTreeSet::new();
        for id in ids {
            all.extend(self.dependents(id));
        }
        all
    }

    /// Kahn's algorithm over `subset`, ignoring edges that leave it.
    ///
    /// Ties are broken by id so the order is deterministic.
    pub fn topological_order(&self, subset: &BTreeSet<NodeId>) -> TopoOrder {
        let mut in_degree: BTreeMap<&NodeId, usize> = subset.iter().map(|id| (id, 0)).collect();
        for id in subset {
            for succ in self.successors(id) {
                if let Some(degree) = in_degree.get_mut(succ) {
                    *degree += 1;
                }
            }
        }

        let mut queue: BTreeSet<&NodeId> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(subset.len());

        while let Some(node) = queue.pop_first() {
            order.push(node.clone());
            for succ in self.successors(node) {
                if let Some(degree) = in_degree.get_mut(succ) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.insert(succ);
                    }
                }
            }
        }

        let placed: BTreeSet<&NodeId> = order.iter().collect();
        let cyclic = subset
            .iter()
            .filter(|id| !placed.contains(id))
            .cloned()
            .collect();
        TopoOrder { order, cyclic }
    }

    /// Order over the whole graph.
    pub fn full_order(&self) -> TopoOrder {
        self.topological_order(&self.nodes)
    }

    /// Whether `id` can reach itself.
    pub fn on_cycle(&self, id: &NodeId) -> bool {
        self.successors(id)
            .any(|succ| succ == id || self.dependents(succ).contains(id))
    }
}

fn reach(adjacency: &BTreeMap<NodeId, BTreeSet<NodeId>>, start: &[NodeId]) -> BTreeSet<NodeId> {
    let mut visited = BTreeSet::new();
    let mut queue: VecDeque<&NodeId> = VecDeque::new();
    for id in start {
        for next in adjacency.get(id).into_iter().flatten() {
            queue.push_back(next);
        }
    }
    while let Some(node) = queue.pop_front() {
        if visited.insert(node.clone()) {
            for next in adjacency.get(node).into_iter().flatten() {
                queue.push_back(next);
            }
        }
    }
    visited
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use conductor_core::shape::{Shape, ValueKind};
    use conductor_core::types::{Value, DEFAULT_OUTPUT};

    use crate::descriptor::NodeDescriptor;
    use crate::edge::Edge;
    use crate::instance::NodeInstance;

    fn store(ids: &[&str], edges: &[(&str, &str)]) -> GraphStore {
        let desc = Arc::new(
            NodeDescriptor::new("relay")
                .with_input(Shape::empty().with("input", ValueKind::array(ValueKind::Any)))
                .with_output(Shape::empty().with(DEFAULT_OUTPUT, ValueKind::Any)),
        );
        let mut store = GraphStore::new();
        for id in ids {
            store
                .add_node(NodeInstance::new(*id, desc.clone(), Value::Null))
                .unwrap();
        }
        for (from, to) in edges {
            store.add_edge(Edge::new(*from, *to)).unwrap();
        }
        store
    }

    fn ids(names: &[&str]) -> BTreeSet<NodeId> {
        names.iter().map(|n| NodeId::from(*n)).collect()
    }

    #[test]
    fn test_dependents_exclude_start() {
        let store = store(&["a", "b", "c", "d"], &[("a", "b"), ("b", "c"), ("a", "d")]);
        let resolver = DependencyResolver::new(&store);
        assert_eq!(resolver.dependents(&"a".into()), ids(&["b", "c", "d"]));
        assert_eq!(resolver.dependents(&"c".into()), ids(&[]));
        assert_eq!(resolver.dependencies(&"c".into()), ids(&["a", "b"]));
    }

    #[test]
    fn test_dependents_terminate_on_cycle() {
        let store = store(&["a", "b", "c"], &[("a", "b"), ("b", "c"), ("c", "a")]);
        let resolver = DependencyResolver::new(&store);
        assert_eq!(resolver.dependents(&"a".into()), ids(&["b", "c"]));
        assert!(resolver.on_cycle(&"b".into()));
    }

    #[test]
    fn test_dependents_of_all() {
        let store = store(&["a", "b", "c", "x"], &[("a", "b"), ("b", "c"), ("x", "c")]);
        let resolver = DependencyResolver::new(&store);
        let seeds = ids(&["a", "x"]);
        assert_eq!(resolver.dependents_of_all(&seeds), ids(&["b", "c"]));
    }

    #[test]
    fn test_topological_order_subset() {
        let store = store(
            &["a", "b", "c", "d"],
            &[("a", "c"), ("b", "c"), ("c", "d")],
        );
        let resolver = DependencyResolver::new(&store);
        let topo = resolver.topological_order(&ids(&["b", "c", "d"]));
        assert_eq!(
            topo.order,
            vec![NodeId::from("b"), NodeId::from("c"), NodeId::from("d")]
        );
        assert!(topo.cyclic.is_empty());
    }

    #[test]
    fn test_topological_order_reports_cycle() {
        let store = store(
            &["a", "b", "c", "d"],
            &[("a", "b"), ("b", "c"), ("c", "b"), ("c", "d")],
        );
        let resolver = DependencyResolver::new(&store);
        let topo = resolver.full_order();
        assert_eq!(topo.order, vec![NodeId::from("a")]);
        assert_eq!(topo.cyclic, vec![NodeId::from("b"), NodeId::from("c"), NodeId::from("d")]);
        assert!(!resolver.on_cycle(&"d".into()));
    }
}
