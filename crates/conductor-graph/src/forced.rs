use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tracing::trace;

use conductor_core::types::{NodeId, Value, ValueMap, DEFAULT_OUTPUT};

/// Externally injected output values plus the set of nodes waiting for a pass.
///
/// Values persist until cleared: a node with forced outputs produces them in
/// every pass it takes part in instead of being invoked. Every `set` marks
/// the node pending and wakes the driver; sets that land before the driver
/// wakes share one pass.
#[derive(Debug, Default)]
pub struct ForcedOutputTable {
    values: Mutex<BTreeMap<NodeId, ValueMap>>,
    pending: Mutex<BTreeSet<NodeId>>,
    notify: Notify,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ForcedOutputTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force an output value and schedule the node.
    pub fn set(&self, node: impl Into<NodeId>, property: impl Into<String>, value: Value) {
        let node = node.into();
        let property = property.into();
        trace!(node_id = %node, property = %property, "Forced output set");
        lock(&self.values)
            .entry(node.clone())
            .or_default()
            .insert(property, value);
        self.schedule([node]);
    }

    pub fn get(&self, node: &NodeId, property: &str) -> Option<Value> {
        lock(&self.values)
            .get(node)
            .and_then(|outputs| outputs.get(property))
            .cloned()
    }

    /// All forced outputs of one node.
    pub fn outputs_for(&self, node: &NodeId) -> Option<ValueMap> {
        lock(&self.values).get(node).cloned()
    }

    pub fn has_outputs(&self, node: &NodeId) -> bool {
        lock(&self.values).contains_key(node)
    }

    /// Remove one forced value. Does not schedule a pass.
    pub fn clear(&self, node: &NodeId, property: &str) -> Option<Value> {
        let mut values = lock(&self.values);
        let outputs = values.get_mut(node)?;
        let removed = outputs.remove(property);
        if outputs.is_empty() {
            values.remove(node);
        }
        removed
    }

    /// Remove every forced value of a node and drop it from the pending set.
    pub fn clear_node(&self, node: &NodeId) -> Option<ValueMap> {
        lock(&self.pending).remove(node);
        lock(&self.values).remove(node)
    }

    pub fn snapshot(&self) -> BTreeMap<NodeId, ValueMap> {
        lock(&self.values).clone()
    }

    /// Nodes carrying forced values.
    pub fn nodes(&self) -> BTreeSet<NodeId> {
        lock(&self.values).keys().cloned().collect()
    }

    pub fn has_pending(&self) -> bool {
        !lock(&self.pending).is_empty()
    }

    /// Mark nodes as seeds of the next pass and wake the driver.
    pub(crate) fn schedule(&self, nodes: impl IntoIterator<Item = NodeId>) {
        let added = {
            let mut pending = lock(&self.pending);
            let before = pending.len();
            pending.extend(nodes);
            pending.len() > before
        };
        if added {
            self.notify.notify_one();
        }
    }

    pub(crate) fn take_pending(&self) -> BTreeSet<NodeId> {
        std::mem::take(&mut *lock(&self.pending))
    }

    /// Resolves once something has been scheduled since the last wakeup.
    pub(crate) async fn notified(&self) {
        self.notify.notified().await
    }
}

/// Per-node handle used by `on_open` hooks to push values into the graph.
#[derive(Debug, Clone)]
pub struct Emitter {
    node_id: NodeId,
    table: Arc<ForcedOutputTable>,
}

impl Emitter {
    pub fn new(node_id: NodeId, table: Arc<ForcedOutputTable>) -> Self {
        Self { node_id, table }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn emit(&self, property: impl Into<String>, value: Value) {
        self.table.set(self.node_id.clone(), property, value);
    }

    /// Emit on the conventional `result` output.
    pub fn emit_result(&self, value: Value) {
        self.emit(DEFAULT_OUTPUT, value);
    }
}
