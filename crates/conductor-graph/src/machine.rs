use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use conductor_core::config::EngineConfig;
use conductor_core::error::{ConductorError, Result};
use conductor_core::event::EventBus;
use conductor_core::types::{EdgeId, GraphEvent, NodeFailure, NodeId, Value, ValueMap};
use conductor_core::ServiceContainer;

use crate::descriptor::{Disposer, OpenContext};
use crate::diagnostics::{self, Diagnostic, RuntimeDiagnostics};
use crate::edge::Edge;
use crate::executor::{Executor, PassContext, PassReport};
use crate::forced::{Emitter, ForcedOutputTable};
use crate::instance::{NodeInstance, NodeState};
use crate::record::{GraphRecord, NodeRecord};
use crate::registry::Registry;
use crate::store::GraphStore;

/// Owns a graph and drives it through its open/closed lifecycle.
///
/// Structural mutation is synchronous. While open, a background driver runs a
/// pass whenever the forced-output table schedules seeds; `compute` and
/// `flush` run passes explicitly and share the driver's pass lock.
#[derive(Clone)]
pub struct StateMachine {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Arc<Registry>,
    store: Mutex<GraphStore>,
    forced: Arc<ForcedOutputTable>,
    executor: Executor,
    events: EventBus,
    config: EngineConfig,
    pass_lock: tokio::sync::Mutex<()>,
    lifecycle: Mutex<Lifecycle>,
    diagnostics: Mutex<RuntimeDiagnostics>,
    passes: AtomicU64,
}

enum Lifecycle {
    Closed,
    Open(OpenState),
}

struct OpenState {
    cancel: CancellationToken,
    services: ServiceContainer,
    /// Per-node resources in registration order.
    resources: Vec<(NodeId, NodeResources)>,
    driver: Option<JoinHandle<()>>,
}

struct NodeResources {
    cancel: CancellationToken,
    disposers: Vec<Disposer>,
}

impl NodeResources {
    fn dispose(self) {
        self.cancel.cancel();
        for disposer in self.disposers.into_iter().rev() {
            disposer();
        }
    }
}

/// Serializable runtime state of a whole graph.
#[derive(Debug, Clone, Serialize)]
pub struct GraphSnapshot {
    pub open: bool,
    pub nodes: Vec<NodeState>,
    pub edges: Vec<Edge>,
    pub forced: std::collections::BTreeMap<NodeId, ValueMap>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl StateMachine {
    pub fn new(registry: Arc<Registry>, config: EngineConfig) -> Self {
        Self::with_store(registry, GraphStore::new(), config)
    }

    pub fn with_store(registry: Arc<Registry>, store: GraphStore, config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                store: Mutex::new(store),
                forced: Arc::new(ForcedOutputTable::new()),
                executor: Executor::from_config(&config),
                events: EventBus::new(config.event_capacity),
                config,
                pass_lock: tokio::sync::Mutex::new(()),
                lifecycle: Mutex::new(Lifecycle::Closed),
                diagnostics: Mutex::new(RuntimeDiagnostics::default()),
                passes: AtomicU64::new(0),
            }),
        }
    }

    /// Build a closed machine from a serialized graph.
    pub fn from_record(
        registry: Arc<Registry>,
        record: &GraphRecord,
        config: EngineConfig,
    ) -> Result<Self> {
        let store = record.build(&registry)?;
        Ok(Self::with_store(registry, store, config))
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    // ── Structure ───────────────────────────────────────────────

    /// Add a node; while open its `on_open` hook runs immediately.
    pub fn add_node(&self, node: NodeInstance) -> Result<()> {
        let id = node.id.clone();
        let auto = node.descriptor.auto_trigger;
        lock(&self.inner.store).add_node(node)?;

        if self.is_open() {
            if let Some(failure) = self.open_node(&id) {
                self.inner.events.publish(GraphEvent::NodeFailed(failure.clone()));
                lock(&self.inner.diagnostics).open_failures.push(failure);
            }
        }
        if auto || self.inner.forced.has_outputs(&id) {
            self.inner.forced.schedule([id]);
        }
        Ok(())
    }

    /// Materialize a `{id, type, data}` record through the registry and add it.
    pub fn create_node(&self, record: &NodeRecord) -> Result<NodeId> {
        let node = self.inner.registry.materialize(record)?;
        let id = node.id.clone();
        self.add_node(node)?;
        Ok(id)
    }

    /// Remove a node, its edges, its forced outputs and its open resources.
    pub fn remove_node(&self, id: &NodeId) -> Option<NodeInstance> {
        let removed = lock(&self.inner.store).remove_node(id)?;
        self.inner.forced.clear_node(id);
        lock(&self.inner.diagnostics).forget(id);

        let resources = match &mut *lock(&self.inner.lifecycle) {
            Lifecycle::Open(state) => state
                .resources
                .iter()
                .position(|(node, _)| node == id)
                .map(|pos| state.resources.remove(pos).1),
            Lifecycle::Closed => None,
        };
        if let Some(resources) = resources {
            debug!(node_id = %id, "Disposing node resources");
            resources.dispose();
        }
        Some(removed)
    }

    /// Add an edge; the target is scheduled when the source already has a value.
    pub fn add_edge(&self, edge: Edge) -> Result<EdgeId> {
        let id = edge.id.clone();
        let change = {
            let mut store = lock(&self.inner.store);
            store.add_edge(edge)?;
            store.prime_edge(&id)
        };
        if let Some(change) = change {
            if let Some(value) = change.value {
                self.inner.events.publish(GraphEvent::Input {
                    node_id: change.node_id.clone(),
                    property: change.property,
                    value,
                });
            }
            self.inner.forced.schedule([change.node_id]);
        }
        Ok(id)
    }

    pub fn remove_edge(&self, id: &EdgeId) -> Option<Edge> {
        lock(&self.inner.store).remove_edge(id)
    }

    pub fn node(&self, id: &NodeId) -> Option<NodeState> {
        lock(&self.inner.store).get_node(id).map(|n| n.state())
    }

    pub fn edges(&self) -> Vec<Edge> {
        lock(&self.inner.store).edges().to_vec()
    }

    /// Current structure as a serializable record.
    pub fn record(&self) -> GraphRecord {
        GraphRecord::from_store(&lock(&self.inner.store))
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        let (nodes, edges) = {
            let store = lock(&self.inner.store);
            (
                store.nodes().map(|n| n.state()).collect(),
                store.edges().to_vec(),
            )
        };
        GraphSnapshot {
            open: self.is_open(),
            nodes,
            edges,
            forced: self.inner.forced.snapshot(),
        }
    }

    // ── Forced outputs ──────────────────────────────────────────

    /// Force an output value; the driver runs a pass from this node.
    pub fn set_output(
        &self,
        node: impl Into<NodeId>,
        property: impl Into<String>,
        value: Value,
    ) -> Result<()> {
        let node = node.into();
        let property = property.into();
        {
            let store = lock(&self.inner.store);
            let instance = store
                .get_node(&node)
                .ok_or_else(|| ConductorError::NodeNotFound(node.to_string()))?;
            match instance.descriptor.output.kind_of(&property) {
                None => {
                    return Err(ConductorError::UnknownProperty {
                        node: node.to_string(),
                        property,
                        direction: "output",
                    })
                }
                Some(kind) if !kind.accepts(&value) => {
                    return Err(ConductorError::InvalidValue {
                        node: node.to_string(),
                        property,
                        message: format!("expected {}, got {}", kind.describe(), value),
                    })
                }
                Some(_) => {}
            }
        }
        debug!(node_id = %node, property = %property, "Output forced");
        self.inner.forced.set(node, property, value);
        Ok(())
    }

    pub fn forced_output(&self, node: &NodeId, property: &str) -> Option<Value> {
        self.inner.forced.get(node, property)
    }

    /// Stop forcing an output. The node goes back to its invoke function the
    /// next time it takes part in a pass.
    pub fn clear_output(&self, node: &NodeId, property: &str) -> Option<Value> {
        self.inner.forced.clear(node, property)
    }

    pub fn forced(&self) -> Arc<ForcedOutputTable> {
        self.inner.forced.clone()
    }

    // ── Lifecycle ───────────────────────────────────────────────

    pub fn is_open(&self) -> bool {
        matches!(*lock(&self.inner.lifecycle), Lifecycle::Open(_))
    }

    /// Open the graph: run `on_open` hooks, run the initial pass, start the
    /// driver. Hook failures are returned, not raised. Opening an open graph
    /// is a no-op.
    pub async fn open(&self, services: ServiceContainer) -> Result<Vec<NodeFailure>> {
        let cancel = {
            let mut lifecycle = lock(&self.inner.lifecycle);
            if matches!(*lifecycle, Lifecycle::Open(_)) {
                return Ok(vec![]);
            }
            let cancel = CancellationToken::new();
            *lifecycle = Lifecycle::Open(OpenState {
                cancel: cancel.clone(),
                services,
                resources: vec![],
                driver: None,
            });
            cancel
        };

        let ids: Vec<NodeId> = lock(&self.inner.store)
            .nodes()
            .map(|n| n.id.clone())
            .collect();
        let failures: Vec<NodeFailure> = ids.iter().filter_map(|id| self.open_node(id)).collect();
        for failure in &failures {
            warn!(node_id = %failure.node_id, error = %failure.error, "Node failed to open");
        }
        lock(&self.inner.diagnostics).open_failures = failures.clone();

        let seeds: BTreeSet<NodeId> = {
            let store = lock(&self.inner.store);
            store
                .filter_nodes(|n| n.descriptor.auto_trigger)
                .into_iter()
                .map(|n| n.id.clone())
                .chain(self.inner.forced.nodes())
                .collect()
        };
        info!(
            nodes = ids.len(),
            seeds = seeds.len(),
            open_failures = failures.len(),
            "Graph opened"
        );
        self.inner.events.publish(GraphEvent::Opened {
            failures: failures.clone(),
        });

        {
            let _pass = self.inner.pass_lock.lock().await;
            let mut seeds = seeds;
            seeds.extend(self.inner.forced.take_pending());
            if let Err(e) = self.run_pass(seeds).await {
                warn!(error = %e, "Initial pass failed");
            }
        }

        let driver = tokio::spawn(drive(
            Arc::downgrade(&self.inner),
            self.inner.forced.clone(),
            cancel,
            Duration::from_millis(self.inner.config.debounce_ms),
        ));
        match &mut *lock(&self.inner.lifecycle) {
            Lifecycle::Open(state) => state.driver = Some(driver),
            Lifecycle::Closed => driver.abort(),
        }
        Ok(failures)
    }

    /// Close the graph: cancel in-flight work, stop the driver, dispose node
    /// resources in reverse registration order. Idempotent.
    pub fn close(&self) {
        let state = match std::mem::replace(&mut *lock(&self.inner.lifecycle), Lifecycle::Closed) {
            Lifecycle::Open(state) => state,
            Lifecycle::Closed => return,
        };
        shutdown(state);
        info!("Graph closed");
        self.inner.events.publish(GraphEvent::Closed);
    }

    /// Run `on_open` for one node, recording its resources.
    fn open_node(&self, id: &NodeId) -> Option<NodeFailure> {
        let (descriptor, data) = {
            let store = lock(&self.inner.store);
            let node = store.get_node(id)?;
            (node.descriptor.clone(), node.data.clone())
        };
        let hook = descriptor.on_open.clone()?;
        let (cancel, services) = match &*lock(&self.inner.lifecycle) {
            Lifecycle::Open(state) => (state.cancel.child_token(), state.services.clone()),
            Lifecycle::Closed => return None,
        };

        let emitter = Emitter::new(id.clone(), self.inner.forced.clone());
        let mut ctx = OpenContext::new(id.clone(), data, services, cancel.clone(), emitter);
        let outcome = hook(&mut ctx);
        let resources = NodeResources {
            cancel,
            disposers: ctx.into_disposers(),
        };

        match outcome {
            Ok(()) => {
                debug!(node_id = %id, kind = %descriptor.kind, "Node opened");
                let rejected = match &mut *lock(&self.inner.lifecycle) {
                    Lifecycle::Open(state) => {
                        state.resources.push((id.clone(), resources));
                        None
                    }
                    Lifecycle::Closed => Some(resources),
                };
                if let Some(resources) = rejected {
                    resources.dispose();
                }
                None
            }
            Err(e) => {
                resources.dispose();
                Some(NodeFailure {
                    node_id: id.clone(),
                    kind: descriptor.kind.clone(),
                    error: e.to_string(),
                })
            }
        }
    }

    // ── Passes ──────────────────────────────────────────────────

    /// Run a pass from explicit seeds.
    pub async fn compute(&self, seeds: impl IntoIterator<Item = NodeId>) -> Result<PassReport> {
        let _pass = self.inner.pass_lock.lock().await;
        self.run_pass(seeds.into_iter().collect()).await
    }

    /// Run a pass over everything scheduled so far. Returns an empty report
    /// when nothing is pending.
    pub async fn flush(&self) -> Result<PassReport> {
        let _pass = self.inner.pass_lock.lock().await;
        let seeds = self.inner.forced.take_pending();
        if seeds.is_empty() {
            return Ok(PassReport::default());
        }
        self.run_pass(seeds).await
    }

    /// Caller holds the pass lock.
    async fn run_pass(&self, seeds: BTreeSet<NodeId>) -> Result<PassReport> {
        let (services, cancel) = match &*lock(&self.inner.lifecycle) {
            Lifecycle::Open(state) => (state.services.clone(), state.cancel.clone()),
            Lifecycle::Closed => return Err(ConductorError::Closed),
        };
        let ctx = PassContext {
            store: &self.inner.store,
            forced: &self.inner.forced,
            services: &services,
            cancel: &cancel,
            events: &self.inner.events,
        };
        let result = self.inner.executor.compute(&ctx, seeds).await;

        match &result {
            Ok(report) if report.aborted => {
                debug!("Pass aborted by close");
            }
            Ok(report) => {
                let pass = self.inner.passes.fetch_add(1, Ordering::SeqCst) + 1;
                lock(&self.inner.diagnostics).record_pass(report);
                self.inner.events.publish(GraphEvent::Update {
                    pass,
                    invoked: report.invoked.len() + report.forced.len(),
                    failed: report.failures.len(),
                    at: Utc::now(),
                });
            }
            Err(e) => {
                self.inner.passes.fetch_add(1, Ordering::SeqCst);
                lock(&self.inner.diagnostics).record_error(e.to_string());
            }
        }
        result
    }

    // ── Observation ─────────────────────────────────────────────

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<GraphEvent> {
        self.inner.events.subscribe()
    }

    pub fn diagnostics(&self) -> RuntimeDiagnostics {
        lock(&self.inner.diagnostics).clone()
    }

    /// Static structure checks followed by runtime failures.
    pub fn check(&self) -> Vec<Diagnostic> {
        let mut found = diagnostics::check(&lock(&self.inner.store));
        found.extend(self.diagnostics().to_diagnostics());
        found
    }

    pub fn passes(&self) -> u64 {
        self.inner.passes.load(Ordering::SeqCst)
    }
}

fn shutdown(state: OpenState) {
    state.cancel.cancel();
    if let Some(driver) = state.driver {
        driver.abort();
    }
    for (id, resources) in state.resources.into_iter().rev() {
        debug!(node_id = %id, "Disposing node resources");
        resources.dispose();
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let lifecycle = self
            .lifecycle
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Lifecycle::Open(state) = std::mem::replace(lifecycle, Lifecycle::Closed) {
            shutdown(state);
        }
    }
}

/// Background pass driver. Holds only a weak reference so dropping the last
/// `StateMachine` handle ends the loop.
async fn drive(
    inner: Weak<Inner>,
    forced: Arc<ForcedOutputTable>,
    cancel: CancellationToken,
    debounce: Duration,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = forced.notified() => {}
        }
        if !debounce.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(debounce) => {}
            }
        }
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let machine = StateMachine { inner };
        match machine.flush().await {
            Ok(report) if !report.failures.is_empty() => {
                debug!(failed = report.failures.len(), "Pass finished with failures");
            }
            Ok(_) => {}
            Err(ConductorError::Closed) => break,
            Err(e) => warn!(error = %e, "Pass failed"),
        }
    }
    debug!("Pass driver stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use conductor_core::shape::{Shape, ValueKind};
    use conductor_core::types::DEFAULT_OUTPUT;
    use serde_json::json;

    use crate::descriptor::{output, NodeDescriptor};

    fn machine() -> StateMachine {
        StateMachine::new(Arc::new(Registry::with_builtins()), EngineConfig::default())
    }

    fn record(id: &str, kind: &str, data: Value) -> NodeRecord {
        NodeRecord {
            id: id.into(),
            kind: kind.into(),
            data,
        }
    }

    fn and_gate() -> StateMachine {
        let m = machine();
        m.create_node(&record("a", "switch", json!({"value": false}))).unwrap();
        m.create_node(&record("b", "switch", json!({"value": true}))).unwrap();
        m.create_node(&record("c", "and", Value::Null)).unwrap();
        m.create_node(&record("d", "beacon", Value::Null)).unwrap();
        m.add_edge(Edge::new("a", "c").to_input("a")).unwrap();
        m.add_edge(Edge::new("b", "c").to_input("b")).unwrap();
        m.add_edge(Edge::new("c", "d")).unwrap();
        m
    }

    #[tokio::test]
    async fn test_and_gate() {
        let m = and_gate();
        m.open(ServiceContainer::new()).await.unwrap();
        let d = m.node(&"d".into()).unwrap();
        assert_eq!(d.inputs["input"], json!(false));

        m.set_output("a", DEFAULT_OUTPUT, json!(true)).unwrap();
        m.flush().await.unwrap();

        let d = m.node(&"d".into()).unwrap();
        assert_eq!(d.inputs["input"], json!(true));
        m.close();
    }

    #[tokio::test]
    async fn test_update_event_after_pass() {
        let m = and_gate();
        let mut rx = m.subscribe();
        m.open(ServiceContainer::new()).await.unwrap();

        let mut saw_opened = false;
        let mut saw_update = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                GraphEvent::Opened { failures } => {
                    assert!(failures.is_empty());
                    saw_opened = true;
                }
                GraphEvent::Update { pass, .. } => {
                    assert_eq!(pass, 1);
                    saw_update = true;
                }
                _ => {}
            }
        }
        assert!(saw_opened && saw_update);
        m.close();
    }

    #[tokio::test]
    async fn test_close_during_invoke_discards_result() {
        let mut registry = Registry::with_builtins();
        registry.register(
            NodeDescriptor::new("slow")
                .with_input(Shape::empty().with("input", ValueKind::Any))
                .with_output(Shape::empty().with(DEFAULT_OUTPUT, ValueKind::Any))
                .with_invoke(|inputs, _| async move {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    Ok(output(DEFAULT_OUTPUT, inputs["input"].clone()))
                }),
        );
        let m = StateMachine::new(Arc::new(registry), EngineConfig::default());
        m.create_node(&record("ask", "chat", Value::Null)).unwrap();
        m.create_node(&record("work", "slow", Value::Null)).unwrap();
        m.create_node(&record("out", "text", Value::Null)).unwrap();
        m.add_edge(Edge::new("ask", "work")).unwrap();
        m.add_edge(Edge::new("work", "out")).unwrap();
        m.open(ServiceContainer::new()).await.unwrap();

        m.set_output("ask", DEFAULT_OUTPUT, json!("hello")).unwrap();
        let running = m.clone();
        let pass = tokio::spawn(async move { running.flush().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        m.close();

        let report = pass.await.unwrap().unwrap();
        assert!(report.aborted);
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(m.node(&"out".into()).unwrap().inputs.is_empty());
        assert!(m.node(&"work".into()).unwrap().outputs.is_empty());
    }

    #[tokio::test]
    async fn test_compute_requires_open() {
        let m = and_gate();
        let err = m.compute([NodeId::from("a")]).await.unwrap_err();
        assert!(matches!(err, ConductorError::Closed));
    }

    #[tokio::test]
    async fn test_set_output_validation() {
        let m = and_gate();
        assert!(matches!(
            m.set_output("zz", DEFAULT_OUTPUT, json!(true)),
            Err(ConductorError::NodeNotFound(_))
        ));
        assert!(matches!(
            m.set_output("a", "nope", json!(true)),
            Err(ConductorError::UnknownProperty { .. })
        ));
        assert!(matches!(
            m.set_output("a", DEFAULT_OUTPUT, json!("yes")),
            Err(ConductorError::InvalidValue { .. })
        ));
        assert!(m.forced_output(&"a".into(), DEFAULT_OUTPUT).is_none());
    }

    #[tokio::test]
    async fn test_close_disposes_in_reverse_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut registry = Registry::new();
        let log = order.clone();
        registry.register(
            NodeDescriptor::new("res")
                .with_output(Shape::empty().with(DEFAULT_OUTPUT, ValueKind::Any))
                .with_on_open(move |ctx| {
                    let log = log.clone();
                    let id = ctx.node_id().to_string();
                    ctx.on_dispose(move || lock(&log).push(id));
                    Ok(())
                }),
        );
        let m = StateMachine::new(Arc::new(registry), EngineConfig::default());
        m.create_node(&record("one", "res", Value::Null)).unwrap();
        m.create_node(&record("two", "res", Value::Null)).unwrap();

        m.open(ServiceContainer::new()).await.unwrap();
        m.close();
        m.close();
        assert_eq!(*lock(&order), vec!["two".to_string(), "one".to_string()]);
        assert!(!m.is_open());
    }

    #[tokio::test]
    async fn test_open_failures_are_collected() {
        let mut registry = Registry::new();
        registry.register(
            NodeDescriptor::new("broken")
                .with_on_open(|ctx| Err(ConductorError::node(ctx.node_id().as_str(), "no socket"))),
        );
        let m = StateMachine::new(Arc::new(registry), EngineConfig::default());
        m.create_node(&record("x", "broken", Value::Null)).unwrap();

        let failures = m.open(ServiceContainer::new()).await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].kind, "broken");
        assert!(m.is_open());
        assert_eq!(m.diagnostics().open_failures.len(), 1);
        m.close();
    }

    #[tokio::test]
    async fn test_remove_node_while_open_disposes() {
        let disposed = Arc::new(AtomicUsize::new(0));
        let mut registry = Registry::new();
        let counter = disposed.clone();
        registry.register(NodeDescriptor::new("res").with_on_open(move |ctx| {
            let counter = counter.clone();
            ctx.on_dispose(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            Ok(())
        }));
        let m = StateMachine::new(Arc::new(registry), EngineConfig::default());
        m.open(ServiceContainer::new()).await.unwrap();
        m.create_node(&record("late", "res", Value::Null)).unwrap();

        assert!(m.remove_node(&"late".into()).is_some());
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
        assert!(m.remove_node(&"late".into()).is_none());
        m.close();
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_new_edge_seeds_target() {
        let m = machine();
        m.create_node(&record("k", "constant", json!({"value": "hi"}))).unwrap();
        m.create_node(&record("t", "text", Value::Null)).unwrap();
        m.open(ServiceContainer::new()).await.unwrap();

        m.add_edge(Edge::new("k", "t")).unwrap();
        let t = m.node(&"t".into()).unwrap();
        assert_eq!(t.inputs["input"], json!("hi"));
        m.flush().await.unwrap();
        let t = m.node(&"t".into()).unwrap();
        assert_eq!(t.status, conductor_core::types::NodeStatus::Executed);
        m.close();
    }

    #[tokio::test]
    async fn test_driver_runs_pass_without_flush() {
        let m = and_gate();
        let mut rx = m.subscribe();
        m.open(ServiceContainer::new()).await.unwrap();
        m.set_output("a", DEFAULT_OUTPUT, json!(true)).unwrap();

        let seen = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match rx.recv().await {
                    Ok(GraphEvent::Input { node_id, value, .. })
                        if node_id == NodeId::from("d") && value == json!(true) =>
                    {
                        break true
                    }
                    Ok(_) => continue,
                    Err(_) => break false,
                }
            }
        })
        .await
        .unwrap();
        assert!(seen);
        m.close();
    }

    #[tokio::test]
    async fn test_snapshot_serializes() {
        let m = and_gate();
        m.open(ServiceContainer::new()).await.unwrap();
        m.set_output("a", DEFAULT_OUTPUT, json!(true)).unwrap();
        let snap = serde_json::to_value(m.snapshot()).unwrap();
        assert_eq!(snap["open"], true);
        assert_eq!(snap["nodes"].as_array().unwrap().len(), 4);
        assert_eq!(snap["forced"]["a"]["result"], true);
        m.close();
    }

    #[tokio::test]
    async fn test_custom_descriptor_via_add_node() {
        let m = machine();
        let desc = Arc::new(
            NodeDescriptor::new("answer")
                .with_output(Shape::empty().with(DEFAULT_OUTPUT, ValueKind::Number))
                .with_sync_invoke(|_, _| Ok(output(DEFAULT_OUTPUT, json!(42))))
                .auto_trigger(),
        );
        m.add_node(NodeInstance::new("q", desc, Value::Null)).unwrap();
        m.open(ServiceContainer::new()).await.unwrap();
        assert_eq!(m.node(&"q".into()).unwrap().outputs[DEFAULT_OUTPUT], json!(42));
        m.close();
    }
}
