use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use serde::Serialize;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use conductor_core::config::EngineConfig;
use conductor_core::error::{ConductorError, Result};
use conductor_core::event::EventBus;
use conductor_core::types::{GraphEvent, NodeFailure, NodeId, NodeStatus, ValueMap};
use conductor_core::ServiceContainer;

use crate::descriptor::{InvokeContext, InvokeFn};
use crate::forced::ForcedOutputTable;
use crate::resolver::DependencyResolver;
use crate::store::GraphStore;

/// Shared state a pass reads and writes.
pub struct PassContext<'a> {
    pub store: &'a Mutex<GraphStore>,
    pub forced: &'a ForcedOutputTable,
    pub services: &'a ServiceContainer,
    /// Liveness token; once cancelled no further result is written.
    pub cancel: &'a CancellationToken,
    pub events: &'a EventBus,
}

/// Summary of one pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PassReport {
    pub iterations: usize,
    /// Nodes whose invoke function ran, failed ones included.
    pub invoked: Vec<NodeId>,
    /// Nodes that produced forced outputs instead of being invoked.
    pub forced: Vec<NodeId>,
    /// Nodes left out because they were not ready or a predecessor failed.
    pub skipped: Vec<NodeId>,
    pub failures: Vec<NodeFailure>,
    /// The graph closed before the pass finished.
    pub aborted: bool,
    pub elapsed_ms: u64,
}

impl PassReport {
    pub fn succeeded(&self) -> bool {
        self.failures.is_empty() && !self.aborted
    }
}

/// Runs passes over a graph.
#[derive(Debug, Clone)]
pub struct Executor {
    max_iterations: usize,
    node_timeout: Option<Duration>,
}

impl Default for Executor {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// What to do with a node once its affected predecessors have finished.
enum Step {
    /// Neither seeded nor fed a changed input.
    Idle,
    /// A direct predecessor failed in this iteration.
    Blocked,
    /// Required inputs missing.
    Pending,
    /// Node without invoke and without outputs.
    Sink,
    Forced(ValueMap),
    Invoke(InvokeFn, ValueMap, InvokeContext),
    Failed(ConductorError),
}

type Outcome = (NodeId, std::result::Result<Option<Result<ValueMap>>, JoinError>);

/// Scheduling state of one iteration.
struct Iteration {
    affected: BTreeSet<NodeId>,
    /// Affected predecessors each node still waits on.
    waiting: BTreeMap<NodeId, BTreeSet<NodeId>>,
    successors: BTreeMap<NodeId, BTreeSet<NodeId>>,
    predecessors: BTreeMap<NodeId, BTreeSet<NodeId>>,
    seeds: BTreeSet<NodeId>,
    ready: BTreeSet<NodeId>,
    started: BTreeSet<NodeId>,
    finished: BTreeSet<NodeId>,
    /// Nodes whose input changed during this iteration.
    changed: BTreeSet<NodeId>,
    failed: BTreeSet<NodeId>,
    /// Back-edge targets that already ran; seeds of the next iteration.
    next: BTreeSet<NodeId>,
}

impl Iteration {
    fn plan(store: &GraphStore, seeds: BTreeSet<NodeId>) -> Self {
        let resolver = DependencyResolver::new(store);
        let mut affected = resolver.dependents_of_all(&seeds);
        affected.extend(seeds.iter().cloned());

        let mut waiting = BTreeMap::new();
        let mut successors = BTreeMap::new();
        let mut predecessors = BTreeMap::new();
        for id in &affected {
            let preds: BTreeSet<NodeId> = resolver
                .predecessors(id)
                .filter(|p| *p != id)
                .cloned()
                .collect();
            let succs: BTreeSet<NodeId> = resolver
                .successors(id)
                .filter(|s| affected.contains(*s) && *s != id)
                .cloned()
                .collect();
            waiting.insert(
                id.clone(),
                preds
                    .iter()
                    .filter(|p| affected.contains(*p))
                    .cloned()
                    .collect::<BTreeSet<_>>(),
            );
            predecessors.insert(id.clone(), preds);
            successors.insert(id.clone(), succs);
        }
        let ready = waiting
            .iter()
            .filter(|(_, preds)| preds.is_empty())
            .map(|(id, _)| id.clone())
            .collect();

        Self {
            affected,
            waiting,
            successors,
            predecessors,
            seeds,
            ready,
            started: BTreeSet::new(),
            finished: BTreeSet::new(),
            changed: BTreeSet::new(),
            failed: BTreeSet::new(),
            next: BTreeSet::new(),
        }
    }

    fn is_done(&self) -> bool {
        self.finished.len() >= self.affected.len()
    }

    fn triggered(&self, id: &NodeId) -> bool {
        self.seeds.contains(id) || self.changed.contains(id)
    }

    fn blocked(&self, id: &NodeId) -> bool {
        self.predecessors
            .get(id)
            .is_some_and(|preds| preds.iter().any(|p| self.failed.contains(p)))
    }

    /// Mark a node finished and release successors whose wait is over.
    fn finish(&mut self, id: &NodeId) {
        self.finished.insert(id.clone());
        let Some(succs) = self.successors.get(id) else {
            return;
        };
        for succ in succs {
            if let Some(waiting) = self.waiting.get_mut(succ) {
                waiting.remove(id);
                if waiting.is_empty() && !self.started.contains(succ) {
                    self.ready.insert(succ.clone());
                }
            }
        }
    }

    /// Release the lowest-id node that has not started; used to break cycles.
    fn release_waiting(&mut self) -> Option<NodeId> {
        let id = self
            .affected
            .iter()
            .find(|id| !self.started.contains(*id))?
            .clone();
        self.ready.insert(id.clone());
        Some(id)
    }

    /// Record that a node's input changed.
    fn input_changed(&mut self, id: &NodeId) {
        if self.affected.contains(id) && !self.started.contains(id) {
            self.changed.insert(id.clone());
        } else {
            self.next.insert(id.clone());
        }
    }
}

fn lock(store: &Mutex<GraphStore>) -> MutexGuard<'_, GraphStore> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Executor {
    pub fn new(max_iterations: usize, node_timeout: Option<Duration>) -> Self {
        Self {
            max_iterations: max_iterations.max(1),
            node_timeout,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        let timeout = match config.node_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        Self::new(config.max_iterations, timeout)
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Run one pass from `seeds`.
    ///
    /// Iterates until no node is dirtied by a back edge. Node failures are
    /// recorded in the report; only exceeding the iteration guard is an error.
    pub async fn compute(
        &self,
        ctx: &PassContext<'_>,
        seeds: BTreeSet<NodeId>,
    ) -> Result<PassReport> {
        let start = Instant::now();
        let mut report = PassReport::default();
        let mut dirty: BTreeSet<NodeId> = {
            let store = lock(ctx.store);
            seeds.into_iter().filter(|id| store.contains_node(id)).collect()
        };

        while !dirty.is_empty() {
            if ctx.cancel.is_cancelled() {
                report.aborted = true;
                break;
            }
            if report.iterations >= self.max_iterations {
                warn!(
                    iterations = report.iterations,
                    dirty = dirty.len(),
                    "Graph did not settle, aborting pass"
                );
                return Err(ConductorError::NonterminatingGraph {
                    iterations: report.iterations,
                });
            }
            report.iterations += 1;
            trace!(iteration = report.iterations, seeds = dirty.len(), "Starting iteration");

            match self.iterate(ctx, dirty, &mut report).await {
                Some(next) => dirty = next,
                None => {
                    report.aborted = true;
                    break;
                }
            }
        }

        report.elapsed_ms = start.elapsed().as_millis() as u64;
        debug!(
            iterations = report.iterations,
            invoked = report.invoked.len(),
            failed = report.failures.len(),
            aborted = report.aborted,
            elapsed_ms = report.elapsed_ms,
            "Pass complete"
        );
        Ok(report)
    }

    /// Run one iteration; returns the next iteration's seeds, or `None` when
    /// the graph closed midway.
    async fn iterate(
        &self,
        ctx: &PassContext<'_>,
        seeds: BTreeSet<NodeId>,
        report: &mut PassReport,
    ) -> Option<BTreeSet<NodeId>> {
        let mut it = Iteration::plan(&lock(ctx.store), seeds);
        let mut running: FuturesUnordered<BoxFuture<'static, Outcome>> = FuturesUnordered::new();

        while !it.is_done() {
            while let Some(id) = it.ready.pop_first() {
                if !it.started.insert(id.clone()) {
                    continue;
                }
                match self.step(ctx, &it, &id) {
                    Step::Idle => it.finish(&id),
                    Step::Blocked => {
                        debug!(node_id = %id, "Predecessor failed, skipping node");
                        report.skipped.push(id.clone());
                        it.finish(&id);
                    }
                    Step::Pending => {
                        trace!(node_id = %id, "Node not ready");
                        set_status(ctx, &id, NodeStatus::Pending);
                        report.skipped.push(id.clone());
                        it.finish(&id);
                    }
                    Step::Sink => {
                        set_status(ctx, &id, NodeStatus::Executed);
                        it.finish(&id);
                    }
                    Step::Forced(outputs) => {
                        report.forced.push(id.clone());
                        self.complete(ctx, &mut it, report, &id, Ok(outputs));
                    }
                    Step::Invoke(invoke, inputs, invoke_ctx) => {
                        report.invoked.push(id.clone());
                        running.push(self.spawn(id.clone(), invoke, inputs, invoke_ctx));
                    }
                    Step::Failed(err) => {
                        self.complete(ctx, &mut it, report, &id, Err(err));
                    }
                }
            }

            if running.is_empty() {
                if it.is_done() {
                    break;
                }
                if let Some(id) = it.release_waiting() {
                    debug!(node_id = %id, "Breaking cycle");
                    continue;
                }
                break;
            }

            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return None,
                Some((id, joined)) = running.next() => {
                    let result = match joined {
                        Ok(Some(result)) => result,
                        Ok(None) => return None,
                        Err(e) if e.is_panic() => Err(ConductorError::node(id.as_str(), "invoke panicked")),
                        Err(e) => Err(ConductorError::node(id.as_str(), e.to_string())),
                    };
                    if ctx.cancel.is_cancelled() {
                        return None;
                    }
                    self.complete(ctx, &mut it, report, &id, result);
                }
            }
        }

        Some(it.next)
    }

    /// Decide how to handle a node, snapshotting what it needs under the lock.
    fn step(&self, ctx: &PassContext<'_>, it: &Iteration, id: &NodeId) -> Step {
        if !it.triggered(id) {
            return Step::Idle;
        }
        if it.blocked(id) {
            return Step::Blocked;
        }
        if let Some(outputs) = ctx.forced.outputs_for(id) {
            return Step::Forced(outputs);
        }

        let store = lock(ctx.store);
        let Some(node) = store.get_node(id) else {
            return Step::Idle;
        };
        let Some(invoke) = node.descriptor.invoke.clone() else {
            return match (node.descriptor.is_sink(), node.is_ready()) {
                (true, true) => Step::Sink,
                (true, false) => Step::Pending,
                (false, _) => Step::Idle,
            };
        };
        if !node.is_ready() {
            return Step::Pending;
        }
        if let Err((property, message)) = node.descriptor.input.check(&node.inputs) {
            return Step::Failed(ConductorError::InvalidValue {
                node: id.to_string(),
                property,
                message,
            });
        }
        let invoke_ctx = InvokeContext {
            node_id: id.clone(),
            data: node.data.clone(),
            services: ctx.services.clone(),
            cancel: ctx.cancel.child_token(),
        };
        Step::Invoke(invoke, node.inputs.clone(), invoke_ctx)
    }

    /// Spawn an invocation bounded by the node timeout and the liveness token.
    fn spawn(
        &self,
        id: NodeId,
        invoke: InvokeFn,
        inputs: ValueMap,
        ctx: InvokeContext,
    ) -> BoxFuture<'static, Outcome> {
        let timeout = self.node_timeout;
        let cancel = ctx.cancel.clone();
        let node = id.to_string();
        trace!(node_id = %id, "Invoking node");

        let handle = tokio::spawn(async move {
            let fut = invoke(inputs, ctx);
            let bounded = async move {
                match timeout {
                    Some(limit) => match tokio::time::timeout(limit, fut).await {
                        Ok(result) => result,
                        Err(_) => Err(ConductorError::NodeTimeout {
                            node,
                            timeout_secs: limit.as_secs(),
                        }),
                    },
                    None => fut.await,
                }
            };
            tokio::select! {
                _ = cancel.cancelled() => None,
                result = bounded => Some(result),
            }
        });
        Box::pin(async move { (id, handle.await) })
    }

    /// Store a node's result, propagate its outputs, and publish events.
    fn complete(
        &self,
        ctx: &PassContext<'_>,
        it: &mut Iteration,
        report: &mut PassReport,
        id: &NodeId,
        result: Result<ValueMap>,
    ) {
        let mut store = lock(ctx.store);
        let Some(node) = store.get_node_mut(id) else {
            // Removed while running.
            it.finish(id);
            return;
        };

        let result = result.and_then(|outputs| {
            node.descriptor
                .output
                .check(&outputs)
                .map(|_| outputs)
                .map_err(|(property, message)| ConductorError::InvalidValue {
                    node: id.to_string(),
                    property,
                    message,
                })
        });

        match result {
            Ok(outputs) => {
                node.status = NodeStatus::Executed;
                let propagation = store.propagate(id, outputs);
                drop(store);

                for (property, value) in propagation.outputs {
                    ctx.events.publish(GraphEvent::Output {
                        node_id: id.clone(),
                        property,
                        value,
                    });
                }
                for change in propagation.inputs {
                    it.input_changed(&change.node_id);
                    if let Some(value) = change.value {
                        ctx.events.publish(GraphEvent::Input {
                            node_id: change.node_id,
                            property: change.property,
                            value,
                        });
                    }
                }
            }
            Err(err) => {
                let kind = node.kind().to_string();
                error!(
                    node_id = %id,
                    kind = %kind,
                    inputs = ?node.inputs,
                    error = %err,
                    "Node failed"
                );
                node.status = NodeStatus::Failed {
                    error: err.to_string(),
                };
                drop(store);

                let failure = NodeFailure {
                    node_id: id.clone(),
                    kind,
                    error: err.to_string(),
                };
                ctx.events.publish(GraphEvent::NodeFailed(failure.clone()));
                report.failures.push(failure);
                it.failed.insert(id.clone());
            }
        }
        it.finish(id);
    }
}

fn set_status(ctx: &PassContext<'_>, id: &NodeId, status: NodeStatus) {
    if let Some(node) = lock(ctx.store).get_node_mut(id) {
        node.status = status;
    }
}
