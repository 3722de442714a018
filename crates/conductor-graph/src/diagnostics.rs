//! Static graph checks and runtime failure bookkeeping.

use std::collections::BTreeMap;

use serde::Serialize;

use conductor_core::types::{EdgeId, NodeFailure, NodeId};

use crate::executor::PassReport;
use crate::resolver::DependencyResolver;
use crate::store::GraphStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edge_id: Option<EdgeId>,
    pub message: String,
}

impl Diagnostic {
    pub fn node(severity: Severity, node_id: &NodeId, message: impl Into<String>) -> Self {
        Self {
            severity,
            node_id: Some(node_id.clone()),
            edge_id: None,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.severity)?;
        if let Some(node) = &self.node_id {
            write!(f, " [{}]", node)?;
        }
        if let Some(edge) = &self.edge_id {
            write!(f, " (edge {})", edge)?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Static analysis of a graph's structure.
///
/// Flags required inputs with no edge, nodes on cycles, and nodes that can
/// never run because nothing feeds or triggers them.
pub fn check(store: &GraphStore) -> Vec<Diagnostic> {
    let mut found = Vec::new();
    let resolver = DependencyResolver::new(store);

    for node in store.nodes() {
        let incoming = store.incoming(&node.id);
        for property in node.descriptor.input.required() {
            if !incoming.iter().any(|e| e.target_property == property.name) {
                found.push(Diagnostic::node(
                    Severity::Warning,
                    &node.id,
                    format!(
                        "required input '{}' ({}) is not connected",
                        property.name,
                        property.kind.describe()
                    ),
                ));
            }
        }

        let descriptor = &node.descriptor;
        let fed_externally = descriptor.auto_trigger || descriptor.on_open.is_some();
        if incoming.is_empty()
            && store.outgoing(&node.id).is_empty()
            && !fed_externally
            && descriptor.input.is_empty()
        {
            found.push(Diagnostic::node(
                Severity::Info,
                &node.id,
                "node is isolated and only runs when its output is forced",
            ));
        }
    }

    let order = resolver.full_order();
    for id in &order.cyclic {
        if resolver.on_cycle(id) {
            found.push(Diagnostic::node(
                Severity::Warning,
                id,
                "node is part of a cycle; passes iterate until values settle",
            ));
        }
    }

    found.sort_by(|a, b| b.severity.cmp(&a.severity).then(a.node_id.cmp(&b.node_id)));
    found
}

/// Failures observed while the graph ran.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RuntimeDiagnostics {
    /// Last failure per node; cleared when the node next succeeds.
    pub failures: BTreeMap<NodeId, NodeFailure>,
    /// `on_open` hooks that failed during the last open.
    pub open_failures: Vec<NodeFailure>,
    /// Error that ended the last pass, if any.
    pub last_error: Option<String>,
    pub passes: u64,
}

impl RuntimeDiagnostics {
    pub(crate) fn record_pass(&mut self, report: &PassReport) {
        self.passes += 1;
        self.last_error = None;
        for id in report.invoked.iter().chain(&report.forced) {
            self.failures.remove(id);
        }
        for failure in &report.failures {
            self.failures
                .insert(failure.node_id.clone(), failure.clone());
        }
    }

    pub(crate) fn record_error(&mut self, error: String) {
        self.passes += 1;
        self.last_error = Some(error);
    }

    pub(crate) fn forget(&mut self, id: &NodeId) {
        self.failures.remove(id);
        self.open_failures.retain(|f| &f.node_id != id);
    }

    pub fn is_healthy(&self) -> bool {
        self.failures.is_empty() && self.open_failures.is_empty() && self.last_error.is_none()
    }

    /// Runtime failures as diagnostics.
    pub fn to_diagnostics(&self) -> Vec<Diagnostic> {
        let mut out: Vec<Diagnostic> = self
            .open_failures
            .iter()
            .map(|f| Diagnostic::node(Severity::Error, &f.node_id, format!("open failed: {}", f.error)))
            .collect();
        out.extend(
            self.failures
                .values()
                .map(|f| Diagnostic::node(Severity::Error, &f.node_id, f.error.clone())),
        );
        if let Some(err) = &self.last_error {
            out.push(Diagnostic {
                severity: Severity::Error,
                node_id: None,
                edge_id: None,
                message: err.clone(),
            });
        }
        out
    }
}
