use std::collections::HashMap;
use std::sync::Arc;

use conductor_core::error::{ConductorError, Result};

use crate::descriptor::NodeDescriptor;
use crate::instance::NodeInstance;
use crate::record::NodeRecord;

/// Map from node type tag to descriptor.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    descriptors: HashMap<String, Arc<NodeDescriptor>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor, replacing any previous one with the same kind.
    pub fn register(&mut self, descriptor: NodeDescriptor) {
        let kind = descriptor.kind.clone();
        self.descriptors.insert(kind, Arc::new(descriptor));
    }

    /// Unregister a descriptor by kind.
    pub fn unregister(&mut self, kind: &str) -> bool {
        self.descriptors.remove(kind).is_some()
    }

    pub fn get(&self, kind: &str) -> Option<Arc<NodeDescriptor>> {
        self.descriptors.get(kind).cloned()
    }

    /// Registered kinds, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.descriptors.keys().map(|s| s.as_str()).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Descriptors sorted by kind.
    pub fn descriptors(&self) -> Vec<Arc<NodeDescriptor>> {
        let mut all: Vec<_> = self.descriptors.values().cloned().collect();
        all.sort_by(|a, b| a.kind.cmp(&b.kind));
        all
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Build a node instance from its serialized record.
    pub fn materialize(&self, record: &NodeRecord) -> Result<NodeInstance> {
        let descriptor = self
            .get(&record.kind)
            .ok_or_else(|| ConductorError::UnknownNodeType(record.kind.clone()))?;
        Ok(NodeInstance::new(
            record.id.as_str(),
            descriptor,
            record.data.clone(),
        ))
    }

    /// Create a registry with all built-in node types registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        // ── Sources ─────────────────────────────────────────────
        registry.register(crate::builtin::sources::constant());
        registry.register(crate::builtin::sources::switch());
        registry.register(crate::builtin::sources::rng());
        registry.register(crate::builtin::sources::chat());
        registry.register(crate::builtin::sources::audio());
        registry.register(crate::builtin::sources::timer());

        // ── Logic ───────────────────────────────────────────────
        registry.register(crate::builtin::logic::and());
        registry.register(crate::builtin::logic::or());
        registry.register(crate::builtin::logic::not());
        registry.register(crate::builtin::logic::if_node());
        registry.register(crate::builtin::logic::if_else());

        // ── Transform ───────────────────────────────────────────
        registry.register(crate::builtin::transform::json());
        registry.register(crate::builtin::transform::json_transform());
        registry.register(crate::builtin::transform::template());

        // ── Services ────────────────────────────────────────────
        registry.register(crate::builtin::services::function());
        registry.register(crate::builtin::services::gpt());

        // ── Sinks ───────────────────────────────────────────────
        registry.register(crate::builtin::sinks::beacon());
        registry.register(crate::builtin::sinks::text());
        registry.register(crate::builtin::sinks::scope());

        registry
    }
}
