//! Serialized graph form, loadable from TOML or JSON.
//!
//! ```toml
//! [[nodes]]
//! id = "a"
//! type = "switch"
//! data = { value = false }
//!
//! [[edges]]
//! source = "a"
//! target = "c"
//! input = "a"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use conductor_core::error::{ConductorError, Result};
use conductor_core::types::{EdgeId, Value};

use crate::edge::Edge;
use crate::registry::Registry;
use crate::store::GraphStore;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphRecord {
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
    #[serde(default)]
    pub edges: Vec<EdgeRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    /// Generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub source: String,
    pub target: String,
    /// Source output property; defaults to `result`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Target input property; defaults to `input`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
}

impl EdgeRecord {
    pub fn to_edge(&self) -> Edge {
        let mut edge = Edge::new(self.source.as_str(), self.target.as_str());
        if let Some(id) = &self.id {
            edge.id = EdgeId(id.clone());
        }
        if let Some(output) = &self.output {
            edge.source_property = output.clone();
        }
        if let Some(input) = &self.input {
            edge.target_property = input.clone();
        }
        edge
    }
}

impl From<&Edge> for EdgeRecord {
    fn from(edge: &Edge) -> Self {
        Self {
            id: Some(edge.id.to_string()),
            source: edge.source.to_string(),
            target: edge.target.to_string(),
            output: Some(edge.source_property.clone()),
            input: Some(edge.target_property.clone()),
        }
    }
}

impl GraphRecord {
    /// Load a graph file; `.json` is parsed as JSON, anything else as TOML.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&content),
            _ => Self::from_toml_str(&content),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ConductorError::Config(e.to_string()))
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Materialize every node and edge into a fresh store.
    pub fn build(&self, registry: &Registry) -> Result<GraphStore> {
        let mut store = GraphStore::new();
        for record in &self.nodes {
            store.add_node(registry.materialize(record)?)?;
        }
        for record in &self.edges {
            store.add_edge(record.to_edge())?;
        }
        Ok(store)
    }

    /// Serialize the structure of a store.
    pub fn from_store(store: &GraphStore) -> Self {
        Self {
            nodes: store
                .nodes()
                .map(|n| NodeRecord {
                    id: n.id.to_string(),
                    kind: n.kind().to_string(),
                    data: n.data.clone(),
                })
                .collect(),
            edges: store.edges().iter().map(EdgeRecord::from).collect(),
        }
    }
}
