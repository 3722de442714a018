use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConductorError {
    // Structural errors
    #[error("Duplicate {kind} id: {id}")]
    DuplicateId { kind: &'static str, id: String },

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("Unknown {direction} property '{property}' on node {node}")]
    UnknownProperty {
        node: String,
        property: String,
        direction: &'static str,
    },

    #[error("Input '{property}' on node {node} is already bound to an edge")]
    InputAlreadyBound { node: String, property: String },

    // Invocation errors
    #[error("Node execution failed: {node}: {message}")]
    NodeExecution { node: String, message: String },

    #[error("Node timeout after {timeout_secs}s: {node}")]
    NodeTimeout { node: String, timeout_secs: u64 },

    #[error("Invalid value for '{property}' on node {node}: {message}")]
    InvalidValue {
        node: String,
        property: String,
        message: String,
    },

    #[error("Service not available: {0}")]
    ServiceUnavailable(String),

    // Pass errors
    #[error("Graph did not settle after {iterations} iterations")]
    NonterminatingGraph { iterations: usize },

    #[error("Graph is closed")]
    Closed,

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Notebook errors
    #[error("Expression error: {0}")]
    Expression(String),

    #[error("Dependency cycle: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConductorError {
    /// Shorthand for a node-local execution failure.
    pub fn node(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NodeExecution {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Whether this error was raised by a structural graph mutation.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::DuplicateId { .. }
                | Self::NodeNotFound(_)
                | Self::UnknownNodeType(_)
                | Self::UnknownProperty { .. }
                | Self::InputAlreadyBound { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ConductorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = ConductorError::DuplicateId {
            kind: "node",
            id: "a".into(),
        };
        assert_eq!(err.to_string(), "Duplicate node id: a");

        let err = ConductorError::DependencyCycle(vec!["x".into(), "y".into(), "x".into()]);
        assert_eq!(err.to_string(), "Dependency cycle: x -> y -> x");
    }

    #[test]
    fn test_is_structural() {
        assert!(ConductorError::UnknownNodeType("foo".into()).is_structural());
        assert!(!ConductorError::node("a", "boom").is_structural());
        assert!(!ConductorError::Closed.is_structural());
    }
}
