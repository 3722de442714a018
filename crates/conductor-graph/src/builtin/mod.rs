//! Built-in node library registered by `Registry::with_builtins`.

pub mod logic;
pub mod services;
pub mod sinks;
pub mod sources;
pub mod transform;

use conductor_core::error::{ConductorError, Result};
use conductor_core::types::{Value, ValueMap};

use crate::descriptor::InvokeContext;

/// Fetch a required input; the executor only invokes ready nodes, so a miss
/// means the descriptor and the invoke function disagree.
pub(crate) fn required<'a>(
    inputs: &'a ValueMap,
    property: &str,
    ctx: &InvokeContext,
) -> Result<&'a Value> {
    inputs.get(property).ok_or_else(|| {
        ConductorError::node(
            ctx.node_id.as_str(),
            format!("missing input '{}'", property),
        )
    })
}

/// Render a value as text: strings verbatim, everything else as JSON.
pub(crate) fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
