//! Boolean gates and routing.
//!
//! Inputs are read with lenient truthiness: `false`, `null`, `"false"`,
//! `"FALSE"`, `"0"` and empty arrays are false, everything else is true.

use serde_json::json;

use conductor_core::shape::{Shape, ValueKind};
use conductor_core::types::{is_truthy, DEFAULT_INPUT, DEFAULT_OUTPUT};

use super::required;
use crate::descriptor::{output, NodeDescriptor};

fn gate(kind: &str, description: &str, combine: fn(bool, bool) -> bool) -> NodeDescriptor {
    NodeDescriptor::new(kind)
        .with_description(description)
        .with_input(
            Shape::empty()
                .with("a", ValueKind::Any)
                .with("b", ValueKind::Any),
        )
        .with_output(Shape::empty().with(DEFAULT_OUTPUT, ValueKind::Boolean))
        .with_sync_invoke(move |inputs, ctx| {
            let a = is_truthy(required(&inputs, "a", ctx)?);
            let b = is_truthy(required(&inputs, "b", ctx)?);
            Ok(output(DEFAULT_OUTPUT, json!(combine(a, b))))
        })
}

pub fn and() -> NodeDescriptor {
    gate("and", "Logical AND of `a` and `b`", |a, b| a && b)
}

pub fn or() -> NodeDescriptor {
    gate("or", "Logical OR of `a` and `b`", |a, b| a || b)
}

pub fn not() -> NodeDescriptor {
    NodeDescriptor::new("not")
        .with_description("Logical NOT of `input`")
        .with_input(Shape::empty().with(DEFAULT_INPUT, ValueKind::Any))
        .with_output(Shape::empty().with(DEFAULT_OUTPUT, ValueKind::Boolean))
        .with_sync_invoke(|inputs, ctx| {
            let value = is_truthy(required(&inputs, DEFAULT_INPUT, ctx)?);
            Ok(output(DEFAULT_OUTPUT, json!(!value)))
        })
}

/// Routes `value` to the `true` or `false` output; the other output is not
/// produced, so nodes behind it do not run.
pub fn if_node() -> NodeDescriptor {
    NodeDescriptor::new("if")
        .with_description("Routes `value` to the `true` or `false` output by `condition`")
        .with_input(
            Shape::empty()
                .with("condition", ValueKind::Any)
                .with("value", ValueKind::Any),
        )
        .with_output(
            Shape::empty()
                .with_optional("true", ValueKind::Any)
                .with_optional("false", ValueKind::Any),
        )
        .with_sync_invoke(|inputs, ctx| {
            let condition = is_truthy(required(&inputs, "condition", ctx)?);
            let value = required(&inputs, "value", ctx)?.clone();
            let branch = if condition { "true" } else { "false" };
            Ok(output(branch, value))
        })
}

/// Ternary: `result` is `if` when `condition` holds, otherwise `else`.
pub fn if_else() -> NodeDescriptor {
    NodeDescriptor::new("if-else")
        .with_description("Outputs `if` when `condition` is truthy, otherwise `else`")
        .with_input(
            Shape::empty()
                .with("condition", ValueKind::Any)
                .with("if", ValueKind::Any)
                .with("else", ValueKind::Any),
        )
        .with_output(Shape::empty().with(DEFAULT_OUTPUT, ValueKind::Any))
        .with_sync_invoke(|inputs, ctx| {
            let condition = is_truthy(required(&inputs, "condition", ctx)?);
            let chosen = if condition { "if" } else { "else" };
            Ok(output(DEFAULT_OUTPUT, required(&inputs, chosen, ctx)?.clone()))
        })
}
