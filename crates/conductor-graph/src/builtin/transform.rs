//! Value reshaping nodes.

use regex::Regex;
use serde_json::json;

use conductor_core::error::ConductorError;
use conductor_core::shape::{Shape, ValueKind};
use conductor_core::types::{Value, DEFAULT_INPUT, DEFAULT_OUTPUT};

use super::{display, required};
use crate::descriptor::{output, NodeDescriptor};

pub fn json() -> NodeDescriptor {
    NodeDescriptor::new("json")
        .with_description("Passes `input` through unchanged")
        .with_input(Shape::empty().with(DEFAULT_INPUT, ValueKind::Any))
        .with_output(Shape::empty().with(DEFAULT_OUTPUT, ValueKind::Any))
        .with_sync_invoke(|inputs, ctx| {
            Ok(output(DEFAULT_OUTPUT, required(&inputs, DEFAULT_INPUT, ctx)?.clone()))
        })
}

/// Select part of `input` with a dot path from `data.expression`,
/// e.g. `items[0].name`. Missing segments yield `null`.
///
/// A string `input` is parsed as JSON first (unparseable text becomes `{}`),
/// and a bare number or boolean is queried as `{"value": input}`.
pub fn json_transform() -> NodeDescriptor {
    NodeDescriptor::new("json-transform")
        .with_description("Selects part of `input` with the dot path in `expression`")
        .with_input(Shape::empty().with(DEFAULT_INPUT, ValueKind::Any))
        .with_output(Shape::empty().with(DEFAULT_OUTPUT, ValueKind::Any))
        .with_sync_invoke(|inputs, ctx| {
            let input = required(&inputs, DEFAULT_INPUT, ctx)?;
            let expression = ctx.data_str("expression").unwrap_or("");
            let subject = query_subject(input);
            Ok(output(DEFAULT_OUTPUT, json_path_query(&subject, expression)))
        })
}

fn query_subject(input: &Value) -> Value {
    match input {
        Value::String(text) => {
            serde_json::from_str(text).unwrap_or_else(|_| Value::Object(Default::default()))
        }
        Value::Bool(_) | Value::Number(_) => json!({ "value": input }),
        other => other.clone(),
    }
}

pub(crate) fn json_path_query(value: &Value, path: &str) -> Value {
    let mut current = value;
    for segment in path.split('.') {
        if segment.is_empty() {
            continue;
        }
        let (key, indices) = match segment.find('[') {
            Some(pos) => (&segment[..pos], &segment[pos..]),
            None => (segment, ""),
        };
        if !key.is_empty() {
            match current.get(key) {
                Some(next) => current = next,
                None => return Value::Null,
            }
        }
        // One or more `[n]` suffixes.
        for index in indices.split('[').filter(|s| !s.is_empty()) {
            let next = index
                .trim_end_matches(']')
                .parse::<usize>()
                .ok()
                .and_then(|i| current.get(i));
            match next {
                Some(next) => current = next,
                None => return Value::Null,
            }
        }
    }
    current.clone()
}

const PLACEHOLDER: &str = r"\{\{\s*([A-Za-z_][A-Za-z0-9_\-]*)\s*\}\}";

/// Substitute `{{name}}` placeholders in `data.template` with inputs of the
/// same name. Unknown names render as empty strings.
pub fn template() -> NodeDescriptor {
    let placeholder = Regex::new(PLACEHOLDER).ok();
    NodeDescriptor::new("template")
        .with_description("Fills `{{name}}` placeholders in `template` from inputs")
        .with_input(Shape::open())
        .with_output(Shape::empty().with(DEFAULT_OUTPUT, ValueKind::String))
        .with_sync_invoke(move |inputs, ctx| {
            let placeholder = placeholder
                .as_ref()
                .ok_or_else(|| ConductorError::node(ctx.node_id.as_str(), "bad placeholder pattern"))?;
            let template = ctx.data_str("template").ok_or_else(|| {
                ConductorError::node(ctx.node_id.as_str(), "missing `template` in node data")
            })?;
            let rendered = placeholder.replace_all(template, |caps: &regex::Captures| {
                inputs.get(&caps[1]).map(display).unwrap_or_default()
            });
            Ok(output(DEFAULT_OUTPUT, Value::String(rendered.into_owned())))
        })
}
