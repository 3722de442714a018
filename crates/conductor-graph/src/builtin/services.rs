//! Nodes backed by host services from the `ServiceContainer`.

use serde_json::json;
use tracing::debug;

use conductor_core::error::ConductorError;
use conductor_core::shape::{Shape, ValueKind};
use conductor_core::traits::GptRequest;
use conductor_core::types::{Value, DEFAULT_OUTPUT};

use super::{display, required};
use crate::descriptor::{output, NodeDescriptor};

/// Calls the host function named by `data.function` with all inputs as an
/// object.
pub fn function() -> NodeDescriptor {
    NodeDescriptor::new("function")
        .with_description("Invokes the host function named by `function`")
        .with_input(Shape::open())
        .with_output(Shape::empty().with(DEFAULT_OUTPUT, ValueKind::Any))
        .with_invoke(|inputs, ctx| async move {
            let name = ctx
                .data_str("function")
                .ok_or_else(|| {
                    ConductorError::node(ctx.node_id.as_str(), "missing `function` in node data")
                })?
                .to_string();
            let functions = ctx.services.functions()?;
            let argument = Value::Object(inputs.into_iter().collect());
            debug!(node_id = %ctx.node_id, function = %name, "Calling host function");
            let result = functions.invoke(&name, argument).await?;
            Ok(output(DEFAULT_OUTPUT, result))
        })
}

/// Completion from the injected language-model service.
pub fn gpt() -> NodeDescriptor {
    NodeDescriptor::new("gpt")
        .with_description("Sends `prompt` (and optional `system`) to the language model")
        .with_input(
            Shape::empty()
                .with("prompt", ValueKind::Any)
                .with_optional("system", ValueKind::String),
        )
        .with_output(
            Shape::empty()
                .with("text", ValueKind::String)
                .with_optional("tokens", ValueKind::Number),
        )
        .with_invoke(|inputs, ctx| async move {
            let gpt = ctx.services.gpt()?;
            let request = GptRequest {
                prompt: display(required(&inputs, "prompt", &ctx)?),
                system_prompt: inputs
                    .get("system")
                    .and_then(|v| v.as_str())
                    .map(String::from),
                model: ctx.data_str("model").map(String::from),
            };
            debug!(node_id = %ctx.node_id, prompt_len = request.prompt.len(), "Requesting completion");
            let response = gpt.generate(request).await?;
            let mut out = output("text", json!(response.text));
            if let Some(tokens) = response.tokens {
                out.insert("tokens".into(), json!(tokens));
            }
            Ok(out)
        })
}
