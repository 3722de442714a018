//! Nodes that produce values without inputs.

use std::time::Duration;

use rand::Rng;
use serde_json::json;
use tracing::{debug, trace};

use conductor_core::error::ConductorError;
use conductor_core::shape::{Shape, ValueKind};
use conductor_core::types::{is_truthy, Value, DEFAULT_INPUT, DEFAULT_OUTPUT};

use crate::descriptor::{output, NodeDescriptor};

const DEFAULT_INTERVAL_MS: u64 = 1000;

fn result(kind: ValueKind) -> Shape {
    Shape::empty().with(DEFAULT_OUTPUT, kind)
}

/// Emits `data.value` once the graph opens.
pub fn constant() -> NodeDescriptor {
    NodeDescriptor::new("constant")
        .with_description("Emits the configured `value`")
        .with_output(result(ValueKind::Any))
        .with_sync_invoke(|_, ctx| {
            let value = ctx.data.get("value").cloned().unwrap_or(Value::Null);
            Ok(output(DEFAULT_OUTPUT, value))
        })
        .auto_trigger()
}

/// Boolean toggle; the host flips it by forcing `result`.
pub fn switch() -> NodeDescriptor {
    NodeDescriptor::new("switch")
        .with_description("Boolean toggle, initially `value` (default false)")
        .with_output(result(ValueKind::Boolean))
        .with_sync_invoke(|_, ctx| {
            let on = ctx.data.get("value").is_some_and(is_truthy);
            Ok(output(DEFAULT_OUTPUT, json!(on)))
        })
        .auto_trigger()
}

/// Uniform random number in `[min, max)`, regenerated whenever `input` changes.
pub fn rng() -> NodeDescriptor {
    NodeDescriptor::new("rng")
        .with_description("Random number in [min, max), re-rolled when `input` changes")
        .with_input(Shape::empty().with_optional(DEFAULT_INPUT, ValueKind::Any))
        .with_output(result(ValueKind::Number))
        .with_sync_invoke(|_, ctx| {
            let min = ctx.data.get("min").and_then(|v| v.as_f64()).unwrap_or(0.0);
            let max = ctx.data.get("max").and_then(|v| v.as_f64()).unwrap_or(1.0);
            if max <= min {
                return Err(ConductorError::node(
                    ctx.node_id.as_str(),
                    format!("empty range [{}, {})", min, max),
                ));
            }
            let value = rand::thread_rng().gen_range(min..max);
            Ok(output(DEFAULT_OUTPUT, json!(value)))
        })
        .auto_trigger()
}

/// Text fed by the host through forced outputs.
pub fn chat() -> NodeDescriptor {
    NodeDescriptor::new("chat")
        .with_description("Host-fed text source")
        .with_output(result(ValueKind::String))
        .auto_trigger()
}

/// Transcribed speech fed by the host through forced outputs.
pub fn audio() -> NodeDescriptor {
    NodeDescriptor::new("audio")
        .with_description("Host-fed transcript source")
        .with_output(result(ValueKind::String))
        .auto_trigger()
}

/// Emits an increasing tick count every `intervalMs` while the graph is open.
pub fn timer() -> NodeDescriptor {
    NodeDescriptor::new("timer")
        .with_description("Emits a tick count every `intervalMs` (default 1000)")
        .with_output(result(ValueKind::Number))
        .with_on_open(|ctx| {
            let interval_ms = ctx
                .data()
                .get("intervalMs")
                .and_then(|v| v.as_u64())
                .unwrap_or(DEFAULT_INTERVAL_MS)
                .max(1);
            let handle = tokio::runtime::Handle::try_current().map_err(|e| {
                ConductorError::node(ctx.node_id().as_str(), format!("no async runtime: {}", e))
            })?;

            let emitter = ctx.emitter();
            let cancel = ctx.cancel_token();
            debug!(node_id = %ctx.node_id(), interval_ms, "Timer started");
            let task = handle.spawn(async move {
                let period = Duration::from_millis(interval_ms);
                let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                let mut count: u64 = 0;
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            count += 1;
                            trace!(node_id = %emitter.node_id(), count, "Timer tick");
                            emitter.emit_result(json!(count));
                        }
                    }
                }
            });
            ctx.on_dispose(move || task.abort());
            Ok(())
        })
}
