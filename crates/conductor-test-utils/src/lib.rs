//! Mocks, graph fixtures and event helpers shared by Conductor tests.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::broadcast;

use conductor_core::config::EngineConfig;
use conductor_core::error::{ConductorError, Result};
use conductor_core::shape::{Shape, ValueKind};
use conductor_core::traits::{FunctionService, GptRequest, GptResponse, GptService};
use conductor_core::types::{GraphEvent, Value, DEFAULT_INPUT, DEFAULT_OUTPUT};
use conductor_graph::descriptor::{output, NodeDescriptor};
use conductor_graph::record::GraphRecord;

// ── Graph fixtures ──────────────────────────────────────────────

/// `a:switch(false)`, `b:switch(true)`, `c:and`, `d:beacon`.
pub const AND_GATE: &str = r#"
[[nodes]]
id = "a"
type = "switch"
data = { value = false }

[[nodes]]
id = "b"
type = "switch"
data = { value = true }

[[nodes]]
id = "c"
type = "and"

[[nodes]]
id = "d"
type = "beacon"

[[edges]]
source = "a"
target = "c"
input = "a"

[[edges]]
source = "b"
target = "c"
input = "b"

[[edges]]
source = "c"
target = "d"
"#;

/// A timer feeding a text sink.
pub const TIMER_TEXT: &str = r#"
[[nodes]]
id = "tick"
type = "timer"
data = { intervalMs = 20 }

[[nodes]]
id = "out"
type = "text"

[[edges]]
source = "tick"
target = "out"
"#;

pub fn and_gate() -> GraphRecord {
    GraphRecord::from_toml_str(AND_GATE).expect("AND_GATE fixture parses")
}

/// Write `contents` to a file named `name` in a fresh temp dir.
///
/// The returned `TempDir` must be kept alive for the file to exist.
pub fn graph_file(name: &str, contents: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join(name);
    std::fs::write(&path, contents).expect("write graph file");
    (dir, path)
}

/// Engine settings with a short node timeout for tests.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        node_timeout_secs: 2,
        ..EngineConfig::default()
    }
}

// ── Descriptors ─────────────────────────────────────────────────

/// Pass-through node that counts its invocations.
pub fn counting_descriptor(kind: &str, counter: Arc<AtomicUsize>) -> NodeDescriptor {
    NodeDescriptor::new(kind)
        .with_input(Shape::empty().with(DEFAULT_INPUT, ValueKind::Any))
        .with_output(Shape::empty().with(DEFAULT_OUTPUT, ValueKind::Any))
        .with_sync_invoke(move |inputs, _ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            let value = inputs.get(DEFAULT_INPUT).cloned().unwrap_or(Value::Null);
            Ok(output(DEFAULT_OUTPUT, value))
        })
}

/// Node whose invoke always fails with `message`.
pub fn failing_descriptor(kind: &str, message: &str) -> NodeDescriptor {
    let message = message.to_string();
    NodeDescriptor::new(kind)
        .with_input(Shape::empty().with(DEFAULT_INPUT, ValueKind::Any))
        .with_output(Shape::empty().with(DEFAULT_OUTPUT, ValueKind::Any))
        .with_sync_invoke(move |_inputs, ctx| Err(ConductorError::node(ctx.node_id.to_string(), &message)))
}

/// Node that sleeps before passing its input through.
pub fn slow_descriptor(kind: &str, delay: Duration) -> NodeDescriptor {
    NodeDescriptor::new(kind)
        .with_input(Shape::empty().with(DEFAULT_INPUT, ValueKind::Any))
        .with_output(Shape::empty().with(DEFAULT_OUTPUT, ValueKind::Any))
        .with_invoke(move |inputs, _ctx| async move {
            tokio::time::sleep(delay).await;
            let value = inputs.get(DEFAULT_INPUT).cloned().unwrap_or(Value::Null);
            Ok(output(DEFAULT_OUTPUT, value))
        })
}

// ── Mock services ───────────────────────────────────────────────

/// Language-model mock: replays queued responses, then echoes the prompt.
#[derive(Default)]
pub struct MockGpt {
    responses: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<GptRequest>>,
}

impl MockGpt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, text: impl Into<String>) -> Self {
        self.responses.lock().unwrap().push_back(text.into());
        self
    }

    pub fn requests(&self) -> Vec<GptRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl GptService for MockGpt {
    fn generate(&self, request: GptRequest) -> BoxFuture<'_, Result<GptResponse>> {
        let text = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| format!("echo: {}", request.prompt));
        self.requests.lock().unwrap().push(request);
        Box::pin(async move {
            Ok(GptResponse {
                tokens: Some(text.split_whitespace().count() as u64),
                text,
            })
        })
    }
}

type MockFn = Box<dyn Fn(Value) -> Result<Value> + Send + Sync>;

/// Function-service mock dispatching by name to registered closures.
#[derive(Default)]
pub struct MockFunctions {
    functions: HashMap<String, MockFn>,
    calls: AtomicUsize,
}

impl MockFunctions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(
        mut self,
        name: &str,
        f: impl Fn(Value) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        self.functions.insert(name.to_string(), Box::new(f));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FunctionService for MockFunctions {
    fn invoke(&self, function: &str, input: Value) -> BoxFuture<'_, Result<Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let result = match self.functions.get(function) {
            Some(f) => f(input),
            None => Err(ConductorError::node(
                function,
                format!("no function named '{}'", function),
            )),
        };
        Box::pin(futures::future::ready(result))
    }
}

// ── Events ──────────────────────────────────────────────────────

/// Receive events until one matches `predicate` or `timeout` elapses.
pub async fn wait_for_event<F>(
    rx: &mut broadcast::Receiver<GraphEvent>,
    timeout: Duration,
    mut predicate: F,
) -> Option<GraphEvent>
where
    F: FnMut(&GraphEvent) -> bool,
{
    let search = async {
        loop {
            match rx.recv().await {
                Ok(event) if predicate(&event) => return Some(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    };
    tokio::time::timeout(timeout, search).await.ok().flatten()
}

/// Whether `event` is an output event for `node`.`property`.
pub fn is_output(event: &GraphEvent, node: &str, property: &str) -> bool {
    matches!(
        event,
        GraphEvent::Output { node_id, property: p, .. } if node_id.as_str() == node && p == property
    )
}
