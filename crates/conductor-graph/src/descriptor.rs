use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use conductor_core::error::Result;
use conductor_core::shape::Shape;
use conductor_core::types::{NodeId, Value, ValueMap};
use conductor_core::ServiceContainer;

use crate::forced::Emitter;

/// Node computation: current inputs in, produced outputs out.
pub type InvokeFn =
    Arc<dyn Fn(ValueMap, InvokeContext) -> BoxFuture<'static, Result<ValueMap>> + Send + Sync>;

/// Hook run when a node becomes live in an open graph.
pub type OpenFn = Arc<dyn Fn(&mut OpenContext) -> Result<()> + Send + Sync>;

/// Teardown registered by an `on_open` hook.
pub type Disposer = Box<dyn FnOnce() + Send>;

/// Everything an invocation may look at besides its inputs.
#[derive(Debug, Clone)]
pub struct InvokeContext {
    pub node_id: NodeId,
    /// Per-instance configuration from the node record.
    pub data: Value,
    pub services: ServiceContainer,
    /// Cancelled when the graph closes.
    pub cancel: CancellationToken,
}

impl InvokeContext {
    /// Read a string field from the node data.
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }
}

/// Context handed to `on_open` hooks.
///
/// Hooks push values through the [`Emitter`], tie background work to the
/// cancellation token, and register teardown with [`OpenContext::on_dispose`].
pub struct OpenContext {
    node_id: NodeId,
    data: Value,
    services: ServiceContainer,
    cancel: CancellationToken,
    emitter: Emitter,
    disposers: Vec<Disposer>,
}

impl OpenContext {
    pub(crate) fn new(
        node_id: NodeId,
        data: Value,
        services: ServiceContainer,
        cancel: CancellationToken,
        emitter: Emitter,
    ) -> Self {
        Self {
            node_id,
            data,
            services,
            cancel,
            emitter,
            disposers: vec![],
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn services(&self) -> &ServiceContainer {
        &self.services
    }

    /// Token cancelled when the node is removed or the graph closes.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn emitter(&self) -> Emitter {
        self.emitter.clone()
    }

    /// Register teardown; disposers run in reverse registration order.
    pub fn on_dispose(&mut self, disposer: impl FnOnce() + Send + 'static) {
        self.disposers.push(Box::new(disposer));
    }

    pub(crate) fn into_disposers(self) -> Vec<Disposer> {
        self.disposers
    }
}

/// Immutable definition of a node type.
#[derive(Clone)]
pub struct NodeDescriptor {
    /// Registry tag, e.g. `"and"` or `"timer"`.
    pub kind: String,
    pub description: String,
    pub input: Shape,
    pub output: Shape,
    /// Absent for pure sources and sinks.
    pub invoke: Option<InvokeFn>,
    pub on_open: Option<OpenFn>,
    /// Seed this node in the initial pass after the graph opens.
    pub auto_trigger: bool,
}

impl NodeDescriptor {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            description: String::new(),
            input: Shape::empty(),
            output: Shape::empty(),
            invoke: None,
            on_open: None,
            auto_trigger: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_input(mut self, input: Shape) -> Self {
        self.input = input;
        self
    }

    pub fn with_output(mut self, output: Shape) -> Self {
        self.output = output;
        self
    }

    /// Set an asynchronous invoke function.
    pub fn with_invoke<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ValueMap, InvokeContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ValueMap>> + Send + 'static,
    {
        let invoke: InvokeFn = Arc::new(
            move |inputs: ValueMap, ctx: InvokeContext| -> BoxFuture<'static, Result<ValueMap>> {
                Box::pin(f(inputs, ctx))
            },
        );
        self.invoke = Some(invoke);
        self
    }

    /// Set an invoke function that completes without awaiting.
    pub fn with_sync_invoke<F>(mut self, f: F) -> Self
    where
        F: Fn(ValueMap, &InvokeContext) -> Result<ValueMap> + Send + Sync + 'static,
    {
        let invoke: InvokeFn = Arc::new(
            move |inputs: ValueMap, ctx: InvokeContext| -> BoxFuture<'static, Result<ValueMap>> {
                let result = f(inputs, &ctx);
                Box::pin(futures::future::ready(result))
            },
        );
        self.invoke = Some(invoke);
        self
    }

    pub fn with_on_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut OpenContext) -> Result<()> + Send + Sync + 'static,
    {
        self.on_open = Some(Arc::new(f));
        self
    }

    pub fn auto_trigger(mut self) -> Self {
        self.auto_trigger = true;
        self
    }

    /// A node without inputs that produces values.
    pub fn is_source(&self) -> bool {
        self.input.is_empty() && !self.output.is_empty()
    }

    /// A node without outputs.
    pub fn is_sink(&self) -> bool {
        self.output.is_empty()
    }
}

impl std::fmt::Debug for NodeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeDescriptor")
            .field("kind", &self.kind)
            .field("input", &self.input)
            .field("output", &self.output)
            .field("invoke", &self.invoke.is_some())
            .field("on_open", &self.on_open.is_some())
            .field("auto_trigger", &self.auto_trigger)
            .finish()
    }
}

/// Build a single-property output map.
pub fn output(property: impl Into<String>, value: Value) -> ValueMap {
    let mut map = ValueMap::new();
    map.insert(property.into(), value);
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::shape::ValueKind;
    use conductor_core::types::DEFAULT_OUTPUT;
    use serde_json::json;

    fn ctx() -> InvokeContext {
        InvokeContext {
            node_id: NodeId::from("n"),
            data: json!({"value": 7}),
            services: ServiceContainer::new(),
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn test_builder() {
        let desc = NodeDescriptor::new("constant")
            .with_description("Emits its configured value")
            .with_output(Shape::empty().with(DEFAULT_OUTPUT, ValueKind::Any))
            .auto_trigger();

        assert_eq!(desc.kind, "constant");
        assert!(desc.auto_trigger);
        assert!(desc.is_source());
        assert!(!desc.is_sink());
        assert!(desc.invoke.is_none());
    }

    #[tokio::test]
    async fn test_sync_invoke_reads_data() {
        let desc = NodeDescriptor::new("constant").with_sync_invoke(|_, ctx| {
            Ok(output(DEFAULT_OUTPUT, ctx.data["value"].clone()))
        });
        let invoke = desc.invoke.unwrap();
        let out = invoke(ValueMap::new(), ctx()).await.unwrap();
        assert_eq!(out[DEFAULT_OUTPUT], json!(7));
    }

    #[tokio::test]
    async fn test_async_invoke() {
        let desc = NodeDescriptor::new("echo").with_invoke(|inputs, _ctx| async move {
            Ok(output("echo", json!(inputs.len())))
        });
        let mut inputs = ValueMap::new();
        inputs.insert("x".into(), json!(1));
        let out = (desc.invoke.unwrap())(inputs, ctx()).await.unwrap();
        assert_eq!(out["echo"], json!(1));
    }
}
