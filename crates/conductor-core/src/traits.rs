use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::Value;

/// Request sent to a language-model backend by a `gpt` node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GptRequest {
    pub prompt: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

/// Response from a language-model backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GptResponse {
    pub text: String,
    #[serde(default)]
    pub tokens: Option<u64>,
}

/// Language-model backend, injected by the host at open time.
pub trait GptService: Send + Sync + 'static {
    /// Generate a completion for the request.
    fn generate(&self, request: GptRequest) -> BoxFuture<'_, Result<GptResponse>>;
}

/// Host function invocation backend used by `function` nodes.
pub trait FunctionService: Send + Sync + 'static {
    /// Invoke a named function with a JSON input.
    fn invoke(&self, function: &str, input: Value) -> BoxFuture<'_, Result<Value>>;
}
