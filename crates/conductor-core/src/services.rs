use std::sync::Arc;

use crate::error::{ConductorError, Result};
use crate::traits::{FunctionService, GptService};

/// External collaborators handed to a graph when it opens.
///
/// Cloning is cheap; every field is shared.
#[derive(Clone, Default)]
pub struct ServiceContainer {
    gpt: Option<Arc<dyn GptService>>,
    functions: Option<Arc<dyn FunctionService>>,
}

impl ServiceContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gpt(mut self, gpt: Arc<dyn GptService>) -> Self {
        self.gpt = Some(gpt);
        self
    }

    pub fn with_functions(mut self, functions: Arc<dyn FunctionService>) -> Self {
        self.functions = Some(functions);
        self
    }

    pub fn gpt(&self) -> Result<Arc<dyn GptService>> {
        self.gpt
            .clone()
            .ok_or_else(|| ConductorError::ServiceUnavailable("gpt".into()))
    }

    pub fn functions(&self) -> Result<Arc<dyn FunctionService>> {
        self.functions
            .clone()
            .ok_or_else(|| ConductorError::ServiceUnavailable("functions".into()))
    }
}

impl std::fmt::Debug for ServiceContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContainer")
            .field("gpt", &self.gpt.is_some())
            .field("functions", &self.functions.is_some())
            .finish()
    }
}
