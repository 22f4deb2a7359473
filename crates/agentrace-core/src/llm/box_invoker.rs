//! BoxModelInvoker -- object-safe dynamic dispatch wrapper for ModelInvoker.
//!
//! 1. `ModelInvokerDyn` is an object-safe trait with boxed futures
//! 2. Blanket-impl `ModelInvokerDyn` for all `T: ModelInvoker`
//! 3. `BoxModelInvoker` wraps `Box<dyn ModelInvokerDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use agentrace_types::error::CollaboratorError;
use agentrace_types::llm::{ModelRequest, ModelResponse};

use super::invoker::ModelInvoker;

/// Object-safe version of [`ModelInvoker`] with boxed futures.
pub trait ModelInvokerDyn: Send + Sync {
    fn name(&self) -> &str;

    fn invoke_boxed<'a>(
        &'a self,
        request: &'a ModelRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ModelResponse, CollaboratorError>> + Send + 'a>>;
}

impl<T: ModelInvoker> ModelInvokerDyn for T {
    fn name(&self) -> &str {
        ModelInvoker::name(self)
    }

    fn invoke_boxed<'a>(
        &'a self,
        request: &'a ModelRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ModelResponse, CollaboratorError>> + Send + 'a>> {
        Box::pin(self.invoke(request))
    }
}

/// Type-erased model invoker for runtime backend selection.
pub struct BoxModelInvoker {
    inner: Box<dyn ModelInvokerDyn + Send + Sync>,
}

impl BoxModelInvoker {
    /// Wrap a concrete `ModelInvoker` in a type-erased box.
    pub fn new<T: ModelInvoker + 'static>(invoker: T) -> Self {
        Self {
            inner: Box::new(invoker),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn invoke(&self, request: &ModelRequest) -> Result<ModelResponse, CollaboratorError> {
        self.inner.invoke_boxed(request).await
    }
}

impl std::fmt::Debug for BoxModelInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxModelInvoker")
            .field("name", &self.name())
            .finish()
    }
}

/// Invoker used when no model backend is configured: every call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredInvoker;

impl ModelInvoker for UnconfiguredInvoker {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn invoke(&self, request: &ModelRequest) -> Result<ModelResponse, CollaboratorError> {
        Err(CollaboratorError::Provider(format!(
            "no model invoker configured for provider '{}'",
            request.provider
        )))
    }
}
