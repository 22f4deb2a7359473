//! ModelInvoker trait definition.
//!
//! The model-invocation collaborator used by `llm_call` steps: prompt, model
//! id and provider in, text and token usage out. Implementations own their
//! network timeouts and honor the retry policy carried by the request.
//!
//! Implementations live in agentrace-infra (e.g., `OpenAiCompatInvoker`).

use agentrace_types::error::CollaboratorError;
use agentrace_types::llm::{ModelRequest, ModelResponse};

/// Trait for model invocation backends.
///
/// Uses native async fn in traits (RPITIT, Rust 2024 edition). Wrap in
/// [`BoxModelInvoker`](super::box_invoker::BoxModelInvoker) for dynamic dispatch.
pub trait ModelInvoker: Send + Sync {
    /// Human-readable backend name (e.g., "openai").
    fn name(&self) -> &str;

    /// Send a completion request and receive the full response.
    fn invoke(
        &self,
        request: &ModelRequest,
    ) -> impl std::future::Future<Output = Result<ModelResponse, CollaboratorError>> + Send;
}
