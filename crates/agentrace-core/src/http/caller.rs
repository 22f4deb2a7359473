//! HttpCaller trait and its object-safe wrapper.
//!
//! Implementations enforce the request timeout and honor the retry policy.
//! A non-2xx final status is returned as `CollaboratorError::Status`.
//! The reqwest implementation lives in agentrace-infra.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use agentrace_types::error::CollaboratorError;
use agentrace_types::trace::RetryPolicy;
use serde_json::Value;

/// Outbound HTTP request built from an `api_call` step.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
    pub timeout_secs: u64,
    pub retry_policy: Option<RetryPolicy>,
}

/// Successful (2xx) response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// Parsed JSON body, or a JSON string when the body is not JSON.
    pub body: Value,
    /// Number of attempts made, including the successful one.
    pub attempts: u32,
}

/// Trait for outbound HTTP backends.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
pub trait HttpCaller: Send + Sync {
    fn call(
        &self,
        request: &HttpRequest,
    ) -> impl std::future::Future<Output = Result<HttpResponse, CollaboratorError>> + Send;
}

/// Object-safe version of [`HttpCaller`] with boxed futures.
pub trait HttpCallerDyn: Send + Sync {
    fn call_boxed<'a>(
        &'a self,
        request: &'a HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, CollaboratorError>> + Send + 'a>>;
}

impl<T: HttpCaller> HttpCallerDyn for T {
    fn call_boxed<'a>(
        &'a self,
        request: &'a HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, CollaboratorError>> + Send + 'a>> {
        Box::pin(self.call(request))
    }
}

/// Type-erased HTTP caller.
pub struct BoxHttpCaller {
    inner: Box<dyn HttpCallerDyn + Send + Sync>,
}

impl BoxHttpCaller {
    pub fn new<T: HttpCaller + 'static>(caller: T) -> Self {
        Self {
            inner: Box::new(caller),
        }
    }

    pub async fn call(&self, request: &HttpRequest) -> Result<HttpResponse, CollaboratorError> {
        self.inner.call_boxed(request).await
    }
}

impl std::fmt::Debug for BoxHttpCaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxHttpCaller").finish_non_exhaustive()
    }
}

/// Caller used when outbound HTTP is not wired: every call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledHttpCaller;

impl HttpCaller for DisabledHttpCaller {
    async fn call(&self, request: &HttpRequest) -> Result<HttpResponse, CollaboratorError> {
        Err(CollaboratorError::Transport(format!(
            "outbound HTTP disabled ({} {})",
            request.method, request.url
        )))
    }
}
