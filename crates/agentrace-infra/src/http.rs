//! Outbound HTTP for `api_call` steps, backed by reqwest.

use std::time::Duration;

use agentrace_core::http::{HttpCaller, HttpRequest, HttpResponse};
use agentrace_types::error::CollaboratorError;
use reqwest::Method;
use serde_json::Value;

use crate::retry::with_retry;

/// Response bodies are cut to this many bytes in error messages.
const ERROR_BODY_LIMIT: usize = 512;

/// [`HttpCaller`] over a shared `reqwest::Client`.
///
/// Enforces the per-request timeout and retries transport errors, 429 and
/// 5xx responses according to the request's retry policy.
#[derive(Debug, Clone, Default)]
pub struct ReqwestHttpCaller {
    client: reqwest::Client,
}

impl ReqwestHttpCaller {
    pub fn new() -> Self {
        Self::default()
    }

    async fn send_once(&self, method: &Method, request: &HttpRequest) -> Result<HttpResponse, CollaboratorError> {
        let mut builder = self
            .client
            .request(method.clone(), &request.url)
            .timeout(Duration::from_secs(request.timeout_secs));
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, request.timeout_secs))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| map_reqwest_error(e, request.timeout_secs))?;

        if !(200..300).contains(&status) {
            return Err(CollaboratorError::Status {
                status,
                body: truncate(&text, ERROR_BODY_LIMIT),
            });
        }

        Ok(HttpResponse {
            status,
            body: parse_body(&text),
            attempts: 1,
        })
    }
}

fn map_reqwest_error(e: reqwest::Error, timeout_secs: u64) -> CollaboratorError {
    if e.is_timeout() {
        CollaboratorError::Timeout { secs: timeout_secs }
    } else {
        CollaboratorError::Transport(e.to_string())
    }
}

/// JSON when the body parses as JSON, a string otherwise, null when empty.
fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

impl HttpCaller for ReqwestHttpCaller {
    async fn call(&self, request: &HttpRequest) -> Result<HttpResponse, CollaboratorError> {
        let method = Method::from_bytes(request.method.to_uppercase().as_bytes())
            .map_err(|_| CollaboratorError::Provider(format!("invalid HTTP method '{}'", request.method)))?;

        tracing::debug!(method = %method, url = request.url.as_str(), "outbound api call");
        let (mut response, attempts) =
            with_retry(request.retry_policy.as_ref(), &request.url, || self.send_once(&method, request)).await?;
        response.attempts = attempts;
        Ok(response)
    }
}
