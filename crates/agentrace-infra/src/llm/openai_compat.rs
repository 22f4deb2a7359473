//! Model invoker for any OpenAI-compatible chat completions endpoint.
//!
//! One [`OpenAiCompatInvoker`] serves OpenAI, Gemini's compatibility
//! endpoint, Mistral or a local server, selected by base URL. The request
//! is non-streaming; usage comes from the `usage` block of the response.

use std::time::Duration;

use agentrace_core::llm::ModelInvoker;
use agentrace_types::error::CollaboratorError;
use agentrace_types::llm::{ModelRequest, ModelResponse, TokenUsage};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::retry::with_retry;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

/// OpenAI-compatible model invoker.
///
/// The API key is a [`SecretString`] and is only exposed when building the
/// `Authorization` header. The struct does not derive Debug.
pub struct OpenAiCompatInvoker {
    client: reqwest::Client,
    provider_name: String,
    base_url: String,
    api_key: Option<SecretString>,
    timeout: Duration,
}

impl OpenAiCompatInvoker {
    pub fn new(provider_name: impl Into<String>, base_url: impl Into<String>, api_key: Option<SecretString>) -> Self {
        Self {
            client: reqwest::Client::new(),
            provider_name: provider_name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            timeout: Duration::from_secs(300),
        }
    }

    pub fn openai(api_key: SecretString) -> Self {
        Self::new("openai", OPENAI_BASE_URL, Some(api_key))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn build_request<'a>(request: &'a ModelRequest) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });

        ChatRequest {
            model: &request.model,
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        }
    }

    async fn send_once(&self, body: &ChatRequest<'_>) -> Result<ChatResponse, CollaboratorError> {
        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .timeout(self.timeout)
            .json(body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                CollaboratorError::Timeout {
                    secs: self.timeout.as_secs(),
                }
            } else {
                CollaboratorError::Transport(format!("HTTP request failed: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<ChatResponse>()
            .await
            .map_err(|e| CollaboratorError::InvalidResponse(format!("failed to parse response: {e}")))
    }
}

fn into_model_response(
    response: ChatResponse,
    requested_model: &str,
    attempts: u32,
) -> Result<ModelResponse, CollaboratorError> {
    let text = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| CollaboratorError::InvalidResponse("response has no choices".to_string()))?
        .message
        .content
        .unwrap_or_default();

    let usage = response
        .usage
        .map(|u| TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        })
        .unwrap_or_default();

    let model = if response.model.is_empty() {
        requested_model.to_string()
    } else {
        response.model
    };

    Ok(ModelResponse {
        text,
        model,
        usage,
        attempts,
    })
}

impl ModelInvoker for OpenAiCompatInvoker {
    fn name(&self) -> &str {
        &self.provider_name
    }

    async fn invoke(&self, request: &ModelRequest) -> Result<ModelResponse, CollaboratorError> {
        let body = Self::build_request(request);
        let (response, attempts) =
            with_retry(request.retry_policy.as_ref(), &self.provider_name, || self.send_once(&body)).await?;
        into_model_response(response, &request.model, attempts)
    }
}
