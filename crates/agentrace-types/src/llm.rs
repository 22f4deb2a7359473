//! Model invocation request/response types.
//!
//! These are the shapes exchanged with the model-invocation collaborator
//! for `llm_call` steps. Provider specifics stay behind the invoker.

use serde::{Deserialize, Serialize};

use crate::trace::RetryPolicy;

/// Request for a single model completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    pub model: String,
    pub provider: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Retry policy the invoker is expected to honor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
}

/// Completion returned by the model invoker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    pub text: String,
    /// Model that actually served the request.
    pub model: String,
    pub usage: TokenUsage,
    /// Number of attempts made, including the successful one.
    #[serde(default = "default_attempts")]
    pub attempts: u32,
}

fn default_attempts() -> u32 {
    1
}

/// Token usage reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        u64::from(self.input_tokens) + u64::from(self.output_tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_tokens_adds_both_directions() {
        let usage = TokenUsage {
            input_tokens: u32::MAX,
            output_tokens: 10,
        };
        assert_eq!(usage.total(), u64::from(u32::MAX) + 10);
    }

    #[test]
    fn response_attempts_default_to_one() {
        let resp: ModelResponse = serde_json::from_str(
            r#"{"text":"hi","model":"m","usage":{"input_tokens":1,"output_tokens":2}}"#,
        )
        .unwrap();
        assert_eq!(resp.attempts, 1);
        assert_eq!(resp.usage.total(), 3);
    }
}
