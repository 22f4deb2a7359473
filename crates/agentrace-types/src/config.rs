//! Engine configuration types.
//!
//! `EngineConfig` represents the top-level `config.toml` that controls
//! cache lifetimes, persistence TTLs, default batch size, quota limits
//! and provider pricing overrides.

use serde::{Deserialize, Serialize};

const DAY_SECS: u64 = 24 * 60 * 60;

/// Top-level configuration for the trace orchestrator.
///
/// Loaded from `~/.agentrace/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Lifetime of a step cache entry in seconds.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Interval between step cache sweeps in seconds.
    #[serde(default = "default_cache_sweep_interval_secs")]
    pub cache_sweep_interval_secs: u64,

    /// Batch size used when a template does not set `parallelism`.
    #[serde(default = "default_parallelism")]
    pub default_parallelism: u32,

    #[serde(default = "default_template_ttl_secs")]
    pub template_ttl_secs: u64,

    #[serde(default = "default_execution_ttl_secs")]
    pub execution_ttl_secs: u64,

    #[serde(default = "default_checkpoint_ttl_secs")]
    pub checkpoint_ttl_secs: u64,

    /// Capacity of the lifecycle event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// `max_tokens` assumed for `llm_call` steps that don't set one.
    #[serde(default = "default_llm_max_tokens")]
    pub default_llm_max_tokens: u32,

    /// Per-owner usage limits for the built-in quota gate.
    #[serde(default)]
    pub quota: QuotaLimits,

    /// Pricing overrides for cost estimation per provider/model.
    #[serde(default)]
    pub provider_pricing: Vec<ProviderPricing>,

    /// OpenAI-compatible endpoint serving `llm_call` steps.
    #[serde(default)]
    pub model_endpoint: ModelEndpointConfig,
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

fn default_cache_sweep_interval_secs() -> u64 {
    300
}

fn default_parallelism() -> u32 {
    1
}

fn default_template_ttl_secs() -> u64 {
    30 * DAY_SECS
}

fn default_execution_ttl_secs() -> u64 {
    30 * DAY_SECS
}

fn default_checkpoint_ttl_secs() -> u64 {
    7 * DAY_SECS
}

fn default_event_capacity() -> usize {
    1024
}

fn default_llm_max_tokens() -> u32 {
    1024
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_sweep_interval_secs: default_cache_sweep_interval_secs(),
            default_parallelism: default_parallelism(),
            template_ttl_secs: default_template_ttl_secs(),
            execution_ttl_secs: default_execution_ttl_secs(),
            checkpoint_ttl_secs: default_checkpoint_ttl_secs(),
            event_capacity: default_event_capacity(),
            default_llm_max_tokens: default_llm_max_tokens(),
            quota: QuotaLimits::default(),
            provider_pricing: Vec::new(),
            model_endpoint: ModelEndpointConfig::default(),
        }
    }
}

/// Where `llm_call` steps are sent. The key itself is read from the
/// environment variable named by `api_key_env`, never from the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEndpointConfig {
    #[serde(default = "default_endpoint_provider")]
    pub provider_name: String,
    #[serde(default = "default_endpoint_base_url")]
    pub base_url: String,
    #[serde(default = "default_endpoint_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_endpoint_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_endpoint_provider() -> String {
    "openai".to_string()
}

fn default_endpoint_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_endpoint_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_endpoint_timeout_secs() -> u64 {
    300
}

impl Default for ModelEndpointConfig {
    fn default() -> Self {
        Self {
            provider_name: default_endpoint_provider(),
            base_url: default_endpoint_base_url(),
            api_key_env: default_endpoint_api_key_env(),
            timeout_secs: default_endpoint_timeout_secs(),
        }
    }
}

/// Per-owner limits. `None` means unlimited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executions_per_period: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_period: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_per_period: Option<u64>,
}

/// Cost information for a specific provider/model pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderPricing {
    /// Name of the provider (e.g., "anthropic", "openai").
    pub provider_name: String,
    /// Glob-like pattern for matching model names (e.g., "gpt-4o*").
    pub model_pattern: String,
    /// Cost per million input tokens in USD.
    pub input_cost_per_million: f64,
    /// Cost per million output tokens in USD.
    pub output_cost_per_million: f64,
}
