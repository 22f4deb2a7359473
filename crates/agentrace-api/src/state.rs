//! Application state: the one orchestrator built at process start.
//!
//! The orchestrator is generic over persistence and quota gate; AppState
//! pins it to SQLite persistence and the in-memory gate.

use std::sync::Arc;
use std::time::Duration;

use agentrace_core::event::LoggingObserver;
use agentrace_core::http::BoxHttpCaller;
use agentrace_core::llm::{BoxModelInvoker, UnconfiguredInvoker};
use agentrace_core::quota::InMemoryQuotaGate;
use agentrace_core::trace::{FunctionRegistry, StepCollaborators, TraceOrchestrator};
use agentrace_infra::config::{data_dir, load_engine_config};
use agentrace_infra::http::ReqwestHttpCaller;
use agentrace_infra::llm::{OpenAiCompatInvoker, TablePricing};
use agentrace_infra::llm::openai_compat::OPENAI_BASE_URL;
use agentrace_infra::sqlite::pool::database_url;
use agentrace_infra::sqlite::{DatabasePool, SqlitePersistence};
use agentrace_types::config::ModelEndpointConfig;
use secrecy::SecretString;

pub type Orchestrator = TraceOrchestrator<SqlitePersistence, InMemoryQuotaGate>;

pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    /// Open the database, load config and wire the orchestrator.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = data_dir();
        tokio::fs::create_dir_all(&data_dir).await?;

        let config = load_engine_config(&data_dir).await;

        let db_url = format!("{}?mode=rwc", database_url(&data_dir));
        let persistence = SqlitePersistence::new(DatabasePool::new(&db_url).await?);
        match persistence.purge_expired().await {
            Ok(0) => {}
            Ok(purged) => tracing::debug!(purged, "purged expired persistence entries"),
            Err(e) => tracing::warn!(warning = "persistence", error = %e, "expiry purge failed"),
        }

        let collaborators = StepCollaborators {
            model: model_invoker(&config.model_endpoint),
            pricing: Arc::new(TablePricing::new(config.provider_pricing.clone())),
            http: BoxHttpCaller::new(ReqwestHttpCaller::new()),
            functions: Arc::new(FunctionRegistry::with_builtins()),
        };
        let quota = InMemoryQuotaGate::new(config.quota.clone());

        let orchestrator = TraceOrchestrator::new(
            config,
            Arc::new(persistence),
            Arc::new(quota),
            collaborators,
        );
        orchestrator.events().add_observer(Arc::new(LoggingObserver));
        // Detached; stops when the orchestrator is dropped.
        let _sweeper = orchestrator.start_cache_sweeper();

        Ok(Self {
            orchestrator: Arc::new(orchestrator),
        })
    }
}

/// Build the invoker for `llm_call` steps.
///
/// The key comes from the environment variable the config names. Without
/// a key, the public OpenAI endpoint is left unconfigured; any other base
/// URL (a local server) is used unauthenticated.
fn model_invoker(endpoint: &ModelEndpointConfig) -> BoxModelInvoker {
    let api_key = std::env::var(&endpoint.api_key_env)
        .ok()
        .filter(|key| !key.is_empty())
        .map(SecretString::from);

    if api_key.is_none() && endpoint.base_url.trim_end_matches('/') == OPENAI_BASE_URL {
        tracing::debug!(
            env = endpoint.api_key_env.as_str(),
            "no model API key set, llm_call steps will fail"
        );
        return BoxModelInvoker::new(UnconfiguredInvoker);
    }

    let invoker = OpenAiCompatInvoker::new(
        endpoint.provider_name.clone(),
        endpoint.base_url.clone(),
        api_key,
    )
    .with_timeout(Duration::from_secs(endpoint.timeout_secs));
    BoxModelInvoker::new(invoker)
}
