//! `TraceOrchestrator`: the public surface of the trace engine.
//!
//! Built once at process start and passed by reference. Owns the template
//! store, the step cache and its sweeper, the event bus and the execution
//! engine, all wired to one persistence adapter and one quota gate.

use std::sync::Arc;
use std::time::Duration;

use agentrace_types::config::EngineConfig;
use agentrace_types::metrics::{ExecutionMetrics, TimeRange};
use agentrace_types::trace::{AgentTraceExecution, ExecuteOptions, WorkflowTemplate};
use chrono::Utc;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::EventBus;
use crate::quota::QuotaGate;
use crate::storage::PersistenceAdapter;

use super::cache::StepCache;
use super::engine::ExecutionEngine;
use super::error::TraceError;
use super::function::FunctionRegistry;
use super::metrics::compute_metrics;
use super::step_executor::{StepCollaborators, StepExecutor};
use super::store::TemplateStore;

pub struct TraceOrchestrator<P: PersistenceAdapter, Q: QuotaGate> {
    config: EngineConfig,
    templates: Arc<TemplateStore<P>>,
    engine: ExecutionEngine<P, Q>,
    cache: Arc<StepCache>,
    functions: Arc<FunctionRegistry>,
    shutdown: CancellationToken,
}

impl<P, Q> TraceOrchestrator<P, Q>
where
    P: PersistenceAdapter + 'static,
    Q: QuotaGate + 'static,
{
    pub fn new(
        config: EngineConfig,
        persistence: Arc<P>,
        quota: Arc<Q>,
        collaborators: StepCollaborators,
    ) -> Self {
        let cache = Arc::new(StepCache::new(Duration::from_secs(config.cache_ttl_secs)));
        let functions = Arc::clone(&collaborators.functions);
        let executor = Arc::new(StepExecutor::new(
            collaborators,
            Arc::clone(&cache),
            config.default_llm_max_tokens,
        ));
        let templates = Arc::new(TemplateStore::new(
            Arc::clone(&persistence),
            config.template_ttl_secs,
        ));
        let engine = ExecutionEngine::new(
            &config,
            persistence,
            Arc::clone(&templates),
            executor,
            quota,
            EventBus::new(config.event_capacity),
        );

        Self {
            config,
            templates,
            engine,
            cache,
            functions,
            shutdown: CancellationToken::new(),
        }
    }

    /// Start the periodic step cache sweep. Stops on [`Self::shutdown`].
    pub fn start_cache_sweeper(&self) -> JoinHandle<()> {
        let interval = Duration::from_secs(self.config.cache_sweep_interval_secs.max(1));
        self.cache.spawn_sweeper(interval, self.shutdown.child_token())
    }

    /// Stop background tasks owned by the orchestrator.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        self.engine.events()
    }

    pub fn functions(&self) -> &Arc<FunctionRegistry> {
        &self.functions
    }

    pub fn cache(&self) -> &Arc<StepCache> {
        &self.cache
    }

    pub fn engine(&self) -> &ExecutionEngine<P, Q> {
        &self.engine
    }

    // -----------------------------------------------------------------------
    // Templates
    // -----------------------------------------------------------------------

    pub async fn register_template(&self, template: WorkflowTemplate) -> Result<Arc<WorkflowTemplate>, TraceError> {
        self.templates.register(template).await
    }

    pub async fn get_template(&self, id: &Uuid) -> Result<Arc<WorkflowTemplate>, TraceError> {
        self.templates
            .get(id)
            .await
            .ok_or(TraceError::TemplateNotFound(*id))
    }

    pub async fn list_templates(&self, owner_id: &str) -> Vec<Arc<WorkflowTemplate>> {
        self.templates.list(owner_id).await
    }

    // -----------------------------------------------------------------------
    // Executions
    // -----------------------------------------------------------------------

    pub async fn execute_trace(
        &self,
        template_id: &Uuid,
        owner_id: &str,
        input: Value,
        options: ExecuteOptions,
    ) -> Result<AgentTraceExecution, TraceError> {
        self.engine
            .execute_trace(template_id, owner_id, input, options)
            .await
    }

    pub async fn get_execution(&self, id: &Uuid) -> Result<AgentTraceExecution, TraceError> {
        self.engine.get_execution(id).await
    }

    pub async fn pause(&self, id: &Uuid) -> Result<(), TraceError> {
        self.engine.pause(id).await
    }

    pub async fn resume(&self, id: &Uuid) -> Result<(), TraceError> {
        self.engine.resume(id).await
    }

    pub async fn cancel(&self, id: &Uuid) -> Result<(), TraceError> {
        self.engine.cancel(id).await
    }

    pub async fn wait_for_completion(&self, id: &Uuid) -> Result<AgentTraceExecution, TraceError> {
        self.engine.wait_for_completion(id).await
    }

    // -----------------------------------------------------------------------
    // Metrics
    // -----------------------------------------------------------------------

    /// Metrics over the persisted executions of one template.
    pub async fn get_metrics(
        &self,
        workflow_id: &Uuid,
        range: Option<TimeRange>,
    ) -> Result<ExecutionMetrics, TraceError> {
        let executions = self
            .engine
            .checkpoints()
            .load_all_executions()
            .await
            .map_err(|e| TraceError::Internal(format!("cannot load execution history: {e}")))?;
        Ok(compute_metrics(&executions, workflow_id, range, Utc::now()))
    }
}

impl<P: PersistenceAdapter, Q: QuotaGate> Drop for TraceOrchestrator<P, Q> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
