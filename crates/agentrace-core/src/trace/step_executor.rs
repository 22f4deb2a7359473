//! Step executor: cache short-circuit plus dispatch to type-specific handlers.
//!
//! `StepExecutor` takes one `StepExecution`, consults the step cache, and
//! otherwise runs the handler for the step's kind. It never returns an
//! error: failures are recorded on the returned step.
//!
//! Step kinds: llm_call, data_processing, api_call, conditional, parallel, custom.

use std::sync::Arc;

use agentrace_types::llm::ModelRequest;
use agentrace_types::trace::{
    ApiCallConfig, CustomConfig, LlmCallConfig, ParallelConfig, RetryPolicy, StepCondition,
    StepConfig, StepExecution, StepRuntimeMetadata, StepStatus,
};
use chrono::Utc;
use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use serde_json::{Value, json};
use tokio::time::Instant;
use uuid::Uuid;

use crate::http::{BoxHttpCaller, HttpRequest};
use crate::llm::{BoxModelInvoker, PricingLookup};

use super::cache::StepCache;
use super::context::StepContext;
use super::error::StepError;
use super::expression::ConditionEvaluator;
use super::function::FunctionRegistry;
use super::transform;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Timeout handed to the HTTP caller when an api_call step sets none.
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 30;

/// Sub-task concurrency of a parallel step that sets none.
pub const DEFAULT_PARALLEL_CONCURRENCY: u32 = 4;

// ---------------------------------------------------------------------------
// Collaborators and run settings
// ---------------------------------------------------------------------------

/// The external collaborators step handlers delegate to.
pub struct StepCollaborators {
    pub model: BoxModelInvoker,
    pub pricing: Arc<dyn PricingLookup>,
    pub http: BoxHttpCaller,
    pub functions: Arc<FunctionRegistry>,
}

impl std::fmt::Debug for StepCollaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepCollaborators")
            .field("model", &self.model)
            .field("functions", &self.functions)
            .finish_non_exhaustive()
    }
}

/// Per-execution settings shared by every step dispatch of a run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub template_id: Uuid,
    pub variables: Value,
    pub caching_enabled: bool,
    pub retry_policy: Option<RetryPolicy>,
}

/// Output of a successful handler.
#[derive(Debug, Clone, Default)]
struct HandlerOutput {
    output: Value,
    metadata: StepRuntimeMetadata,
}

impl HandlerOutput {
    fn plain(output: Value) -> Self {
        Self {
            output,
            metadata: StepRuntimeMetadata::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// StepExecutor
// ---------------------------------------------------------------------------

/// Executes individual steps by dispatching to type-specific handlers.
#[derive(Debug)]
pub struct StepExecutor {
    collaborators: StepCollaborators,
    cache: Arc<StepCache>,
    evaluator: ConditionEvaluator,
    default_max_tokens: u32,
}

impl StepExecutor {
    pub fn new(collaborators: StepCollaborators, cache: Arc<StepCache>, default_max_tokens: u32) -> Self {
        Self {
            collaborators,
            cache,
            evaluator: ConditionEvaluator::new(),
            default_max_tokens,
        }
    }

    pub fn cache(&self) -> &Arc<StepCache> {
        &self.cache
    }

    pub fn functions(&self) -> &Arc<FunctionRegistry> {
        &self.collaborators.functions
    }

    /// Run one step and return it in a terminal state.
    ///
    /// The caller marks the step `running` (with its start time) first.
    pub async fn execute(&self, mut step: StepExecution, ctx: StepContext, run: &RunSettings) -> StepExecution {
        let input = ctx.step_input();
        step.input = Some(input.clone());
        if step.start_time.is_none() {
            step.start_time = Some(Utc::now());
        }

        let cache_key = run
            .caching_enabled
            .then(|| StepCache::key(&run.template_id, &step.id, &input, &run.variables));

        if let Some(key) = &cache_key {
            if let Some(hit) = self.cache.get(key) {
                tracing::debug!(
                    step_id = step.id.as_str(),
                    saved_cost = hit.cost,
                    saved_tokens = hit.tokens,
                    "step cache hit"
                );
                step.status = StepStatus::Completed;
                step.output = Some(hit.output);
                step.error = None;
                step.end_time = Some(Utc::now());
                step.duration_ms = Some(0);
                step.metadata = StepRuntimeMetadata {
                    cache_hit: Some(true),
                    latency_ms: Some(0),
                    ..StepRuntimeMetadata::default()
                };
                return step;
            }
        }

        let started = Instant::now();
        let result = self
            .dispatch(&step.config, step.condition.as_ref(), &ctx, run.retry_policy.as_ref())
            .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        step.end_time = Some(Utc::now());
        step.duration_ms = Some(elapsed_ms);

        match result {
            Ok(HandlerOutput { output, mut metadata }) => {
                metadata.latency_ms = Some(elapsed_ms);
                metadata.cache_hit = cache_key.as_ref().map(|_| false);
                if let Some(key) = cache_key {
                    self.cache
                        .put(key, output.clone(), metadata.cost, metadata.tokens);
                }
                step.status = StepStatus::Completed;
                step.output = Some(output);
                step.error = None;
                step.metadata = metadata;
            }
            Err(err) => {
                step.status = StepStatus::Failed;
                step.error = Some(err.to_string());
                step.metadata.latency_ms = Some(elapsed_ms);
            }
        }
        step
    }

    /// Dispatch a config to its handler. Boxed for parallel recursion.
    fn dispatch<'a>(
        &'a self,
        config: &'a StepConfig,
        condition: Option<&'a StepCondition>,
        ctx: &'a StepContext,
        retry: Option<&'a RetryPolicy>,
    ) -> BoxFuture<'a, Result<HandlerOutput, StepError>> {
        Box::pin(async move {
            match config {
                StepConfig::LlmCall(cfg) => self.run_llm(cfg, ctx, retry).await,
                StepConfig::DataProcessing(cfg) => {
                    transform::apply(&cfg.operation, &ctx.scope()).map(HandlerOutput::plain)
                }
                StepConfig::ApiCall(cfg) => self.run_api(cfg, ctx, retry).await,
                StepConfig::Conditional(cfg) => {
                    self.run_conditional(cfg.expression.as_deref(), condition, ctx)
                }
                StepConfig::Parallel(cfg) => self.run_parallel(cfg, ctx, retry).await,
                StepConfig::Custom(cfg) => self.run_custom(cfg, ctx).await,
            }
        })
    }

    // -----------------------------------------------------------------------
    // Handlers
    // -----------------------------------------------------------------------

    async fn run_llm(
        &self,
        cfg: &LlmCallConfig,
        ctx: &StepContext,
        retry: Option<&RetryPolicy>,
    ) -> Result<HandlerOutput, StepError> {
        let request = ModelRequest {
            model: cfg.model.clone(),
            provider: cfg.provider.clone(),
            prompt: ctx.resolve_template(&cfg.prompt),
            system: cfg.system.as_deref().map(|s| ctx.resolve_template(s)),
            max_tokens: cfg.max_tokens.unwrap_or(self.default_max_tokens),
            temperature: cfg.temperature,
            retry_policy: retry.cloned(),
        };

        let response = self.collaborators.model.invoke(&request).await?;
        let cost = self
            .collaborators
            .pricing
            .cost(&cfg.provider, &response.model, &response.usage);

        Ok(HandlerOutput {
            output: Value::String(response.text),
            metadata: StepRuntimeMetadata {
                model: Some(response.model),
                tokens: response.usage.total(),
                cost,
                retry_attempt: Some(response.attempts),
                ..StepRuntimeMetadata::default()
            },
        })
    }

    async fn run_api(
        &self,
        cfg: &ApiCallConfig,
        ctx: &StepContext,
        retry: Option<&RetryPolicy>,
    ) -> Result<HandlerOutput, StepError> {
        let request = HttpRequest {
            method: cfg.method.to_uppercase(),
            url: ctx.resolve_template(&cfg.endpoint),
            headers: cfg
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), ctx.resolve_template(v)))
                .collect(),
            body: cfg.body.as_ref().map(|b| ctx.resolve_value(b)),
            timeout_secs: cfg.timeout_secs.unwrap_or(DEFAULT_API_TIMEOUT_SECS),
            retry_policy: retry.cloned(),
        };

        let response = self.collaborators.http.call(&request).await?;
        if !(200..300).contains(&response.status) {
            return Err(StepError::Collaborator(
                agentrace_types::error::CollaboratorError::Status {
                    status: response.status,
                    body: response.body.to_string(),
                },
            ));
        }

        Ok(HandlerOutput {
            output: json!({ "status": response.status, "body": response.body }),
            metadata: StepRuntimeMetadata {
                retry_attempt: Some(response.attempts),
                ..StepRuntimeMetadata::default()
            },
        })
    }

    fn run_conditional(
        &self,
        expression: Option<&str>,
        condition: Option<&StepCondition>,
        ctx: &StepContext,
    ) -> Result<HandlerOutput, StepError> {
        let expression = expression
            .filter(|e| !e.trim().is_empty())
            .or_else(|| condition.map(|c| c.expression.as_str()).filter(|e| !e.trim().is_empty()))
            .ok_or_else(|| StepError::Expression("conditional step has no expression".to_string()))?;

        let condition_met = self
            .evaluator
            .evaluate_bool(expression, &ctx.scope())
            .map_err(|e| StepError::Expression(e.to_string()))?;

        let selected_step = condition.and_then(|c| {
            if condition_met {
                c.then_id.clone()
            } else {
                c.else_id.clone()
            }
        });

        Ok(HandlerOutput::plain(json!({
            "condition_met": condition_met,
            "selected_step": selected_step,
        })))
    }

    async fn run_parallel(
        &self,
        cfg: &ParallelConfig,
        ctx: &StepContext,
        retry: Option<&RetryPolicy>,
    ) -> Result<HandlerOutput, StepError> {
        let limit = cfg
            .max_concurrency
            .unwrap_or(DEFAULT_PARALLEL_CONCURRENCY)
            .max(1) as usize;

        // Futures are built up front so the stream holds no borrowing closure.
        let tasks: Vec<_> = cfg
            .tasks
            .iter()
            .map(|task| self.dispatch(&task.config, None, ctx, retry))
            .collect();
        let results: Vec<Result<HandlerOutput, StepError>> = futures_util::stream::iter(tasks)
            .buffered(limit)
            .collect()
            .await;

        let mut outputs = Vec::with_capacity(results.len());
        let mut metadata = StepRuntimeMetadata::default();
        for (task, result) in cfg.tasks.iter().zip(results) {
            let out = result.map_err(|source| StepError::ParallelTask {
                task: task.name.clone(),
                source: Box::new(source),
            })?;
            metadata.tokens += out.metadata.tokens;
            metadata.cost += out.metadata.cost;
            metadata.retry_attempt = metadata.retry_attempt.max(out.metadata.retry_attempt);
            if metadata.model.is_none() {
                metadata.model = out.metadata.model;
            }
            outputs.push(json!({ "name": task.name, "output": out.output }));
        }

        Ok(HandlerOutput {
            output: Value::Array(outputs),
            metadata,
        })
    }

    async fn run_custom(&self, cfg: &CustomConfig, ctx: &StepContext) -> Result<HandlerOutput, StepError> {
        let function = self
            .collaborators
            .functions
            .get(&cfg.function)
            .ok_or_else(|| StepError::UnknownFunction(cfg.function.clone()))?;
        let output = function
            .call(ctx.resolve_value(&cfg.args), ctx.step_input())
            .await?;
        Ok(HandlerOutput::plain(output))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use agentrace_types::trace::{
        ConditionalConfig, DataOperation, DataProcessingConfig, ParallelTask, StepTemplate,
    };
    use serde_json::Map;

    use crate::trace::testing::{self, StubHttp, StubInvoker};

    fn settings(caching: bool) -> RunSettings {
        RunSettings {
            template_id: Uuid::now_v7(),
            variables: json!({}),
            caching_enabled: caching,
            retry_policy: None,
        }
    }

    fn pending(config: StepConfig) -> StepExecution {
        StepExecution::pending(&StepTemplate {
            id: "s".into(),
            name: "s".into(),
            config,
            dependencies: vec![],
            condition: None,
            extensions: Map::new(),
        })
    }

    #[tokio::test]
    async fn llm_call_records_tokens_cost_and_attempts() {
        let invoker = StubInvoker::new();
        let calls = invoker.calls();
        let executor = testing::executor_with(invoker, StubHttp::ok(json!({})));
        let step = pending(testing::llm_config("Summarize {{ input.topic }}"));
        let ctx = StepContext::new(json!({"topic": "rust"}), json!({}), Map::new());

        let done = executor.execute(step, ctx, &settings(false)).await;

        assert_eq!(done.status, StepStatus::Completed);
        assert_eq!(done.output, Some(json!("echo: Summarize rust")));
        assert_eq!(done.metadata.tokens, 30);
        assert!((done.metadata.cost - 0.03).abs() < 1e-9);
        assert_eq!(done.metadata.retry_attempt, Some(1));
        assert_eq!(done.metadata.model.as_deref(), Some("stub-model"));
        assert_eq!(done.metadata.cache_hit, None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cache_hit_short_circuits_handler() {
        let invoker = StubInvoker::new();
        let calls = invoker.calls();
        let executor = testing::executor_with(invoker, StubHttp::ok(json!({})));
        let run = settings(true);
        let ctx = StepContext::new(json!({"topic": "rust"}), json!({}), Map::new());

        let first = executor
            .execute(pending(testing::llm_config("hi")), ctx.clone(), &run)
            .await;
        assert_eq!(first.metadata.cache_hit, Some(false));

        let second = executor
            .execute(pending(testing::llm_config("hi")), ctx.clone(), &run)
            .await;
        assert_eq!(second.status, StepStatus::Completed);
        assert_eq!(second.metadata.cache_hit, Some(true));
        assert_eq!(second.duration_ms, Some(0));
        assert_eq!(second.output, first.output);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(3601)).await;
        let third = executor
            .execute(pending(testing::llm_config("hi")), ctx, &run)
            .await;
        assert_eq!(third.metadata.cache_hit, Some(false));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_collaborator_marks_step_failed() {
        let executor = testing::executor_with(StubInvoker::failing(), StubHttp::ok(json!({})));
        let done = executor
            .execute(
                pending(testing::llm_config("hi")),
                StepContext::default(),
                &settings(true),
            )
            .await;
        assert_eq!(done.status, StepStatus::Failed);
        assert_eq!(done.error.as_deref(), Some("provider error: scripted failure"));
        assert!(done.output.is_none());
        assert!(executor.cache().is_empty());
    }

    #[tokio::test]
    async fn api_call_non_2xx_fails() {
        let executor = testing::executor_with(StubInvoker::new(), StubHttp::status(503));
        let step = pending(StepConfig::ApiCall(ApiCallConfig {
            endpoint: "https://example.test/{{ input.path }}".into(),
            method: "get".into(),
            headers: BTreeMap::new(),
            body: None,
            timeout_secs: None,
        }));
        let ctx = StepContext::new(json!({"path": "health"}), json!({}), Map::new());
        let done = executor.execute(step, ctx, &settings(false)).await;
        assert_eq!(done.status, StepStatus::Failed);
        assert!(done.error.unwrap().starts_with("HTTP 503"));
    }

    #[tokio::test]
    async fn api_call_resolves_endpoint_and_records_body() {
        let http = StubHttp::ok(json!({"ok": true}));
        let seen = http.requests();
        let executor = testing::executor_with(StubInvoker::new(), http);
        let step = pending(StepConfig::ApiCall(ApiCallConfig {
            endpoint: "https://example.test/{{ input.path }}".into(),
            method: "post".into(),
            headers: BTreeMap::from([("x-user".to_string(), "{{ variables.user }}".to_string())]),
            body: Some(json!({"n": "{{ input.n }}"})),
            timeout_secs: Some(5),
        }));
        let ctx = StepContext::new(json!({"path": "items", "n": 3}), json!({"user": "ada"}), Map::new());
        let done = executor.execute(step, ctx, &settings(false)).await;

        assert_eq!(done.status, StepStatus::Completed);
        assert_eq!(done.output, Some(json!({"status": 200, "body": {"ok": true}})));

        let requests = seen.lock().unwrap();
        assert_eq!(requests[0].url, "https://example.test/items");
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[0].headers["x-user"], "ada");
        assert_eq!(requests[0].body, Some(json!({"n": 3})));
        assert_eq!(requests[0].timeout_secs, 5);
    }

    #[tokio::test]
    async fn conditional_records_selected_branch() {
        let executor = testing::executor();
        let mut step = pending(StepConfig::Conditional(ConditionalConfig {
            expression: Some("input.tier == 'gold'".into()),
        }));
        step.condition = Some(StepCondition {
            expression: String::new(),
            then_id: Some("celebrate".into()),
            else_id: Some("retry".into()),
        });

        let high = executor
            .execute(
                step.clone(),
                StepContext::new(json!({"tier": "gold"}), json!({}), Map::new()),
                &settings(false),
            )
            .await;
        assert_eq!(
            high.output,
            Some(json!({"condition_met": true, "selected_step": "celebrate"}))
        );

        let low = executor
            .execute(
                step,
                StepContext::new(json!({"tier": "free"}), json!({}), Map::new()),
                &settings(false),
            )
            .await;
        assert_eq!(
            low.output,
            Some(json!({"condition_met": false, "selected_step": "retry"}))
        );
    }

    #[tokio::test]
    async fn conditional_without_expression_fails() {
        let executor = testing::executor();
        let done = executor
            .execute(
                pending(StepConfig::Conditional(ConditionalConfig::default())),
                StepContext::default(),
                &settings(false),
            )
            .await;
        assert_eq!(done.status, StepStatus::Failed);
    }

    #[tokio::test]
    async fn data_processing_reads_dependency_outputs() {
        let executor = testing::executor();
        let mut deps = Map::new();
        deps.insert("fetch".into(), json!({"items": [{"n": 1}, {"n": 2}]}));
        let step = pending(StepConfig::DataProcessing(DataProcessingConfig {
            operation: DataOperation::Aggregate {
                source: "steps.fetch.output.items".into(),
                field: Some("n".into()),
                function: agentrace_types::trace::AggregateFunction::Sum,
            },
        }));
        let done = executor
            .execute(step, StepContext::new(json!({}), json!({}), deps), &settings(false))
            .await;
        assert_eq!(done.status, StepStatus::Completed);
        assert_eq!(done.output.unwrap()["value"], json!(3.0));
        assert_eq!(done.input.unwrap()["steps"]["fetch"]["items"][1]["n"], 2);
    }

    #[tokio::test]
    async fn parallel_keeps_order_and_sums_usage() {
        let executor = testing::executor();
        let step = pending(StepConfig::Parallel(ParallelConfig {
            tasks: vec![
                ParallelTask {
                    name: "a".into(),
                    config: testing::llm_config("one"),
                },
                ParallelTask {
                    name: "b".into(),
                    config: testing::custom_config("echo", json!({"v": 2})),
                },
                ParallelTask {
                    name: "c".into(),
                    config: testing::llm_config("three"),
                },
            ],
            max_concurrency: Some(2),
        }));
        let done = executor
            .execute(step, StepContext::default(), &settings(false))
            .await;

        assert_eq!(done.status, StepStatus::Completed);
        let out = done.output.unwrap();
        let names: Vec<&str> = out
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(out[1]["output"], json!({"v": 2}));
        assert_eq!(done.metadata.tokens, 60);
        assert!((done.metadata.cost - 0.06).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn parallel_runs_on_spawned_task_bounded_by_max_concurrency() {
        let executor = Arc::new(testing::executor());
        let sleep = |name: &str| ParallelTask {
            name: name.into(),
            config: testing::custom_config("sleep", json!({"ms": 100})),
        };
        let step = pending(StepConfig::Parallel(ParallelConfig {
            tasks: vec![sleep("a"), sleep("b"), sleep("c")],
            max_concurrency: Some(2),
        }));

        let started = Instant::now();
        let handle = tokio::spawn({
            let executor = Arc::clone(&executor);
            async move {
                executor
                    .execute(step, StepContext::default(), &settings(false))
                    .await
            }
        });
        let done = handle.await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(done.status, StepStatus::Completed);
        assert_eq!(done.output.unwrap().as_array().unwrap().len(), 3);
        // Two waves of 100ms: a and b together, then c.
        assert!(elapsed >= Duration::from_millis(200), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(300), "{elapsed:?}");
    }

    #[tokio::test]
    async fn parallel_failure_names_the_task() {
        let executor = testing::executor();
        let step = pending(StepConfig::Parallel(ParallelConfig {
            tasks: vec![ParallelTask {
                name: "boom".into(),
                config: testing::custom_config("fail", Value::Null),
            }],
            max_concurrency: None,
        }));
        let done = executor
            .execute(step, StepContext::default(), &settings(false))
            .await;
        assert_eq!(done.status, StepStatus::Failed);
        assert!(done.error.unwrap().starts_with("parallel task 'boom' failed"));
    }

    #[tokio::test]
    async fn unknown_custom_function_fails() {
        let executor = testing::executor();
        let done = executor
            .execute(
                pending(testing::custom_config("nope", Value::Null)),
                StepContext::default(),
                &settings(false),
            )
            .await;
        assert_eq!(done.error.as_deref(), Some("unknown custom function 'nope'"));
    }
}
