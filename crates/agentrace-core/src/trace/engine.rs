//! Execution engine: batch scheduler and execution state machine.
//!
//! Each execution runs as its own tokio task. The scheduler repeatedly
//! computes the ready set, splits it into batches of `parallelism` steps and
//! runs each batch on a `JoinSet`, awaiting every outcome before moving on.
//! One step's failure never cancels its siblings.
//!
//! # Control signals
//!
//! `pause`, `resume` and `cancel` are honored only at batch boundaries. A
//! batch already dispatched always runs to completion first.
//!
//! # Failure model
//!
//! Step failures are recorded on the step. Dependents of a failed step stay
//! `pending`; once nothing is runnable the execution fails with
//! `DependencyStuck`. Task panics are recorded as a failure of that step.

use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use agentrace_types::config::EngineConfig;
use agentrace_types::event::TraceEvent;
use agentrace_types::quota::QuotaDecision;
use agentrace_types::trace::{
    AgentTraceExecution, ExecuteOptions, ExecutionMetadata, ExecutionStatus, StepExecution,
    StepStatus,
};
use chrono::Utc;
use dashmap::DashMap;
use futures_util::FutureExt;
use serde_json::{Map, Value};
use tokio::sync::{RwLock, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::EventBus;
use crate::quota::QuotaGate;
use crate::storage::PersistenceAdapter;

use super::checkpoint::CheckpointManager;
use super::context::StepContext;
use super::dag::ready_set;
use super::error::{StepError, TraceError};
use super::step_executor::{RunSettings, StepExecutor};
use super::store::TemplateStore;
use super::template::{estimate_tokens, resolve_variables};

// ---------------------------------------------------------------------------
// Run bookkeeping
// ---------------------------------------------------------------------------

type Finished = Option<Arc<AgentTraceExecution>>;

/// Handles to an execution that is still in the active working set.
#[derive(Clone)]
struct ActiveRun {
    execution: Arc<RwLock<AgentTraceExecution>>,
    cancel: CancellationToken,
    pause: Arc<watch::Sender<bool>>,
    done: watch::Receiver<Finished>,
}

/// State owned by the scheduler task of one execution.
struct Run {
    id: Uuid,
    owner_id: String,
    token_estimate: u64,
    settings: RunSettings,
    parallelism: usize,
    execution: Arc<RwLock<AgentTraceExecution>>,
    cancel: CancellationToken,
    pause: watch::Receiver<bool>,
    done: watch::Sender<Finished>,
}

/// How the scheduler loop ended.
enum Outcome {
    Finished { failed: Vec<String> },
    Cancelled,
}

// ---------------------------------------------------------------------------
// ExecutionEngine
// ---------------------------------------------------------------------------

/// Drives trace executions through their dependency graphs.
///
/// Generic over the persistence adapter and the quota gate. Cheap to clone;
/// clones share the active working set.
pub struct ExecutionEngine<P: PersistenceAdapter, Q: QuotaGate> {
    inner: Arc<EngineInner<P, Q>>,
}

impl<P: PersistenceAdapter, Q: QuotaGate> Clone for ExecutionEngine<P, Q> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct EngineInner<P: PersistenceAdapter, Q: QuotaGate> {
    templates: Arc<TemplateStore<P>>,
    executor: Arc<StepExecutor>,
    checkpoints: CheckpointManager<P>,
    quota: Arc<Q>,
    events: EventBus,
    active: DashMap<Uuid, ActiveRun>,
    default_parallelism: u32,
    default_max_tokens: u32,
}

impl<P, Q> ExecutionEngine<P, Q>
where
    P: PersistenceAdapter + 'static,
    Q: QuotaGate + 'static,
{
    pub fn new(
        config: &EngineConfig,
        persistence: Arc<P>,
        templates: Arc<TemplateStore<P>>,
        executor: Arc<StepExecutor>,
        quota: Arc<Q>,
        events: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                templates,
                executor,
                checkpoints: CheckpointManager::new(
                    persistence,
                    config.execution_ttl_secs,
                    config.checkpoint_ttl_secs,
                ),
                quota,
                events,
                active: DashMap::new(),
                default_parallelism: config.default_parallelism.max(1),
                default_max_tokens: config.default_llm_max_tokens,
            }),
        }
    }

    pub fn checkpoints(&self) -> &CheckpointManager<P> {
        &self.inner.checkpoints
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Number of executions in the active working set.
    pub fn active_count(&self) -> usize {
        self.inner.active.len()
    }

    // -----------------------------------------------------------------------
    // Public surface
    // -----------------------------------------------------------------------

    /// Start an execution of a registered template.
    ///
    /// Rejects synchronously on validation or quota failures, before any
    /// step runs. Otherwise returns the freshly snapshotted execution while
    /// the scheduler continues in the background.
    pub async fn execute_trace(
        &self,
        template_id: &Uuid,
        owner_id: &str,
        input: Value,
        options: ExecuteOptions,
    ) -> Result<AgentTraceExecution, TraceError> {
        let inner = &self.inner;
        if owner_id.trim().is_empty() {
            return Err(TraceError::validation("owner id must not be empty"));
        }

        let template = inner
            .templates
            .get(template_id)
            .await
            .ok_or(TraceError::TemplateNotFound(*template_id))?;

        let variables = resolve_variables(&template, &options.variables)?;
        let parallelism = options
            .parallelism
            .or(template.settings.parallelism)
            .unwrap_or(inner.default_parallelism);
        if parallelism == 0 {
            return Err(TraceError::validation("parallelism must be >= 1"));
        }

        let estimate = options
            .estimated_tokens
            .unwrap_or_else(|| estimate_tokens(&template, inner.default_max_tokens));
        inner.admit(owner_id, estimate).await?;

        let execution = AgentTraceExecution {
            id: Uuid::now_v7(),
            template_id: template.id,
            name: options.name.unwrap_or_else(|| template.name.clone()),
            owner_id: owner_id.to_string(),
            status: ExecutionStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            duration_ms: None,
            steps: template.steps.iter().map(StepExecution::pending).collect(),
            input,
            variables: variables.clone(),
            output: None,
            error: None,
            metadata: ExecutionMetadata::default(),
            parent_execution_id: options.parent_execution_id,
        };

        let shared = Arc::new(RwLock::new(execution.clone()));
        let cancel = CancellationToken::new();
        let (pause_tx, pause_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(None);

        inner.active.insert(
            execution.id,
            ActiveRun {
                execution: Arc::clone(&shared),
                cancel: cancel.clone(),
                pause: Arc::new(pause_tx),
                done: done_rx,
            },
        );
        inner.checkpoints.save_execution(&execution).await;

        tracing::info!(
            execution_id = %execution.id,
            template_id = %template.id,
            owner_id,
            steps = execution.steps.len(),
            parallelism,
            "execution started"
        );
        inner.events.publish(TraceEvent::ExecutionStarted {
            execution_id: execution.id,
            template_id: template.id,
            owner_id: owner_id.to_string(),
            step_count: execution.steps.len(),
        });

        let run = Run {
            id: execution.id,
            owner_id: owner_id.to_string(),
            token_estimate: estimate,
            settings: RunSettings {
                template_id: template.id,
                variables,
                caching_enabled: template.settings.caching_enabled,
                retry_policy: template.settings.retry_policy.clone(),
            },
            parallelism: parallelism as usize,
            execution: shared,
            cancel,
            pause: pause_rx,
            done: done_tx,
        };
        tokio::spawn(Arc::clone(inner).drive(run));

        Ok(execution)
    }

    /// Current state of an execution: live if active, else from history.
    pub async fn get_execution(&self, id: &Uuid) -> Result<AgentTraceExecution, TraceError> {
        let live = self.inner.active.get(id).map(|r| Arc::clone(&r.execution));
        if let Some(execution) = live {
            return Ok(execution.read().await.clone());
        }

        match self.inner.checkpoints.load_execution(id).await {
            Ok(Some(execution)) => Ok(execution),
            Ok(None) => Err(TraceError::ExecutionNotFound(*id)),
            Err(e) => {
                tracing::warn!(
                    warning = "persistence",
                    execution_id = %id,
                    error = %e,
                    "cannot load execution history"
                );
                Err(TraceError::ExecutionNotFound(*id))
            }
        }
    }

    /// Request a pause at the next batch boundary.
    pub async fn pause(&self, id: &Uuid) -> Result<(), TraceError> {
        let run = self.inner.active_run(id, "pause").await?;
        let status = run.execution.read().await.status;
        if status.is_terminal() {
            return Err(invalid_state(*id, status, "pause"));
        }
        run.pause.send_replace(true);
        tracing::info!(execution_id = %id, "pause requested");
        Ok(())
    }

    /// Lift a pause. Valid while paused or while a pause is still pending.
    pub async fn resume(&self, id: &Uuid) -> Result<(), TraceError> {
        let run = self.inner.active_run(id, "resume").await?;
        let status = run.execution.read().await.status;
        if status != ExecutionStatus::Paused && !*run.pause.borrow() {
            return Err(invalid_state(*id, status, "resume"));
        }
        run.pause.send_replace(false);
        tracing::info!(execution_id = %id, "resume requested");
        Ok(())
    }

    /// Request cancellation at the next batch boundary.
    pub async fn cancel(&self, id: &Uuid) -> Result<(), TraceError> {
        let run = self.inner.active_run(id, "cancel").await?;
        let status = run.execution.read().await.status;
        if status.is_terminal() {
            return Err(invalid_state(*id, status, "cancel"));
        }
        run.cancel.cancel();
        tracing::info!(execution_id = %id, "cancel requested");
        Ok(())
    }

    /// Resolve once the execution reaches a terminal state.
    pub async fn wait_for_completion(&self, id: &Uuid) -> Result<AgentTraceExecution, TraceError> {
        let done = self.inner.active.get(id).map(|r| r.done.clone());
        if let Some(mut done) = done {
            let finished: Finished = done
                .wait_for(|f| f.is_some())
                .await
                .map_err(|_| TraceError::Internal(format!("scheduler of {id} exited without a result")))?
                .clone();
            if let Some(execution) = finished {
                return Ok(execution.as_ref().clone());
            }
        }

        let execution = self.get_execution(id).await?;
        if execution.status.is_terminal() {
            Ok(execution)
        } else {
            Err(TraceError::Internal(format!(
                "execution {id} is {} but not active in this process",
                execution.status
            )))
        }
    }
}

fn invalid_state(execution_id: Uuid, status: ExecutionStatus, action: &'static str) -> TraceError {
    TraceError::InvalidState {
        execution_id,
        status,
        action,
    }
}

fn check(decision: QuotaDecision) -> Result<(), TraceError> {
    match decision {
        QuotaDecision::Allowed => Ok(()),
        QuotaDecision::Exceeded {
            resource,
            used,
            limit,
        } => Err(TraceError::QuotaExceeded {
            resource,
            used,
            limit,
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

impl<P, Q> EngineInner<P, Q>
where
    P: PersistenceAdapter + 'static,
    Q: QuotaGate + 'static,
{
    /// Quota gate checks, in order. Any rejection aborts the start.
    ///
    /// The execution is counted last, so a refused start never uses up
    /// execution quota. A token reservation granted before a refusal is
    /// released again.
    async fn admit(&self, owner_id: &str, estimate: u64) -> Result<(), TraceError> {
        let subscription = self.quota.get_subscription(owner_id).await?;
        if !subscription.active {
            return Err(TraceError::SubscriptionInactive {
                owner_id: owner_id.to_string(),
            });
        }
        check(self.quota.check_request_quota(owner_id).await?)?;
        check(self.quota.reserve_tokens(owner_id, estimate).await?)?;

        let counted = match self.quota.increment_execution_count(owner_id).await {
            Ok(decision) => check(decision),
            Err(e) => Err(e.into()),
        };
        if counted.is_err() {
            self.release_reservation(owner_id, estimate).await;
        }
        counted
    }

    async fn release_reservation(&self, owner_id: &str, estimate: u64) {
        if let Err(e) = self.quota.release_tokens(owner_id, estimate).await {
            tracing::warn!(owner_id, error = %e, "failed to release token reservation");
        }
    }

    async fn active_run(&self, id: &Uuid, action: &'static str) -> Result<ActiveRun, TraceError> {
        let run = self.active.get(id).map(|r| r.clone());
        if let Some(run) = run {
            return Ok(run);
        }
        match self.checkpoints.load_execution(id).await {
            Ok(Some(execution)) => Err(invalid_state(*id, execution.status, action)),
            _ => Err(TraceError::ExecutionNotFound(*id)),
        }
    }

    /// Scheduler task body.
    async fn drive(self: Arc<Self>, mut run: Run) {
        match self.schedule(&mut run).await {
            Ok(Outcome::Finished { failed }) if failed.is_empty() => {
                self.finish(run, ExecutionStatus::Completed, None).await;
            }
            Ok(Outcome::Finished { failed }) => {
                let error = format!("steps failed: {}", failed.join(", "));
                self.finish(run, ExecutionStatus::Failed, Some(error)).await;
            }
            Ok(Outcome::Cancelled) => {
                self.finish(run, ExecutionStatus::Cancelled, None).await;
            }
            Err(e) => {
                tracing::warn!(execution_id = %run.id, error = %e, "execution aborted");
                self.finish(run, ExecutionStatus::Failed, Some(e.to_string())).await;
            }
        }
    }

    async fn schedule(&self, run: &mut Run) -> Result<Outcome, TraceError> {
        let step_count = run.execution.read().await.steps.len();
        let mut completed: HashSet<String> = HashSet::new();
        let mut failed: Vec<String> = Vec::new();
        let mut batch = 0u32;

        while completed.len() + failed.len() < step_count {
            let ready = {
                let execution = run.execution.read().await;
                let failed_set: HashSet<String> = failed.iter().cloned().collect();
                let ready = ready_set(&execution.steps, &completed, &failed_set);
                if ready.is_empty() {
                    let pending = execution
                        .steps
                        .iter()
                        .filter(|s| s.status == StepStatus::Pending)
                        .map(|s| s.id.clone())
                        .collect();
                    return Err(TraceError::DependencyStuck { pending });
                }
                ready
            };

            for chunk in ready.chunks(run.parallelism) {
                if !self.at_boundary(run).await {
                    return Ok(Outcome::Cancelled);
                }
                batch += 1;
                for (step_id, status) in self.run_batch(run, chunk, batch).await {
                    match status {
                        StepStatus::Completed => {
                            completed.insert(step_id);
                        }
                        _ => failed.push(step_id),
                    }
                }
                let snapshot = run.execution.read().await.clone();
                self.checkpoints.checkpoint_batch(&snapshot, batch).await;
            }
        }

        Ok(Outcome::Finished { failed })
    }

    /// Honor pause and cancel. Returns `false` when the run is cancelled.
    async fn at_boundary(&self, run: &mut Run) -> bool {
        if run.cancel.is_cancelled() {
            return false;
        }
        if !*run.pause.borrow_and_update() {
            return true;
        }

        self.set_status(run, ExecutionStatus::Paused).await;
        tracing::info!(execution_id = %run.id, "execution paused");
        self.events.publish(TraceEvent::ExecutionPaused {
            execution_id: run.id,
        });

        loop {
            tokio::select! {
                _ = run.cancel.cancelled() => return false,
                changed = run.pause.changed() => {
                    if changed.is_err() || !*run.pause.borrow_and_update() {
                        break;
                    }
                }
            }
        }

        if run.cancel.is_cancelled() {
            return false;
        }
        self.set_status(run, ExecutionStatus::Running).await;
        tracing::info!(execution_id = %run.id, "execution resumed");
        self.events.publish(TraceEvent::ExecutionResumed {
            execution_id: run.id,
        });
        true
    }

    async fn set_status(&self, run: &Run, status: ExecutionStatus) {
        let snapshot = {
            let mut execution = run.execution.write().await;
            execution.status = status;
            execution.clone()
        };
        self.checkpoints.save_execution(&snapshot).await;
    }

    /// Dispatch one batch and fold every outcome back into the execution.
    ///
    /// Returns the terminal status of each step in the batch.
    async fn run_batch(&self, run: &Run, chunk: &[usize], batch: u32) -> Vec<(String, StepStatus)> {
        let mut dispatched = Vec::with_capacity(chunk.len());
        let snapshot = {
            let mut execution = run.execution.write().await;
            let now = Utc::now();
            for &idx in chunk {
                let dependency_outputs: Map<String, Value> = execution.steps[idx]
                    .dependencies
                    .iter()
                    .filter_map(|dep| {
                        execution
                            .step(dep)
                            .and_then(|s| s.output.clone())
                            .map(|output| (dep.clone(), output))
                    })
                    .collect();
                let ctx = StepContext::new(
                    execution.input.clone(),
                    execution.variables.clone(),
                    dependency_outputs,
                );
                let step = &mut execution.steps[idx];
                step.status = StepStatus::Running;
                step.start_time = Some(now);
                dispatched.push((idx, step.clone(), ctx));
            }
            execution.clone()
        };
        self.checkpoints.save_execution(&snapshot).await;

        tracing::debug!(execution_id = %run.id, batch, steps = chunk.len(), "dispatching batch");

        let mut join_set = JoinSet::new();
        for (idx, step, ctx) in dispatched {
            self.events.publish(TraceEvent::StepStarted {
                execution_id: run.id,
                step_id: step.id.clone(),
                kind: step.kind(),
                batch,
            });

            let executor = Arc::clone(&self.executor);
            let settings = run.settings.clone();
            join_set.spawn(async move {
                let outcome = AssertUnwindSafe(executor.execute(step, ctx, &settings))
                    .catch_unwind()
                    .await;
                (idx, outcome.map_err(|payload| panic_message(payload.as_ref())))
            });
        }

        let mut outstanding: HashSet<usize> = chunk.iter().copied().collect();
        let mut results = Vec::with_capacity(chunk.len());

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, Ok(step))) => {
                    outstanding.remove(&idx);
                    results.push(self.fold(run, idx, step).await);
                }
                Ok((idx, Err(message))) => {
                    outstanding.remove(&idx);
                    let error = StepError::Panicked(message).to_string();
                    results.push(self.fold_failure(run, idx, error).await);
                }
                Err(e) => {
                    tracing::error!(execution_id = %run.id, batch, error = %e, "step task lost");
                }
            }
        }

        for idx in outstanding {
            let error = StepError::Panicked("step task was aborted".to_string()).to_string();
            results.push(self.fold_failure(run, idx, error).await);
        }

        results
    }

    async fn fold(&self, run: &Run, idx: usize, step: StepExecution) -> (String, StepStatus) {
        let event = match step.status {
            StepStatus::Completed => TraceEvent::StepCompleted {
                execution_id: run.id,
                step_id: step.id.clone(),
                duration_ms: step.duration_ms.unwrap_or(0),
                cache_hit: step.metadata.cache_hit.unwrap_or(false),
            },
            _ => TraceEvent::StepFailed {
                execution_id: run.id,
                step_id: step.id.clone(),
                error: step.error.clone().unwrap_or_default(),
            },
        };

        let result = (step.id.clone(), step.status);
        {
            let mut execution = run.execution.write().await;
            execution.steps[idx] = step;
            execution.recompute_metadata();
        }
        self.events.publish(event);
        result
    }

    async fn fold_failure(&self, run: &Run, idx: usize, error: String) -> (String, StepStatus) {
        let mut step = run.execution.read().await.steps[idx].clone();
        step.status = StepStatus::Failed;
        step.end_time = Some(Utc::now());
        step.error = Some(error);
        self.fold(run, idx, step).await
    }

    /// Enter a terminal state: persist, notify, report usage, release waiters.
    async fn finish(&self, run: Run, status: ExecutionStatus, error: Option<String>) {
        let snapshot = {
            let mut execution = run.execution.write().await;
            let end = Utc::now();
            let output: Map<String, Value> = execution
                .steps
                .iter()
                .filter(|s| s.status == StepStatus::Completed)
                .filter_map(|s| s.output.clone().map(|o| (s.id.clone(), o)))
                .collect();

            execution.status = status;
            execution.end_time = Some(end);
            execution.duration_ms = Some((end - execution.start_time).num_milliseconds().max(0) as u64);
            execution.output = Some(Value::Object(output));
            execution.error = error.clone();
            execution.recompute_metadata();
            execution.clone()
        };
        self.checkpoints.save_execution(&snapshot).await;

        let duration_ms = snapshot.duration_ms.unwrap_or(0);
        let event = match status {
            ExecutionStatus::Completed => {
                tracing::info!(
                    execution_id = %run.id,
                    duration_ms,
                    total_cost = snapshot.metadata.total_cost,
                    total_tokens = snapshot.metadata.total_tokens,
                    "execution completed"
                );
                TraceEvent::ExecutionCompleted {
                    execution_id: run.id,
                    duration_ms,
                    total_cost: snapshot.metadata.total_cost,
                    total_tokens: snapshot.metadata.total_tokens,
                }
            }
            ExecutionStatus::Cancelled => {
                tracing::info!(execution_id = %run.id, duration_ms, "execution cancelled");
                TraceEvent::ExecutionCancelled {
                    execution_id: run.id,
                }
            }
            _ => {
                let error = error.unwrap_or_default();
                tracing::info!(execution_id = %run.id, duration_ms, error = error.as_str(), "execution failed");
                TraceEvent::ExecutionFailed {
                    execution_id: run.id,
                    error,
                }
            }
        };
        self.events.publish(event);

        self.report_usage(&run.owner_id, &snapshot).await;
        self.release_reservation(&run.owner_id, run.token_estimate).await;

        run.done.send_replace(Some(Arc::new(snapshot)));
        self.active.remove(&run.id);
    }

    /// Report consumed tokens and the request back to the gate.
    async fn report_usage(&self, owner_id: &str, execution: &AgentTraceExecution) {
        if let Err(e) = self
            .quota
            .consume_tokens(owner_id, execution.metadata.total_tokens)
            .await
        {
            tracing::warn!(execution_id = %execution.id, error = %e, "failed to report token usage");
        }
        if let Err(e) = self.quota.consume_request(owner_id).await {
            tracing::warn!(execution_id = %execution.id, error = %e, "failed to report request usage");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
