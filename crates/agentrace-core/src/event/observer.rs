//! Synchronous observers of trace lifecycle events.

use agentrace_types::event::TraceEvent;

/// In-process sink for lifecycle events.
///
/// Called on the publishing task; implementations must not block.
pub trait TraceObserver: Send + Sync {
    fn on_event(&self, event: &TraceEvent);
}

/// Writes every lifecycle event as a structured tracing line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl TraceObserver for LoggingObserver {
    fn on_event(&self, event: &TraceEvent) {
        match event {
            TraceEvent::ExecutionStarted {
                execution_id,
                template_id,
                owner_id,
                step_count,
            } => tracing::info!(
                execution_id = %execution_id,
                template_id = %template_id,
                owner_id = owner_id.as_str(),
                step_count,
                "trace started"
            ),
            TraceEvent::StepStarted {
                execution_id,
                step_id,
                kind,
                batch,
            } => tracing::debug!(
                execution_id = %execution_id,
                step_id = step_id.as_str(),
                kind = %kind,
                batch,
                "step started"
            ),
            TraceEvent::StepCompleted {
                execution_id,
                step_id,
                duration_ms,
                cache_hit,
            } => tracing::debug!(
                execution_id = %execution_id,
                step_id = step_id.as_str(),
                duration_ms,
                cache_hit,
                "step completed"
            ),
            TraceEvent::StepFailed {
                execution_id,
                step_id,
                error,
            } => tracing::warn!(
                execution_id = %execution_id,
                step_id = step_id.as_str(),
                error = error.as_str(),
                "step failed"
            ),
            TraceEvent::ExecutionCompleted {
                execution_id,
                duration_ms,
                total_cost,
                total_tokens,
            } => tracing::info!(
                execution_id = %execution_id,
                duration_ms,
                total_cost,
                total_tokens,
                "trace completed"
            ),
            TraceEvent::ExecutionFailed {
                execution_id,
                error,
            } => tracing::warn!(
                execution_id = %execution_id,
                error = error.as_str(),
                "trace failed"
            ),
            other => tracing::info!(
                execution_id = %other.execution_id(),
                event = other.name(),
                "trace state changed"
            ),
        }
    }
}
