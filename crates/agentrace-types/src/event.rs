//! Lifecycle event types for the trace event bus.
//!
//! `TraceEvent` is the unified event type published while executions run.
//! All variants are Clone + Send + Sync for use with tokio broadcast channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::trace::StepKind;

/// Events emitted during trace execution.
///
/// Delivered in-process to observers (logging, metrics, UI updates).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEvent {
    /// An execution passed the quota gate and its scheduler task was spawned.
    ExecutionStarted {
        execution_id: Uuid,
        template_id: Uuid,
        owner_id: String,
        step_count: usize,
    },

    /// A step was dispatched.
    StepStarted {
        execution_id: Uuid,
        step_id: String,
        kind: StepKind,
        batch: u32,
    },

    /// A step finished successfully (possibly from cache).
    StepCompleted {
        execution_id: Uuid,
        step_id: String,
        duration_ms: u64,
        cache_hit: bool,
    },

    /// A step failed.
    StepFailed {
        execution_id: Uuid,
        step_id: String,
        error: String,
    },

    /// Every step completed.
    ExecutionCompleted {
        execution_id: Uuid,
        duration_ms: u64,
        total_cost: f64,
        total_tokens: u64,
    },

    /// The execution ended with failed steps or a structural error.
    ExecutionFailed { execution_id: Uuid, error: String },

    /// The scheduler honored a pause at a batch boundary.
    ExecutionPaused { execution_id: Uuid },

    /// A paused execution re-entered the scheduler loop.
    ExecutionResumed { execution_id: Uuid },

    /// The scheduler honored a cancel at a batch boundary.
    ExecutionCancelled { execution_id: Uuid },
}

impl TraceEvent {
    /// The execution this event belongs to.
    pub fn execution_id(&self) -> Uuid {
        match self {
            TraceEvent::ExecutionStarted { execution_id, .. }
            | TraceEvent::StepStarted { execution_id, .. }
            | TraceEvent::StepCompleted { execution_id, .. }
            | TraceEvent::StepFailed { execution_id, .. }
            | TraceEvent::ExecutionCompleted { execution_id, .. }
            | TraceEvent::ExecutionFailed { execution_id, .. }
            | TraceEvent::ExecutionPaused { execution_id }
            | TraceEvent::ExecutionResumed { execution_id }
            | TraceEvent::ExecutionCancelled { execution_id } => *execution_id,
        }
    }

    /// Short lifecycle name (`started`, `step:completed`, ...).
    pub fn name(&self) -> &'static str {
        match self {
            TraceEvent::ExecutionStarted { .. } => "started",
            TraceEvent::StepStarted { .. } => "step:started",
            TraceEvent::StepCompleted { .. } => "step:completed",
            TraceEvent::StepFailed { .. } => "step:failed",
            TraceEvent::ExecutionCompleted { .. } => "completed",
            TraceEvent::ExecutionFailed { .. } => "failed",
            TraceEvent::ExecutionPaused { .. } => "paused",
            TraceEvent::ExecutionResumed { .. } => "resumed",
            TraceEvent::ExecutionCancelled { .. } => "cancelled",
        }
    }

    /// Whether this event marks the end of an execution.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TraceEvent::ExecutionCompleted { .. }
                | TraceEvent::ExecutionFailed { .. }
                | TraceEvent::ExecutionCancelled { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_started_tagging() {
        let id = Uuid::now_v7();
        let event = TraceEvent::StepStarted {
            execution_id: id,
            step_id: "fetch".to_string(),
            kind: StepKind::ApiCall,
            batch: 2,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "step_started");
        assert_eq!(json["kind"], "api_call");
        assert_eq!(event.name(), "step:started");
        assert_eq!(event.execution_id(), id);
        assert!(!event.is_terminal());
    }

    #[test]
    fn test_terminal_events() {
        let id = Uuid::now_v7();
        assert!(TraceEvent::ExecutionCancelled { execution_id: id }.is_terminal());
        assert!(
            TraceEvent::ExecutionFailed {
                execution_id: id,
                error: "boom".to_string()
            }
            .is_terminal()
        );
        assert!(!TraceEvent::ExecutionPaused { execution_id: id }.is_terminal());
        assert_eq!(TraceEvent::ExecutionResumed { execution_id: id }.name(), "resumed");
    }
}
