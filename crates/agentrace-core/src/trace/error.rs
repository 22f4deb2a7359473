//! Error taxonomy for trace orchestration.
//!
//! `TraceError` covers the failures that reach callers of the public surface.
//! `StepError` never leaves the scheduler: it is recorded on the failing step.

use agentrace_types::error::CollaboratorError;
use agentrace_types::quota::QuotaResource;
use agentrace_types::trace::ExecutionStatus;
use uuid::Uuid;

use crate::quota::GateError;

/// Top-level errors of the trace orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    /// Malformed template, step, variables or options.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("template not found: {0}")]
    TemplateNotFound(Uuid),

    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),

    /// The quota gate rejected the execution before it started.
    #[error("quota exceeded for {resource}: {used}/{limit}")]
    QuotaExceeded {
        resource: QuotaResource,
        used: u64,
        limit: u64,
    },

    #[error("subscription inactive for owner '{owner_id}'")]
    SubscriptionInactive { owner_id: String },

    /// Pending steps remain but none is runnable.
    #[error("dependency stuck: no runnable steps, pending: {}", pending.join(", "))]
    DependencyStuck { pending: Vec<String> },

    /// The quota gate itself failed.
    #[error(transparent)]
    Gate(#[from] GateError),

    /// A control signal does not apply to the execution's current status.
    #[error("cannot {action} execution {execution_id} in status {status}")]
    InvalidState {
        execution_id: Uuid,
        status: ExecutionStatus,
        action: &'static str,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl TraceError {
    pub fn validation(msg: impl Into<String>) -> Self {
        TraceError::Validation(msg.into())
    }
}

/// Errors raised while running a single step.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error("data processing failed: {0}")]
    Data(String),

    #[error("expression error: {0}")]
    Expression(String),

    #[error("unknown custom function '{0}'")]
    UnknownFunction(String),

    #[error("parallel task '{task}' failed: {source}")]
    ParallelTask {
        task: String,
        #[source]
        source: Box<StepError>,
    },

    #[error("step task panicked: {0}")]
    Panicked(String),
}
