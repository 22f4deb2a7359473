use thiserror::Error;

/// Errors raised by a persistence adapter.
///
/// Callers treat all of these as warnings: the in-memory run continues.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Errors from loading or validating a metrics time range.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeRangeError {
    #[error("unknown time range '{0}' (expected 1h, 6h, 12h, 7d or 30d)")]
    Unknown(String),
}

/// Errors returned by step-type collaborators (model invoker, HTTP caller,
/// custom functions).
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("provider error: {0}")]
    Provider(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("{0}")]
    Function(String),
}

impl CollaboratorError {
    /// Whether a retry may succeed (timeouts, transport errors, 5xx, 429).
    pub fn is_retryable(&self) -> bool {
        match self {
            CollaboratorError::Timeout { .. } | CollaboratorError::Transport(_) => true,
            CollaboratorError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(CollaboratorError::Timeout { secs: 5 }.is_retryable());
        assert!(
            CollaboratorError::Status {
                status: 503,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(
            !CollaboratorError::Status {
                status: 404,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(!CollaboratorError::Function("nope".into()).is_retryable());
    }
}
