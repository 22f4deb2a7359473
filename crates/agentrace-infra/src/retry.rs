//! Retry loop shared by the outbound HTTP adapters.
//!
//! Retries only errors that [`CollaboratorError::is_retryable`] accepts,
//! sleeping `backoff_ms * 2^(attempt - 1)` between attempts.

use std::future::Future;
use std::time::Duration;

use agentrace_types::error::CollaboratorError;
use agentrace_types::trace::RetryPolicy;

/// Upper bound on a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

fn backoff(policy: &RetryPolicy, attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    Duration::from_millis(policy.backoff_ms.saturating_mul(factor)).min(MAX_BACKOFF)
}

/// Run `op` until it succeeds, fails permanently, or the policy is spent.
///
/// Returns the value and the number of attempts made. Without a policy
/// the operation runs exactly once.
pub async fn with_retry<T, F, Fut>(
    policy: Option<&RetryPolicy>,
    target: &str,
    mut op: F,
) -> Result<(T, u32), CollaboratorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CollaboratorError>>,
{
    let max_attempts = policy.map_or(1, |p| p.max_attempts.max(1));
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok((value, attempt)),
            Err(e) if attempt < max_attempts && e.is_retryable() => {
                let delay = policy.map_or(Duration::ZERO, |p| backoff(p, attempt));
                tracing::warn!(
                    target_name = target,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying outbound call"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff_ms: 100,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = policy(5);
        assert_eq!(backoff(&p, 1), Duration::from_millis(100));
        assert_eq!(backoff(&p, 3), Duration::from_millis(400));
        assert_eq!(backoff(&p, 80), MAX_BACKOFF);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let (value, attempts) = with_retry(Some(&policy(3)), "test", || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(CollaboratorError::Transport("reset".into()))
                } else {
                    Ok("done")
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, "done");
        assert_eq!(attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<((), u32), _> = with_retry(Some(&policy(3)), "test", || {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                Err(CollaboratorError::Status {
                    status: 400,
                    body: "bad".into(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(CollaboratorError::Status { status: 400, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_policy_means_single_attempt() {
        let result: Result<((), u32), _> = with_retry(None, "test", || async {
            Err(CollaboratorError::Timeout { secs: 1 })
        })
        .await;
        assert!(matches!(result, Err(CollaboratorError::Timeout { secs: 1 })));
    }
}
