//! Quota/subscription gate trait.
//!
//! The engine calls the gate before an execution starts (subscription,
//! request quota, token reservation, execution count) and after it ends
//! (token and request consumption, reservation release). The business rules behind each call
//! belong to the implementation.

use agentrace_types::quota::{QuotaDecision, Subscription};

/// Errors from the gate itself (as opposed to a quota rejection).
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("quota gate unavailable: {0}")]
    Unavailable(String),
}

/// Trait for usage quota enforcement.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
/// Counters are monotonic; concurrent callers may over- or under-count
/// slightly and the gate is expected to reconcile out of band.
pub trait QuotaGate: Send + Sync {
    /// Current subscription of an owner.
    fn get_subscription(
        &self,
        owner_id: &str,
    ) -> impl std::future::Future<Output = Result<Subscription, GateError>> + Send;

    /// Whether the owner may issue another request this period.
    fn check_request_quota(
        &self,
        owner_id: &str,
    ) -> impl std::future::Future<Output = Result<QuotaDecision, GateError>> + Send;

    /// Reserve an estimated token allotment for an execution.
    fn reserve_tokens(
        &self,
        owner_id: &str,
        estimate: u64,
    ) -> impl std::future::Future<Output = Result<QuotaDecision, GateError>> + Send;

    /// Return a reservation made by [`QuotaGate::reserve_tokens`].
    ///
    /// Called when an execution finishes, or when admission is refused
    /// after the reservation was granted.
    fn release_tokens(
        &self,
        owner_id: &str,
        estimate: u64,
    ) -> impl std::future::Future<Output = Result<(), GateError>> + Send;

    /// Report tokens actually consumed by a finished execution.
    fn consume_tokens(
        &self,
        owner_id: &str,
        actual: u64,
    ) -> impl std::future::Future<Output = Result<(), GateError>> + Send;

    /// Report one consumed request.
    fn consume_request(
        &self,
        owner_id: &str,
    ) -> impl std::future::Future<Output = Result<(), GateError>> + Send;

    /// Count a new execution against the per-period execution quota.
    ///
    /// Rejected executions are not counted.
    fn increment_execution_count(
        &self,
        owner_id: &str,
    ) -> impl std::future::Future<Output = Result<QuotaDecision, GateError>> + Send;
}

/// Gate that allows everything and records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnlimitedQuotaGate;

impl QuotaGate for UnlimitedQuotaGate {
    async fn get_subscription(&self, owner_id: &str) -> Result<Subscription, GateError> {
        Ok(Subscription::active(owner_id))
    }

    async fn check_request_quota(&self, _owner_id: &str) -> Result<QuotaDecision, GateError> {
        Ok(QuotaDecision::Allowed)
    }

    async fn reserve_tokens(
        &self,
        _owner_id: &str,
        _estimate: u64,
    ) -> Result<QuotaDecision, GateError> {
        Ok(QuotaDecision::Allowed)
    }

    async fn release_tokens(&self, _owner_id: &str, _estimate: u64) -> Result<(), GateError> {
        Ok(())
    }

    async fn consume_tokens(&self, _owner_id: &str, _actual: u64) -> Result<(), GateError> {
        Ok(())
    }

    async fn consume_request(&self, _owner_id: &str) -> Result<(), GateError> {
        Ok(())
    }

    async fn increment_execution_count(
        &self,
        _owner_id: &str,
    ) -> Result<QuotaDecision, GateError> {
        Ok(QuotaDecision::Allowed)
    }
}
