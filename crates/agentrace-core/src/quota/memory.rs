//! In-memory quota gate with per-owner monotonic counters.

use agentrace_types::config::QuotaLimits;
use agentrace_types::quota::{QuotaDecision, QuotaResource, Subscription, UsageSnapshot};
use dashmap::DashMap;

use super::gate::{GateError, QuotaGate};

/// Quota gate backed by process-local counters.
///
/// Owners without an explicit subscription are treated as active.
/// A token reservation must fit next to the tokens already consumed and
/// every reservation still outstanding, so concurrent starts cannot claim
/// the same headroom. Reservations are returned via `release_tokens`.
#[derive(Debug, Default)]
pub struct InMemoryQuotaGate {
    limits: QuotaLimits,
    usage: DashMap<String, UsageSnapshot>,
    subscriptions: DashMap<String, Subscription>,
}

impl InMemoryQuotaGate {
    pub fn new(limits: QuotaLimits) -> Self {
        Self {
            limits,
            usage: DashMap::new(),
            subscriptions: DashMap::new(),
        }
    }

    /// Record an explicit subscription for an owner.
    pub fn set_subscription(&self, subscription: Subscription) {
        self.subscriptions
            .insert(subscription.owner_id.clone(), subscription);
    }

    /// Current counters for an owner.
    pub fn usage(&self, owner_id: &str) -> UsageSnapshot {
        self.usage
            .get(owner_id)
            .map(|u| *u)
            .unwrap_or_default()
    }

    fn exceeded(resource: QuotaResource, used: u64, limit: u64) -> QuotaDecision {
        QuotaDecision::Exceeded {
            resource,
            used,
            limit,
        }
    }
}

impl QuotaGate for InMemoryQuotaGate {
    async fn get_subscription(&self, owner_id: &str) -> Result<Subscription, GateError> {
        Ok(self
            .subscriptions
            .get(owner_id)
            .map(|s| s.clone())
            .unwrap_or_else(|| Subscription::active(owner_id)))
    }

    async fn check_request_quota(&self, owner_id: &str) -> Result<QuotaDecision, GateError> {
        let used = self.usage(owner_id).requests;
        Ok(match self.limits.requests_per_period {
            Some(limit) if used >= limit => Self::exceeded(QuotaResource::Requests, used, limit),
            _ => QuotaDecision::Allowed,
        })
    }

    async fn reserve_tokens(
        &self,
        owner_id: &str,
        estimate: u64,
    ) -> Result<QuotaDecision, GateError> {
        let mut usage = self.usage.entry(owner_id.to_string()).or_default();
        if let Some(limit) = self.limits.tokens_per_period {
            let committed = usage.tokens_consumed.saturating_add(usage.tokens_reserved);
            if committed.saturating_add(estimate) > limit {
                return Ok(Self::exceeded(QuotaResource::Tokens, committed, limit));
            }
        }
        usage.tokens_reserved = usage.tokens_reserved.saturating_add(estimate);
        Ok(QuotaDecision::Allowed)
    }

    async fn release_tokens(&self, owner_id: &str, estimate: u64) -> Result<(), GateError> {
        if let Some(mut usage) = self.usage.get_mut(owner_id) {
            usage.tokens_reserved = usage.tokens_reserved.saturating_sub(estimate);
        }
        Ok(())
    }

    async fn consume_tokens(&self, owner_id: &str, actual: u64) -> Result<(), GateError> {
        let mut usage = self.usage.entry(owner_id.to_string()).or_default();
        usage.tokens_consumed = usage.tokens_consumed.saturating_add(actual);
        Ok(())
    }

    async fn consume_request(&self, owner_id: &str) -> Result<(), GateError> {
        let mut usage = self.usage.entry(owner_id.to_string()).or_default();
        usage.requests = usage.requests.saturating_add(1);
        Ok(())
    }

    async fn increment_execution_count(
        &self,
        owner_id: &str,
    ) -> Result<QuotaDecision, GateError> {
        let mut usage = self.usage.entry(owner_id.to_string()).or_default();
        if let Some(limit) = self.limits.executions_per_period {
            if usage.executions >= limit {
                return Ok(Self::exceeded(
                    QuotaResource::Executions,
                    usage.executions,
                    limit,
                ));
            }
        }
        usage.executions += 1;
        Ok(QuotaDecision::Allowed)
    }
}
