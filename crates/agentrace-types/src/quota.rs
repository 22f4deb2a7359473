//! Quota and subscription records exchanged with the quota gate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Subscription state of an owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub owner_id: String,
    pub plan: String,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_period_end: Option<DateTime<Utc>>,
}

impl Subscription {
    /// Active subscription on the default plan.
    pub fn active(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            plan: "default".to_string(),
            active: true,
            current_period_end: None,
        }
    }
}

/// Outcome of a quota check or reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum QuotaDecision {
    Allowed,
    Exceeded {
        resource: QuotaResource,
        used: u64,
        limit: u64,
    },
}

impl QuotaDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, QuotaDecision::Allowed)
    }
}

/// Counter a quota decision refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaResource {
    Executions,
    Requests,
    Tokens,
}

impl std::fmt::Display for QuotaResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuotaResource::Executions => write!(f, "executions"),
            QuotaResource::Requests => write!(f, "requests"),
            QuotaResource::Tokens => write!(f, "tokens"),
        }
    }
}

/// Point-in-time usage counters for an owner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub executions: u64,
    pub requests: u64,
    pub tokens_reserved: u64,
    pub tokens_consumed: u64,
}
