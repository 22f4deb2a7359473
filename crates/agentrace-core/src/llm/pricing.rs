//! Pricing lookup collaborator: model id and token usage to USD cost.

use agentrace_types::llm::TokenUsage;

/// Computes the cost of a model call from its token usage.
///
/// Implementations live in agentrace-infra (`TablePricing`).
pub trait PricingLookup: Send + Sync {
    fn cost(&self, provider: &str, model: &str, usage: &TokenUsage) -> f64;
}

/// Pricing that charges nothing. Used when no table is wired.
#[derive(Debug, Default, Clone, Copy)]
pub struct FreePricing;

impl PricingLookup for FreePricing {
    fn cost(&self, _provider: &str, _model: &str, _usage: &TokenUsage) -> f64 {
        0.0
    }
}
