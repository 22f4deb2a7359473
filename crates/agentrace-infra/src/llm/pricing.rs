//! Cost table for model invocations.
//!
//! [`TablePricing`] implements the engine's `PricingLookup` over a built-in
//! table of known models plus user overrides from `config.toml`. Costs are
//! estimates and are shown to the user as such (`~$0.12`).

use agentrace_core::llm::PricingLookup;
use agentrace_types::config::ProviderPricing;
use agentrace_types::llm::TokenUsage;

struct PricingEntry {
    provider: &'static str,
    model_pattern: &'static str,
    input_cost_per_million: f64,
    output_cost_per_million: f64,
}

/// Conservative fallback pricing when no model match is found.
const FALLBACK_INPUT_COST: f64 = 5.0;
const FALLBACK_OUTPUT_COST: f64 = 15.0;

/// USD per million tokens. More specific patterns come first.
const DEFAULT_PRICING: &[PricingEntry] = &[
    PricingEntry {
        provider: "anthropic",
        model_pattern: "claude-sonnet-4",
        input_cost_per_million: 3.0,
        output_cost_per_million: 15.0,
    },
    PricingEntry {
        provider: "anthropic",
        model_pattern: "claude-opus-4",
        input_cost_per_million: 15.0,
        output_cost_per_million: 75.0,
    },
    PricingEntry {
        provider: "anthropic",
        model_pattern: "claude-haiku",
        input_cost_per_million: 0.80,
        output_cost_per_million: 4.0,
    },
    PricingEntry {
        provider: "openai",
        model_pattern: "gpt-4o-mini",
        input_cost_per_million: 0.15,
        output_cost_per_million: 0.60,
    },
    PricingEntry {
        provider: "openai",
        model_pattern: "gpt-4o",
        input_cost_per_million: 2.50,
        output_cost_per_million: 10.0,
    },
    PricingEntry {
        provider: "google",
        model_pattern: "gemini-2",
        input_cost_per_million: 1.25,
        output_cost_per_million: 5.0,
    },
    PricingEntry {
        provider: "mistral",
        model_pattern: "mistral-large",
        input_cost_per_million: 2.0,
        output_cost_per_million: 6.0,
    },
];

/// Prefix match; a trailing `*` is accepted and ignored (`gpt-4o*`).
fn matches_pattern(model: &str, pattern: &str) -> bool {
    model.starts_with(pattern.trim_end_matches('*'))
}

fn compute_cost(usage: &TokenUsage, input_cost_per_million: f64, output_cost_per_million: f64) -> f64 {
    let input_cost = (f64::from(usage.input_tokens) / 1_000_000.0) * input_cost_per_million;
    let output_cost = (f64::from(usage.output_tokens) / 1_000_000.0) * output_cost_per_million;
    input_cost + output_cost
}

/// Pricing table with user overrides.
///
/// Lookup order: overrides, then the built-in table, then the fallback
/// rate of $5.00 / $15.00 per million tokens.
#[derive(Debug, Clone, Default)]
pub struct TablePricing {
    overrides: Vec<ProviderPricing>,
}

impl TablePricing {
    pub fn new(overrides: Vec<ProviderPricing>) -> Self {
        Self { overrides }
    }
}

impl PricingLookup for TablePricing {
    fn cost(&self, provider: &str, model: &str, usage: &TokenUsage) -> f64 {
        if let Some(p) = self
            .overrides
            .iter()
            .find(|p| p.provider_name == provider && matches_pattern(model, &p.model_pattern))
        {
            return compute_cost(usage, p.input_cost_per_million, p.output_cost_per_million);
        }

        if let Some(entry) = DEFAULT_PRICING
            .iter()
            .find(|e| e.provider == provider && matches_pattern(model, e.model_pattern))
        {
            return compute_cost(usage, entry.input_cost_per_million, entry.output_cost_per_million);
        }

        compute_cost(usage, FALLBACK_INPUT_COST, FALLBACK_OUTPUT_COST)
    }
}

/// Format a cost estimate as a human-readable string.
///
/// Always prefixed with `~`. Costs below $0.01 use 3 decimal places.
pub fn format_cost(cost: f64) -> String {
    if cost < 0.01 {
        format!("~${cost:.3}")
    } else {
        format!("~${cost:.2}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(input: u32, output: u32) -> TokenUsage {
        TokenUsage {
            input_tokens: input,
            output_tokens: output,
        }
    }

    #[test]
    fn known_model_uses_table() {
        // $3.00 + $1.50
        let cost = TablePricing::default().cost("anthropic", "claude-sonnet-4-20250514", &usage(1_000_000, 100_000));
        assert!((cost - 4.5).abs() < 1e-9);
    }

    #[test]
    fn more_specific_pattern_wins() {
        let cost = TablePricing::default().cost("openai", "gpt-4o-mini-2024", &usage(1_000_000, 0));
        assert!((cost - 0.15).abs() < 1e-9);
    }

    #[test]
    fn override_takes_precedence() {
        let pricing = TablePricing::new(vec![ProviderPricing {
            provider_name: "openai".into(),
            model_pattern: "gpt-4o*".into(),
            input_cost_per_million: 1.0,
            output_cost_per_million: 2.0,
        }]);
        let cost = pricing.cost("openai", "gpt-4o", &usage(1_000_000, 1_000_000));
        assert!((cost - 3.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_uses_fallback() {
        let cost = TablePricing::default().cost("local", "llama-3", &usage(1_000_000, 1_000_000));
        assert!((cost - 20.0).abs() < 1e-9);
    }

    #[test]
    fn format_cost_precision() {
        assert_eq!(format_cost(0.0012), "~$0.001");
        assert_eq!(format_cost(0.123), "~$0.12");
    }
}
