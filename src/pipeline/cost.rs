//! Up-front price quote for a full run.

use serde::{Deserialize, Serialize};

use crate::gateway::{estimate_text_token_cost_usd, PricingRecord};

/// The quote covers every stage plus repair, not just the stage-1 input.
pub const MULTI_STAGE_INPUT_MULTIPLIER: u64 = 2;
pub const INPUT_OVERHEAD_TOKENS: u64 = 3_000;
pub const ESTIMATED_OUTPUT_TOKENS: u64 = 8_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    /// Formatted as `$X.XX USD`.
    pub cost: String,
    pub model: String,
    pub pricing_model: String,
    pub estimated_input_tokens: u64,
    pub estimated_output_tokens: u64,
    pub pricing: PricingRecord,
}

impl CostEstimate {
    /// Quote a run whose stage-1 input is `base_input_tokens`.
    pub fn from_base_tokens(model: &str, base_input_tokens: u64) -> Self {
        let estimated_input_tokens =
            base_input_tokens * MULTI_STAGE_INPUT_MULTIPLIER + INPUT_OVERHEAD_TOKENS;
        let estimated_output_tokens = ESTIMATED_OUTPUT_TOKENS;
        let (usd, pricing_model, pricing) = estimate_text_token_cost_usd(
            model,
            i64::try_from(estimated_input_tokens).unwrap_or(i64::MAX),
            estimated_output_tokens as i64,
        );
        Self {
            cost: format!("${usd:.2} USD"),
            model: model.to_string(),
            pricing_model: pricing_model.to_string(),
            estimated_input_tokens,
            estimated_output_tokens,
            pricing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_applies_multiplier_and_overhead() {
        let quote = CostEstimate::from_base_tokens("gpt-5.2", 10_000);
        assert_eq!(quote.estimated_input_tokens, 23_000);
        assert_eq!(quote.estimated_output_tokens, 8_000);
        assert_eq!(quote.pricing_model, "gpt-5.2");
        // 23k * 1.75/M + 8k * 14/M = 0.04025 + 0.112
        assert_eq!(quote.cost, "$0.15 USD");
    }

    #[test]
    fn dated_snapshots_quote_at_family_rates() {
        let quote = CostEstimate::from_base_tokens("gpt-5-mini-2025-08-07", 0);
        assert_eq!(quote.model, "gpt-5-mini-2025-08-07");
        assert_eq!(quote.pricing_model, "gpt-5-mini");
        assert_eq!(quote.estimated_input_tokens, 3_000);
        assert_eq!(quote.pricing.output_per_million_usd, 2.0);
    }
}
