//! Model pricing registry.
//!
//! Static pricing data for cost projection. Rates are USD per million tokens.

use std::collections::HashMap;
use std::sync::OnceLock;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Pricing information for a model family.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingRecord {
    pub input_per_million_usd: f64,
    pub output_per_million_usd: f64,
}

impl PricingRecord {
    const fn new(input: f64, output: f64) -> Self {
        Self {
            input_per_million_usd: input,
            output_per_million_usd: output,
        }
    }

    /// Linear USD cost; negative counts are treated as zero.
    pub fn calculate_cost_usd(&self, input_tokens: i64, output_tokens: i64) -> f64 {
        let input = input_tokens.max(0) as f64 / 1_000_000.0 * self.input_per_million_usd;
        let output = output_tokens.max(0) as f64 / 1_000_000.0 * self.output_per_million_usd;
        input + output
    }
}

// =============================================================================
// PRICING DATA
// =============================================================================

/// Family used when a model id cannot be resolved.
pub const DEFAULT_PRICING_MODEL: &str = "gpt-5.2";

const GPT_5_2: PricingRecord = PricingRecord::new(1.75, 14.0);
const GPT_5_2_PRO: PricingRecord = PricingRecord::new(21.0, 168.0);
const GPT_5_1: PricingRecord = PricingRecord::new(1.25, 10.0);
const GPT_5: PricingRecord = PricingRecord::new(1.25, 10.0);
const GPT_5_MINI: PricingRecord = PricingRecord::new(0.25, 2.0);
const GPT_5_NANO: PricingRecord = PricingRecord::new(0.05, 0.4);
const O4_MINI: PricingRecord = PricingRecord::new(1.1, 4.4);

/// Prefix → family. Resolution takes the longest matching prefix.
const FAMILY_PREFIXES: &[(&str, &str)] = &[
    ("gpt-5.2-pro", "gpt-5.2-pro"),
    ("gpt-5.2-codex", "gpt-5.2-codex"),
    ("gpt-5.2-chat", "gpt-5.2-chat-latest"),
    ("gpt-5.2", "gpt-5.2"),
    ("gpt-5.1", "gpt-5.1"),
    ("gpt-5-mini", "gpt-5-mini"),
    ("gpt-5-nano", "gpt-5-nano"),
    ("gpt-5", "gpt-5"),
    ("o4-mini", "o4-mini"),
];

static PRICING_MAP: OnceLock<HashMap<&'static str, PricingRecord>> = OnceLock::new();

static DATE_SNAPSHOT_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)-\d{4}-\d{2}-\d{2}$").expect("valid date suffix regex"));

fn init_pricing() -> HashMap<&'static str, PricingRecord> {
    let mut map = HashMap::new();

    map.insert("gpt-5.2", GPT_5_2);
    map.insert("gpt-5.2-chat-latest", GPT_5_2);
    map.insert("gpt-5.2-codex", GPT_5_2);
    map.insert("gpt-5.2-pro", GPT_5_2_PRO);
    map.insert("gpt-5.1", GPT_5_1);
    map.insert("gpt-5", GPT_5);
    map.insert("gpt-5-mini", GPT_5_MINI);
    map.insert("gpt-5-nano", GPT_5_NANO);
    map.insert("o4-mini", O4_MINI);

    map
}

fn pricing_map() -> &'static HashMap<&'static str, PricingRecord> {
    PRICING_MAP.get_or_init(init_pricing)
}

/// Get pricing for an exact family name.
pub fn get_pricing(family: &str) -> Option<PricingRecord> {
    pricing_map().get(family).copied()
}

/// The record used for unresolved models.
pub fn default_pricing() -> PricingRecord {
    GPT_5_2
}

/// Remove a trailing `-YYYY-MM-DD` snapshot suffix.
pub fn strip_date_snapshot_suffix(model: &str) -> &str {
    match DATE_SNAPSHOT_SUFFIX.find(model) {
        Some(m) => &model[..m.start()],
        None => model,
    }
}

/// Resolve a model identifier to a known pricing family name.
pub fn resolve_pricing_model(model: &str) -> &'static str {
    let normalized = model.trim().to_lowercase();
    let map = pricing_map();

    if let Some((family, _)) = map.get_key_value(normalized.as_str()) {
        return family;
    }

    let without_date = strip_date_snapshot_suffix(&normalized);
    if let Some((family, _)) = map.get_key_value(without_date) {
        return family;
    }

    FAMILY_PREFIXES
        .iter()
        .filter(|(prefix, _)| without_date.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, family)| *family)
        .unwrap_or(DEFAULT_PRICING_MODEL)
}

/// Estimate the USD cost of a text generation.
///
/// Returns `(cost_usd, pricing_model, record)`.
pub fn estimate_text_token_cost_usd(
    model: &str,
    input_tokens: i64,
    output_tokens: i64,
) -> (f64, &'static str, PricingRecord) {
    let pricing_model = resolve_pricing_model(model);
    let pricing = get_pricing(pricing_model).unwrap_or_else(default_pricing);
    (
        pricing.calculate_cost_usd(input_tokens, output_tokens),
        pricing_model,
        pricing,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_family_resolves_to_itself() {
        assert_eq!(resolve_pricing_model("gpt-5-nano"), "gpt-5-nano");
        assert_eq!(resolve_pricing_model("  GPT-5.2-Pro "), "gpt-5.2-pro");
    }

    #[test]
    fn date_suffixed_model_resolves_to_unsuffixed_family() {
        assert_eq!(resolve_pricing_model("gpt-5-mini-2025-08-07"), "gpt-5-mini");
        assert_eq!(resolve_pricing_model("o4-mini-2025-04-16"), "o4-mini");
    }

    #[test]
    fn longest_prefix_wins() {
        assert_eq!(resolve_pricing_model("gpt-5.2-chat-preview"), "gpt-5.2-chat-latest");
        assert_eq!(resolve_pricing_model("gpt-5-mini-high"), "gpt-5-mini");
        assert_eq!(resolve_pricing_model("gpt-5-turbo"), "gpt-5");
        assert_eq!(resolve_pricing_model("gpt-5.2-pro-max"), "gpt-5.2-pro");
    }

    #[test]
    fn unknown_model_falls_back_to_default() {
        assert_eq!(resolve_pricing_model("claude-opus"), DEFAULT_PRICING_MODEL);
        let (_, family, record) = estimate_text_token_cost_usd("mystery-model", 1, 1);
        assert_eq!(family, "gpt-5.2");
        assert_eq!(record, default_pricing());
    }

    #[test]
    fn cost_is_linear_in_tokens() {
        // 1M input at $0.25 + 1M output at $2.00
        let (cost, family, _) = estimate_text_token_cost_usd("gpt-5-mini", 1_000_000, 1_000_000);
        assert_eq!(family, "gpt-5-mini");
        assert!((cost - 2.25).abs() < 1e-9, "got {cost}");
    }

    #[test]
    fn negative_token_counts_cost_nothing() {
        let record = get_pricing("gpt-5").unwrap();
        assert_eq!(record.calculate_cost_usd(-10, -10), 0.0);
    }

    #[test]
    fn strip_date_suffix_only_touches_trailing_dates() {
        assert_eq!(strip_date_snapshot_suffix("gpt-5-2025-08-07"), "gpt-5");
        assert_eq!(strip_date_snapshot_suffix("gpt-5-2025-08-07-x"), "gpt-5-2025-08-07-x");
    }
}
