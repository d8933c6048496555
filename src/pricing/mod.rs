use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Microcents per US dollar. Money is carried as integer microcents
/// (1e-6 USD) so ledger sums stay exact.
pub const MICROCENTS_PER_DOLLAR: i64 = 1_000_000;

/// Pricing information for a specific model.
///
/// Costs are stored in microcents per million tokens. For example,
/// $3 per 1M input tokens is `3_000_000`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ModelPricing {
    /// Cost per 1M input tokens in microcents
    #[serde(default)]
    pub input_per_1m_tokens: i64,

    /// Cost per 1M output tokens in microcents
    #[serde(default)]
    pub output_per_1m_tokens: i64,
}

impl ModelPricing {
    /// Create pricing from dollars per million tokens (the way rate cards are published).
    pub fn from_dollars_per_1m(input: f64, output: f64) -> Self {
        Self {
            input_per_1m_tokens: dollars_to_microcents(input),
            output_per_1m_tokens: dollars_to_microcents(output),
        }
    }
}

/// Token counts reported by the upstream for a single request.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: i64,
    pub output_tokens: i64,
}

impl TokenUsage {
    pub fn new(input_tokens: i64, output_tokens: i64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }
}

/// The cost rate table.
///
/// Lookup is exact on the model id: configured overrides first, then the
/// built-in rate card, then `default`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PricingConfig {
    /// Rate for models with no exact entry.
    #[serde(default = "default_rate")]
    pub default: ModelPricing,

    /// Per-model overrides keyed by exact model id.
    #[serde(default)]
    pub models: HashMap<String, ModelPricing>,

    /// Include the built-in rate card for well-known models.
    #[serde(default = "default_true")]
    pub builtin: bool,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            default: default_rate(),
            models: HashMap::new(),
            builtin: true,
        }
    }
}

impl PricingConfig {
    pub fn validate(&self) -> Result<(), String> {
        let negative = |p: &ModelPricing| p.input_per_1m_tokens < 0 || p.output_per_1m_tokens < 0;
        if negative(&self.default) {
            return Err("pricing.default rates cannot be negative".into());
        }
        if let Some((model, _)) = self.models.iter().find(|(_, p)| negative(p)) {
            return Err(format!("pricing.models.\"{model}\" rates cannot be negative"));
        }
        Ok(())
    }

    /// Rate for `model`, falling back to the default rate.
    pub fn rate_for(&self, model: &str) -> ModelPricing {
        if let Some(pricing) = self.models.get(model) {
            return *pricing;
        }
        if self.builtin
            && let Some(pricing) = builtin_rate(model)
        {
            return pricing;
        }
        self.default
    }

    /// Whether `model` has an exact entry (override or built-in).
    pub fn is_known(&self, model: &str) -> bool {
        self.models.contains_key(model) || (self.builtin && builtin_rate(model).is_some())
    }

    /// Cost of a request in microcents.
    ///
    /// Non-negative and non-decreasing in both token counts for non-negative
    /// input. Negative counts are a caller error.
    pub fn compute_cost(&self, model: &str, input_tokens: i64, output_tokens: i64) -> i64 {
        let pricing = self.rate_for(model);
        let total = (input_tokens as i128 * pricing.input_per_1m_tokens as i128) / 1_000_000
            + (output_tokens as i128 * pricing.output_per_1m_tokens as i128) / 1_000_000;
        saturate_to_i64(total)
    }

    pub fn compute_usage_cost(&self, model: &str, usage: &TokenUsage) -> i64 {
        self.compute_cost(model, usage.input_tokens, usage.output_tokens)
    }
}

/// Published per-1M-token rates for common Anthropic models.
fn builtin_rate(model: &str) -> Option<ModelPricing> {
    let (input, output) = match model {
        "claude-opus-4-5" | "claude-opus-4-5-20251101" => (5.0, 25.0),
        "claude-opus-4-1" | "claude-opus-4-1-20250805" => (15.0, 75.0),
        "claude-opus-4-0" | "claude-opus-4-20250514" => (15.0, 75.0),
        "claude-3-opus-latest" | "claude-3-opus-20240229" => (15.0, 75.0),
        "claude-sonnet-4-5" | "claude-sonnet-4-5-20250929" => (3.0, 15.0),
        "claude-sonnet-4-0" | "claude-sonnet-4-20250514" => (3.0, 15.0),
        "claude-3-7-sonnet-latest" | "claude-3-7-sonnet-20250219" => (3.0, 15.0),
        "claude-3-5-sonnet-latest" | "claude-3-5-sonnet-20241022" => (3.0, 15.0),
        "claude-haiku-4-5" | "claude-haiku-4-5-20251001" => (1.0, 5.0),
        "claude-3-5-haiku-latest" | "claude-3-5-haiku-20241022" => (0.8, 4.0),
        "claude-3-haiku-20240307" => (0.25, 1.25),
        _ => return None,
    };
    Some(ModelPricing::from_dollars_per_1m(input, output))
}

fn default_rate() -> ModelPricing {
    ModelPricing::from_dollars_per_1m(3.0, 15.0)
}

fn default_true() -> bool {
    true
}

/// Convert dollars to microcents
pub fn dollars_to_microcents(dollars: f64) -> i64 {
    (dollars * MICROCENTS_PER_DOLLAR as f64).round() as i64
}

/// Convert microcents to dollars
pub fn microcents_to_dollars(microcents: i64) -> f64 {
    microcents as f64 / MICROCENTS_PER_DOLLAR as f64
}

/// Spend as a percentage of the limit, rounded to two decimals for display.
pub fn percent_of(spend_microcents: i64, limit_microcents: i64) -> f64 {
    if limit_microcents <= 0 {
        return 0.0;
    }
    let pct = spend_microcents as f64 * 100.0 / limit_microcents as f64;
    (pct * 100.0).round() / 100.0
}

/// Saturate an i128 value to fit in an i64
fn saturate_to_i64(value: i128) -> i64 {
    if value > i64::MAX as i128 {
        i64::MAX
    } else if value < i64::MIN as i128 {
        i64::MIN
    } else {
        value as i64
    }
}
