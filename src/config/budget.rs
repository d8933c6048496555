use rust_decimal::{Decimal, prelude::ToPrimitive};
use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::pricing::MICROCENTS_PER_DOLLAR;

/// Monthly budget and downgrade policy for the tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BudgetConfig {
    /// Monthly budget in USD. Must be greater than zero.
    #[serde(default)]
    pub monthly_limit_usd: Decimal,

    /// Day of month (1-28) on which a new billing cycle starts.
    #[serde(default = "default_cycle_start_day")]
    pub cycle_start_day: u32,

    /// Premium model family. A requested model matches when it equals an
    /// entry or starts with it.
    #[serde(default = "default_premium_models")]
    pub premium_models: Vec<String>,

    /// Model substituted for premium requests once the budget is exceeded.
    #[serde(default = "default_downgrade_model")]
    pub downgrade_model: String,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            monthly_limit_usd: Decimal::ZERO,
            cycle_start_day: default_cycle_start_day(),
            premium_models: default_premium_models(),
            downgrade_model: default_downgrade_model(),
        }
    }
}

impl BudgetConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.monthly_limit_usd <= Decimal::ZERO {
            return Err(ConfigError::Validation(
                "budget.monthly_limit_usd must be greater than zero".into(),
            ));
        }
        if self.limit_microcents().is_none() {
            return Err(ConfigError::Validation(
                "budget.monthly_limit_usd is out of range".into(),
            ));
        }
        if !(1..=28).contains(&self.cycle_start_day) {
            return Err(ConfigError::Validation(format!(
                "budget.cycle_start_day must be between 1 and 28, got {}",
                self.cycle_start_day
            )));
        }
        if !self.premium_models.is_empty() && self.downgrade_model.trim().is_empty() {
            return Err(ConfigError::Validation(
                "budget.downgrade_model is required when premium_models is set".into(),
            ));
        }
        Ok(())
    }

    /// Budget limit in microcents. `None` if the configured amount overflows.
    pub fn limit_microcents(&self) -> Option<i64> {
        (self.monthly_limit_usd * Decimal::from(MICROCENTS_PER_DOLLAR))
            .round()
            .to_i64()
    }

    /// Whether `model` belongs to the premium family (exact or prefix match).
    pub fn is_premium(&self, model: &str) -> bool {
        self.premium_models
            .iter()
            .any(|p| !p.is_empty() && model.starts_with(p.as_str()))
    }
}

fn default_cycle_start_day() -> u32 {
    1
}

fn default_premium_models() -> Vec<String> {
    vec!["claude-opus".to_string()]
}

fn default_downgrade_model() -> String {
    "claude-sonnet-4-5".to_string()
}

#[cfg(test)]
mod tests {
    use rust_decimal::dec;

    use super::*;

    fn config_with_limit(limit: Decimal) -> BudgetConfig {
        BudgetConfig {
            monthly_limit_usd: limit,
            ..Default::default()
        }
    }

    #[test]
    fn test_limit_microcents() {
        assert_eq!(config_with_limit(dec!(40)).limit_microcents(), Some(40_000_000));
        assert_eq!(config_with_limit(dec!(0.5)).limit_microcents(), Some(500_000));
    }

    #[test]
    fn test_zero_limit_rejected() {
        let err = config_with_limit(Decimal::ZERO).validate().unwrap_err();
        assert!(err.to_string().contains("monthly_limit_usd"));
    }

    #[test]
    fn test_cycle_start_day_bounds() {
        let mut config = config_with_limit(dec!(10));
        config.cycle_start_day = 29;
        assert!(config.validate().is_err());
        config.cycle_start_day = 0;
        assert!(config.validate().is_err());
        config.cycle_start_day = 28;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_premium_matching_is_exact_or_prefix() {
        let config = BudgetConfig {
            premium_models: vec!["claude-opus".into(), "gpt-5".into()],
            ..config_with_limit(dec!(10))
        };

        assert!(config.is_premium("claude-opus"));
        assert!(config.is_premium("claude-opus-4-1-20250805"));
        assert!(config.is_premium("gpt-5"));
        assert!(!config.is_premium("claude-sonnet-4-5"));
        assert!(!config.is_premium("claude"));
    }

    #[test]
    fn test_limit_parses_from_string_or_number() {
        let from_str: BudgetConfig = toml::from_str(r#"monthly_limit_usd = "40.50""#).unwrap();
        assert_eq!(from_str.monthly_limit_usd, dec!(40.50));

        let from_int: BudgetConfig = toml::from_str("monthly_limit_usd = 40").unwrap();
        assert_eq!(from_int.limit_microcents(), Some(40_000_000));
    }
}
