//! Configuration module for the metering proxy.
//!
//! The proxy is configured via a TOML file, with support for environment
//! variable interpolation using `${VAR_NAME}` syntax. The parsed config is
//! built once at startup and handed to every component through `AppState`.
//!
//! # Example
//!
//! ```toml
//! tenant_id = "acme"
//!
//! [upstream]
//! api_key = "${ANTHROPIC_API_KEY}"
//!
//! [budget]
//! monthly_limit_usd = "40"
//! cycle_start_day = 1
//! ```

mod budget;
mod database;
mod enforcement;
mod observability;
mod server;
mod upstream;

use std::path::Path;

pub use budget::*;
pub use database::*;
pub use enforcement::*;
pub use observability::*;
use serde::{Deserialize, Serialize};
pub use server::*;
pub use upstream::*;

/// Root configuration for the proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TollgateConfig {
    /// Tenant identifier used in alerts, reports and stop actions.
    #[serde(default = "default_tenant_id")]
    pub tenant_id: String,

    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Durable store for usage records and budget state.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Upstream AI API.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Monthly budget and downgrade policy.
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Cost rate table.
    #[serde(default)]
    pub pricing: crate::pricing::PricingConfig,

    /// Alert, notifier and stop-action collaborators.
    #[serde(default)]
    pub enforcement: EnforcementConfig,

    /// Daily report delivery.
    #[serde(default)]
    pub reporting: ReportingConfig,

    /// Observability configuration (logging, metrics).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl TollgateConfig {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables in the format `${VAR_NAME}` are expanded.
    /// Missing required variables will cause an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;
        let config: TollgateConfig = toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency and completeness.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.tenant_id.trim().is_empty() {
            return Err(ConfigError::Validation("tenant_id cannot be empty".into()));
        }

        self.database.validate()?;
        self.upstream.validate()?;
        self.budget.validate()?;
        self.pricing.validate().map_err(ConfigError::Validation)?;
        self.enforcement.validate()?;
        self.reporting.validate()?;

        if self.budget.is_premium(&self.budget.downgrade_model) {
            return Err(ConfigError::Validation(format!(
                "budget.downgrade_model '{}' is itself a premium model",
                self.budget.downgrade_model
            )));
        }

        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

fn default_tenant_id() -> String {
    "default".to_string()
}

/// Expand environment variables in the format `${VAR_NAME}`.
/// Skips commented lines (lines where content before the variable is a comment).
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    static ENV_VAR: std::sync::LazyLock<regex::Regex> = std::sync::LazyLock::new(|| {
        regex::Regex::new(r"\$\{([^}]+)\}").expect("static regex is valid")
    });
    let mut result = String::with_capacity(input.len());

    for line in input.lines() {
        let comment_pos = line.find('#');
        let mut last_end = 0;

        for cap in ENV_VAR.captures_iter(line) {
            let Some(whole) = cap.get(0) else { continue };

            // Skip if this variable is inside a comment
            if let Some(pos) = comment_pos
                && whole.start() >= pos
            {
                continue;
            }

            result.push_str(&line[last_end..whole.start()]);

            let var_name = &cap[1];
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
            result.push_str(&value);

            last_end = whole.end();
        }

        result.push_str(&line[last_end..]);
        result.push('\n');
    }

    // Remove trailing newline if input didn't have one
    if !input.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }

    Ok(result)
}
