//! Prometheus metrics for the proxy.
//!
//! Provides metrics for:
//! - Metered requests by outcome
//! - Accounted tokens and cost
//! - Enforcement actions and side-effect failures
//!
//! Every recording function is a no-op unless built with `prometheus`.

#[cfg(feature = "prometheus")]
use std::sync::OnceLock;

#[cfg(feature = "prometheus")]
use metrics::{counter, gauge};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::{config::MetricsConfig, pricing::TokenUsage};

/// Global Prometheus handle for the metrics endpoint.
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the metrics system with the given configuration.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(MetricsError::Install)?;

    PROMETHEUS_HANDLE
        .set(handle)
        .map_err(|_| MetricsError::Setup("Metrics already initialized".to_string()))?;

    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(_config: &MetricsConfig) -> Result<(), MetricsError> {
    Ok(())
}

/// Get the Prometheus handle for rendering metrics.
#[cfg(feature = "prometheus")]
pub fn get_prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric Recording Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Record a metered request outcome ("relayed", "paused", "invalid", "upstream_error").
pub fn record_metered_request(outcome: &str, streaming: bool) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "tollgate_metered_requests_total",
            "outcome" => outcome.to_string(),
            "streaming" => streaming.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (outcome, streaming);
    }
}

/// Record a request forwarded with a substituted model.
pub fn record_downgrade(from: &str, to: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "tollgate_model_downgrades_total",
            "from" => from.to_string(),
            "to" => to.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (from, to);
    }
}

/// Record how a relayed stream ended ("completed", "error", "dropped").
pub fn record_stream_end(outcome: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("tollgate_streams_total", "outcome" => outcome.to_string()).increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = outcome;
    }
}

/// Record one accounted usage record.
pub fn record_accounted_usage(model: &str, usage: &TokenUsage, cost_microcents: i64) {
    #[cfg(feature = "prometheus")]
    {
        let model = model.to_string();
        counter!("tollgate_input_tokens_total", "model" => model.clone())
            .increment(usage.input_tokens.max(0) as u64);
        counter!("tollgate_output_tokens_total", "model" => model.clone())
            .increment(usage.output_tokens.max(0) as u64);
        counter!("tollgate_cost_microcents_total", "model" => model)
            .increment(cost_microcents.max(0) as u64);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (model, usage, cost_microcents);
    }
}

/// Record a usage record lost to an accounting failure.
pub fn record_accounting_failure() {
    #[cfg(feature = "prometheus")]
    {
        counter!("tollgate_accounting_failures_total").increment(1);
    }
}

/// Record an enforcement action being fired.
pub fn record_enforcement_action(level: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("tollgate_enforcement_actions_total", "level" => level.to_string()).increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = level;
    }
}

/// Record a failed side effect ("alert", "notify", "stop", "report").
pub fn record_side_effect_failure(kind: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("tollgate_side_effect_failures_total", "kind" => kind.to_string()).increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = kind;
    }
}

/// Record the current cycle spend as a percentage of the limit.
pub fn record_budget_pct(pct: f64) {
    #[cfg(feature = "prometheus")]
    {
        gauge!("tollgate_budget_pct").set(pct);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = pct;
    }
}

/// Metrics initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[cfg(feature = "prometheus")]
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}
