//! Health check and metrics endpoints.

use axum::{Json, extract::State, response::IntoResponse};
use http::StatusCode;
use serde::Serialize;

use super::BudgetStatus;
use crate::AppState;
#[cfg(feature = "prometheus")]
use crate::observability::metrics::get_prometheus_handle;
use crate::observability::metrics::record_budget_pct;

/// Health response: liveness plus the current budget status.
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    /// "healthy" or "unhealthy"
    pub status: &'static str,
    pub version: &'static str,
    #[serde(flatten)]
    pub budget: Option<BudgetStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// `GET /health`
///
/// Returns 503 when the store cannot be read, since spend is then unknown.
#[tracing::instrument(name = "health.check", skip(state))]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let cycle = state.accountant.current_cycle();
    let loaded = match state.db.health_check().await {
        Ok(()) => BudgetStatus::load(&state, cycle).await,
        Err(e) => Err(e),
    };

    match loaded {
        Ok(budget) => {
            record_budget_pct(budget.budget_pct);
            let health = HealthStatus {
                status: "healthy",
                version: env!("CARGO_PKG_VERSION"),
                budget: Some(budget),
                message: None,
            };
            (StatusCode::OK, Json(health))
        }
        Err(e) => {
            tracing::warn!(error = %e, "Health check could not read the store");
            let health = HealthStatus {
                status: "unhealthy",
                version: env!("CARGO_PKG_VERSION"),
                budget: None,
                message: Some("Database unavailable".to_string()),
            };
            (StatusCode::SERVICE_UNAVAILABLE, Json(health))
        }
    }
}

/// Prometheus metrics endpoint.
///
/// Returns metrics in Prometheus text format.
#[tracing::instrument(name = "health.metrics")]
pub async fn metrics() -> impl IntoResponse {
    #[cfg(feature = "prometheus")]
    {
        return match get_prometheus_handle() {
            Some(handle) => {
                let metrics: String = handle.render();
                (
                    StatusCode::OK,
                    [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                    metrics,
                )
            }
            None => (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            ),
        };
    }
    #[cfg(not(feature = "prometheus"))]
    (
        StatusCode::NOT_FOUND,
        [("content-type", "text/plain")],
        "Prometheus metrics not enabled".to_string(),
    )
}
