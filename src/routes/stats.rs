//! Spend breakdown for the current billing cycle.

use axum::{Json, extract::State};
use chrono::NaiveDate;
use serde::Serialize;

use super::{ApiError, BudgetStatus};
use crate::{AppState, jobs::ModelReportLine, pricing::microcents_to_dollars};

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub budget: BudgetStatus,
    pub billing_cycle_start: Option<NaiveDate>,
    pub daily_breakdown: Vec<DailyLine>,
    pub model_breakdown: Vec<ModelReportLine>,
}

#[derive(Debug, Serialize)]
pub struct DailyLine {
    pub date: NaiveDate,
    pub spend: f64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub request_count: i64,
}

/// `GET /stats`
#[tracing::instrument(name = "stats.get", skip(state))]
pub async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let cycle = state.accountant.current_cycle();
    let usage = state.db.usage();

    let budget = BudgetStatus::load(&state, cycle).await?;
    let daily_breakdown = usage
        .daily_breakdown(&cycle)
        .await?
        .into_iter()
        .map(|d| DailyLine {
            date: d.date,
            spend: microcents_to_dollars(d.cost_microcents),
            input_tokens: d.input_tokens,
            output_tokens: d.output_tokens,
            request_count: d.request_count,
        })
        .collect();
    let model_breakdown = usage
        .model_breakdown(&cycle)
        .await?
        .into_iter()
        .map(ModelReportLine::from)
        .collect();

    Ok(Json(StatsResponse {
        budget,
        billing_cycle_start: cycle.start_date(state.config.budget.cycle_start_day),
        daily_breakdown,
        model_breakdown,
    }))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::tests::{TestApp, test_config};

    async fn get_stats(app: &TestApp) -> (StatusCode, Value) {
        let request = Request::builder()
            .uri("/stats")
            .body(Body::empty())
            .unwrap();
        let response = app.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_stats_breakdowns() {
        let app = TestApp::new(test_config("http://127.0.0.1:9", 40)).await;
        app.record_cost("claude-opus-4-1", 15).await;
        app.record_cost("claude-sonnet-4-5", 5).await;
        app.record_cost("claude-sonnet-4-5", 5).await;

        let (status, body) = get_stats(&app).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["monthly_spend"], 25.0);
        assert_eq!(body["budget_limit"], 40.0);
        assert_eq!(body["budget_pct"], 62.5);
        assert!(body["billing_cycle_start"].is_string());

        let daily = body["daily_breakdown"].as_array().unwrap();
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0]["spend"], 25.0);
        assert_eq!(daily[0]["request_count"], 3);

        let models = body["model_breakdown"].as_array().unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models[0]["model"], "claude-opus-4-1");
        assert_eq!(models[1]["model"], "claude-sonnet-4-5");
        assert_eq!(models[1]["spend"], 10.0);
        assert_eq!(models[1]["request_count"], 2);
    }

    #[tokio::test]
    async fn test_stats_empty_cycle() {
        let app = TestApp::new(test_config("http://127.0.0.1:9", 40)).await;

        let (status, body) = get_stats(&app).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["monthly_spend"], 0.0);
        assert!(body["daily_breakdown"].as_array().unwrap().is_empty());
        assert!(body["model_breakdown"].as_array().unwrap().is_empty());
    }
}
