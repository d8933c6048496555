//! On-demand daily report.

use axum::{
    Json,
    extract::{Query, State},
};
use chrono::NaiveDate;
use serde::Deserialize;

use super::ApiError;
use crate::{
    AppState,
    jobs::{DailyReport, previous_day},
};

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    /// Day to report, `YYYY-MM-DD`. Defaults to yesterday (UTC).
    pub date: Option<NaiveDate>,
}

/// `POST /report`
///
/// Builds and sends the report outside the schedule and returns the payload.
#[tracing::instrument(name = "report.trigger", skip(state))]
pub async fn trigger_report(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
) -> Result<Json<DailyReport>, ApiError> {
    let date = query.date.unwrap_or_else(previous_day);
    Ok(Json(state.reporter.run(date).await?))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use chrono::Utc;
    use http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    use crate::tests::{TestApp, test_config};

    async fn post_report(app: &TestApp, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = app.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_report_for_today_is_sent() {
        let sink = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/daily"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&sink)
            .await;

        let mut config = test_config("http://127.0.0.1:9", 40);
        config.reporting.url = Some(format!("{}/daily", sink.uri()));
        let app = TestApp::new(config).await;
        app.record_cost("claude-sonnet-4-5", 3).await;

        let today = Utc::now().date_naive();
        let (status, body) = post_report(&app, &format!("/report?date={today}")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["type"], "daily_report");
        assert_eq!(body["tenant"], "acme");
        assert_eq!(body["date"], today.to_string());
        assert_eq!(body["spend"], 3.0);
        assert_eq!(body["request_count"], 1);

        let sent = sink.received_requests().await.unwrap();
        let sent: Value = serde_json::from_slice(&sent[0].body).unwrap();
        assert_eq!(sent, body);
    }

    #[tokio::test]
    async fn test_report_defaults_to_yesterday_without_sink() {
        let app = TestApp::new(test_config("http://127.0.0.1:9", 40)).await;

        let (status, body) = post_report(&app, "/report").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["date"], crate::jobs::previous_day().to_string());
        assert_eq!(body["request_count"], 0);
    }

    #[tokio::test]
    async fn test_report_sink_failure_is_bad_gateway() {
        let sink = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&sink)
            .await;

        let mut config = test_config("http://127.0.0.1:9", 40);
        config.reporting.url = Some(sink.uri());
        let app = TestApp::new(config).await;

        let (status, body) = post_report(&app, "/report").await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["code"], "report_sink_failed");
    }

    #[tokio::test]
    async fn test_report_rejects_bad_date() {
        let app = TestApp::new(test_config("http://127.0.0.1:9", 40)).await;

        let (status, _) = post_report(&app, "/report?date=yesterday").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
