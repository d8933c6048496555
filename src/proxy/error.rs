use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Errors a caller of the proxy can observe.
///
/// Accounting and enforcement failures never appear here; they happen after
/// the response is handed back.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Malformed request body, rejected before forwarding.
    #[error("{0}")]
    InvalidRequest(String),

    /// The tenant is paused; no upstream call is made.
    #[error("Monthly budget exhausted, requests are paused")]
    BudgetPaused,

    /// Connection-level failure reaching the upstream.
    #[error("Upstream unreachable: {0}")]
    UpstreamUnreachable(#[source] reqwest::Error),

    /// The upstream answered but its body could not be read.
    #[error("Failed to read upstream response: {0}")]
    UpstreamBody(#[source] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error body: `{"error": {"type", "code", "message"}}`.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorInfo,
}

#[derive(Debug, Serialize)]
pub struct ErrorInfo {
    #[serde(rename = "type")]
    pub error_type: &'static str,
    pub code: &'static str,
    pub message: String,
}

impl ProxyError {
    /// Machine-readable error code, also used as the metric outcome label.
    pub fn code(&self) -> &'static str {
        self.parts().2
    }

    fn parts(&self) -> (StatusCode, &'static str, &'static str) {
        match self {
            ProxyError::InvalidRequest(_) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "invalid_request",
            ),
            ProxyError::BudgetPaused => (
                StatusCode::SERVICE_UNAVAILABLE,
                "budget_error",
                "budget_paused",
            ),
            ProxyError::UpstreamUnreachable(_) => {
                (StatusCode::BAD_GATEWAY, "upstream_error", "upstream_unreachable")
            }
            ProxyError::UpstreamBody(_) => {
                (StatusCode::BAD_GATEWAY, "upstream_error", "upstream_body")
            }
            ProxyError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "internal_error",
            ),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, error_type, code) = self.parts();
        if status.is_server_error() && !matches!(self, ProxyError::BudgetPaused) {
            tracing::warn!(error = %self, code, "Proxy request failed");
        }

        let body = ErrorResponse {
            error: ErrorInfo {
                error_type,
                code,
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_paused_response() {
        let response = ProxyError::BudgetPaused.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "budget_error");
        assert_eq!(json["error"]["code"], "budget_paused");
    }

    #[tokio::test]
    async fn test_invalid_request_response() {
        let response = ProxyError::InvalidRequest("`model` is required".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await["error"]["message"],
            "`model` is required"
        );
    }
}
