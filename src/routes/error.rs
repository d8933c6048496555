use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    db::DbError,
    jobs::ReportError,
    proxy::{ErrorInfo, ErrorResponse},
};

/// Errors from the operational endpoints.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Database error: {0}")]
    Db(#[from] DbError),

    #[error("{0}")]
    Report(#[from] ReportError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, code) = match &self {
            ApiError::Db(_) | ApiError::Report(ReportError::Db(_)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "database_error",
            ),
            ApiError::Report(_) => (StatusCode::BAD_GATEWAY, "report_error", "report_sink_failed"),
        };
        tracing::error!(error = %self, code, "Request failed");

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
