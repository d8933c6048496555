//! Proxy core: the metered endpoint and the unmetered passthrough.

mod error;
mod headers;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, Method, Uri},
    response::Response,
};
pub use error::*;
use futures_util::StreamExt;
pub use headers::*;
use serde_json::Value;

use crate::{
    AppState,
    observability::metrics,
    streaming::{UsageTrackingStream, extract_buffered},
};

/// The parts of a metered request body the proxy looks at.
#[derive(Debug)]
struct MeteredRequest {
    body: serde_json::Map<String, Value>,
    model: String,
    stream: bool,
}

impl MeteredRequest {
    fn parse(bytes: &[u8]) -> Result<Self, ProxyError> {
        let body = match serde_json::from_slice::<Value>(bytes) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                return Err(ProxyError::InvalidRequest(
                    "Request body must be a JSON object".into(),
                ));
            }
            Err(e) => {
                return Err(ProxyError::InvalidRequest(format!(
                    "Request body is not valid JSON: {e}"
                )));
            }
        };
        let model = match body.get("model") {
            Some(Value::String(model)) if !model.is_empty() => model.clone(),
            _ => {
                return Err(ProxyError::InvalidRequest(
                    "`model` is required and must be a string".into(),
                ));
            }
        };
        let stream = body.get("stream").and_then(Value::as_bool).unwrap_or(false);
        Ok(Self {
            body,
            model,
            stream,
        })
    }
}

/// `POST <metered path>`: gate, downgrade, forward, relay, account.
#[tracing::instrument(
    name = "proxy.metered",
    skip_all,
    fields(model = tracing::field::Empty, stream = tracing::field::Empty)
)]
pub async fn metered(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let request = match MeteredRequest::parse(&body) {
        Ok(request) => request,
        Err(e) => {
            metrics::record_metered_request(e.code(), false);
            return Err(e);
        }
    };
    let span = tracing::Span::current();
    span.record("model", request.model.as_str());
    span.record("stream", request.stream);

    let stream = request.stream;
    let result = relay_metered(state, uri, headers, request, body).await;
    metrics::record_metered_request(metered_outcome(&result), stream);
    result
}

/// Metric label for a finished metered request.
fn metered_outcome(result: &Result<Response, ProxyError>) -> &'static str {
    match result {
        Ok(_) => "relayed",
        Err(e) => e.code(),
    }
}

async fn relay_metered(
    state: AppState,
    uri: Uri,
    headers: HeaderMap,
    mut request: MeteredRequest,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let enforcer = state.accountant.enforcer();
    let budget = match enforcer
        .current_state(state.accountant.current_cycle())
        .await
    {
        Ok(budget) => Some(budget),
        Err(e) => {
            tracing::warn!(error = %e, "Budget state unreadable, request not gated");
            None
        }
    };

    if budget.as_ref().is_some_and(|b| b.is_paused()) {
        // Re-run enforcement so the stop action is re-attempted, and so a
        // corrected ledger can lift the pause.
        let accountant = state.accountant.clone();
        state.task_tracker.spawn(async move {
            if let Err(e) = accountant.recheck().await {
                tracing::error!(error = %e, "Re-enforcement after paused request failed");
            }
        });
        return Err(ProxyError::BudgetPaused);
    }

    let downgraded = budget.as_ref().is_some_and(|b| b.downgraded);
    let forward_body = if downgraded && state.config.budget.is_premium(&request.model) {
        let target = state.config.budget.downgrade_model.clone();
        tracing::info!(from = %request.model, to = %target, "Downgrading premium model");
        metrics::record_downgrade(&request.model, &target);
        request
            .body
            .insert("model".to_string(), Value::String(target.clone()));
        request.model = target;
        Bytes::from(
            serde_json::to_vec(&request.body)
                .map_err(|e| ProxyError::Internal(format!("failed to encode request: {e}")))?,
        )
    } else {
        body
    };

    let upstream = &state.config.upstream;
    let path_and_query = uri.path_and_query().map_or(uri.path(), |pq| pq.as_str());
    let response = state
        .http_client
        .post(upstream.url_for(path_and_query))
        .headers(upstream_headers(upstream, &headers, Forwarding::Safelist)?)
        .body(forward_body)
        .send()
        .await
        .map_err(ProxyError::UpstreamUnreachable)?;

    let status = response.status();
    let relay_headers = response_headers(response.headers());
    let accountant = state.accountant.clone();
    let model = request.model;

    let body = if request.stream {
        let stream = response
            .bytes_stream()
            .map(|r| r.map_err(std::io::Error::other))
            .boxed();
        Body::from_stream(UsageTrackingStream::new(
            stream,
            accountant,
            model,
            state.task_tracker.clone(),
        ))
    } else {
        let bytes = response.bytes().await.map_err(ProxyError::UpstreamBody)?;
        if status.is_success() {
            let extracted = extract_buffered(&bytes);
            state.task_tracker.spawn(async move {
                accountant.account(extracted, &model).await;
            });
        }
        Body::from(bytes)
    };

    build_response(status, relay_headers, body)
}

/// Any other path: forwarded verbatim, relayed verbatim, never accounted.
#[tracing::instrument(
    name = "proxy.passthrough",
    skip_all,
    fields(method = %method, path = %uri.path())
)]
pub async fn passthrough(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let upstream = &state.config.upstream;
    let path_and_query = uri.path_and_query().map_or(uri.path(), |pq| pq.as_str());

    let response = state
        .http_client
        .request(method, upstream.url_for(path_and_query))
        .headers(upstream_headers(upstream, &headers, Forwarding::All)?)
        .body(body)
        .send()
        .await
        .map_err(ProxyError::UpstreamUnreachable)?;

    let status = response.status();
    let relay_headers = response_headers(response.headers());
    let body = Body::from_stream(response.bytes_stream());
    build_response(status, relay_headers, body)
}

fn build_response(
    status: axum::http::StatusCode,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, ProxyError> {
    let mut response = Response::builder()
        .status(status)
        .body(body)
        .map_err(|e| ProxyError::Internal(format!("failed to build response: {e}")))?;
    *response.headers_mut() = headers;
    Ok(response)
}
