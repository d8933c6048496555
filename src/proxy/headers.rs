//! Header hygiene for both proxy paths.
//!
//! The caller's credentials never reach the upstream; the proxy's own
//! credential is always injected instead.

use axum::http::{HeaderMap, HeaderName, HeaderValue, header};

use super::ProxyError;
use crate::config::UpstreamConfig;

/// Connection-scoped headers that must not cross a proxy.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Caller-supplied credentials, always stripped.
const CREDENTIALS: &[&str] = &["authorization", "x-api-key"];

/// Which caller headers reach the upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forwarding {
    /// Only the configured safelist (metered path).
    Safelist,
    /// Everything except hop-by-hop and credentials (passthrough path).
    All,
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Build the upstream request headers.
pub fn upstream_headers(
    config: &UpstreamConfig,
    incoming: &HeaderMap,
    forwarding: Forwarding,
) -> Result<HeaderMap, ProxyError> {
    let mut headers = HeaderMap::new();

    for (name, value) in incoming {
        if is_hop_by_hop(name)
            || name == header::HOST
            || name == header::CONTENT_LENGTH
            || CREDENTIALS.contains(&name.as_str())
            || name.as_str().eq_ignore_ascii_case(&config.auth_header)
        {
            continue;
        }
        if forwarding == Forwarding::Safelist && !config.forwards(name.as_str()) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    for (name, value) in &config.default_headers {
        let name = HeaderName::try_from(name.as_str())
            .map_err(|_| ProxyError::Internal(format!("invalid default header name '{name}'")))?;
        if !headers.contains_key(&name) {
            let value = HeaderValue::try_from(value.as_str()).map_err(|_| {
                ProxyError::Internal(format!("invalid value for default header '{name}'"))
            })?;
            headers.insert(name, value);
        }
    }

    let auth_name = HeaderName::try_from(config.auth_header.as_str())
        .map_err(|_| ProxyError::Internal("invalid upstream auth header name".into()))?;
    let credential = if auth_name == header::AUTHORIZATION {
        format!("Bearer {}", config.api_key)
    } else {
        config.api_key.clone()
    };
    let mut credential = HeaderValue::try_from(credential).map_err(|_| {
        ProxyError::Internal("upstream credential is not a valid header value".into())
    })?;
    credential.set_sensitive(true);
    headers.insert(auth_name, credential);

    Ok(headers)
}

/// Upstream response headers relayed to the caller.
///
/// `content-length` is dropped because the body is re-framed by the server.
pub fn response_headers(upstream: &HeaderMap) -> HeaderMap {
    upstream
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name) && *name != header::CONTENT_LENGTH)
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> UpstreamConfig {
        UpstreamConfig {
            api_key: "sk-proxy".into(),
            ..Default::default()
        }
    }

    fn incoming() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers.insert("x-api-key", HeaderValue::from_static("sk-caller"));
        headers.insert("authorization", HeaderValue::from_static("Bearer caller"));
        headers.insert("host", HeaderValue::from_static("proxy.local"));
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("content-length", HeaderValue::from_static("12"));
        headers.insert("x-custom", HeaderValue::from_static("1"));
        headers.insert("anthropic-beta", HeaderValue::from_static("tools-2024"));
        headers
    }

    #[test]
    fn test_safelist_forwarding() {
        let headers = upstream_headers(&config(), &incoming(), Forwarding::Safelist).unwrap();

        assert_eq!(headers["x-api-key"], "sk-proxy");
        assert_eq!(headers["content-type"], "application/json");
        assert_eq!(headers["anthropic-beta"], "tools-2024");
        assert_eq!(headers["anthropic-version"], "2023-06-01");
        assert!(!headers.contains_key("authorization"));
        assert!(!headers.contains_key("x-custom"));
        assert!(!headers.contains_key("host"));
        assert!(!headers.contains_key("connection"));
        assert!(!headers.contains_key("content-length"));
    }

    #[test]
    fn test_passthrough_forwards_everything_but_credentials() {
        let headers = upstream_headers(&config(), &incoming(), Forwarding::All).unwrap();

        assert_eq!(headers["x-custom"], "1");
        assert_eq!(headers["x-api-key"], "sk-proxy");
        assert_eq!(headers.get_all("x-api-key").iter().count(), 1);
        assert!(!headers.contains_key("authorization"));
        assert!(!headers.contains_key("connection"));
    }

    #[test]
    fn test_caller_version_header_wins_over_default() {
        let mut incoming = incoming();
        incoming.insert("anthropic-version", HeaderValue::from_static("2024-01-01"));
        let headers = upstream_headers(&config(), &incoming, Forwarding::Safelist).unwrap();
        assert_eq!(headers["anthropic-version"], "2024-01-01");
    }

    #[test]
    fn test_bearer_auth_header() {
        let config = UpstreamConfig {
            auth_header: "authorization".into(),
            ..config()
        };
        let headers = upstream_headers(&config, &incoming(), Forwarding::All).unwrap();
        assert_eq!(headers["authorization"], "Bearer sk-proxy");
        assert!(!headers.contains_key("x-api-key"));
    }

    #[test]
    fn test_response_headers_drop_framing() {
        let mut upstream = HeaderMap::new();
        upstream.insert("content-type", HeaderValue::from_static("text/event-stream"));
        upstream.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        upstream.insert("content-length", HeaderValue::from_static("99"));
        upstream.insert("request-id", HeaderValue::from_static("req_1"));

        let headers = response_headers(&upstream);
        assert_eq!(headers["content-type"], "text/event-stream");
        assert_eq!(headers["request-id"], "req_1");
        assert!(!headers.contains_key("transfer-encoding"));
        assert!(!headers.contains_key("content-length"));
    }
}
