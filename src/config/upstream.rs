use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// The generative-AI API sitting behind the proxy.
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpstreamConfig {
    /// Base URL requests are forwarded to.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// The proxy's own upstream credential. Required.
    #[serde(default)]
    pub api_key: String,

    /// Header the credential is sent in.
    #[serde(default = "default_auth_header")]
    pub auth_header: String,

    /// Path of the metered endpoint. Every other path is passed through unmetered.
    #[serde(default = "default_metered_path")]
    pub metered_path: String,

    /// Caller headers forwarded on metered requests. Everything else is dropped.
    #[serde(default = "default_forward_headers")]
    pub forward_headers: Vec<String>,

    /// Headers added to upstream requests when the caller did not send them.
    #[serde(default = "default_default_headers")]
    pub default_headers: BTreeMap<String, String>,
}

impl std::fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"****")
            .field("auth_header", &self.auth_header)
            .field("metered_path", &self.metered_path)
            .field("forward_headers", &self.forward_headers)
            .field("default_headers", &self.default_headers)
            .finish()
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            auth_header: default_auth_header(),
            metered_path: default_metered_path(),
            forward_headers: default_forward_headers(),
            default_headers: default_default_headers(),
        }
    }
}

impl UpstreamConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::Validation(
                "upstream.api_key is required; set it directly or via ${ENV_VAR}".into(),
            ));
        }
        let url = url::Url::parse(&self.base_url).map_err(|e| {
            ConfigError::Validation(format!("upstream.base_url is not a valid URL: {e}"))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Validation(format!(
                "upstream.base_url must use http or https, got '{}'",
                url.scheme()
            )));
        }
        if !self.metered_path.starts_with('/') {
            return Err(ConfigError::Validation(
                "upstream.metered_path must start with '/'".into(),
            ));
        }
        http::HeaderName::try_from(self.auth_header.as_str()).map_err(|_| {
            ConfigError::Validation(format!(
                "upstream.auth_header '{}' is not a valid header name",
                self.auth_header
            ))
        })?;
        Ok(())
    }

    /// Join the base URL with a request path and optional query.
    pub fn url_for(&self, path_and_query: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path_and_query)
    }

    /// Whether a caller header may be forwarded on the metered path.
    pub fn forwards(&self, name: &str) -> bool {
        self.forward_headers
            .iter()
            .any(|h| h.eq_ignore_ascii_case(name))
    }
}

fn default_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_auth_header() -> String {
    "x-api-key".to_string()
}

fn default_metered_path() -> String {
    "/v1/messages".to_string()
}

fn default_forward_headers() -> Vec<String> {
    ["content-type", "accept", "anthropic-version", "anthropic-beta"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_default_headers() -> BTreeMap<String, String> {
    BTreeMap::from([("anthropic-version".to_string(), "2023-06-01".to_string())])
}
