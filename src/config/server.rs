use std::{net::IpAddr, time::Duration};

use serde::{Deserialize, Serialize};

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request body size limit in bytes.
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,

    /// Seconds to wait for in-flight accounting tasks on shutdown.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    /// HTTP client configuration for outbound requests (upstream and collaborators).
    #[serde(default)]
    pub http_client: HttpClientConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
            shutdown_grace_secs: default_shutdown_grace(),
            http_client: HttpClientConfig::default(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

fn default_body_limit() -> usize {
    10 * 1024 * 1024 // 10 MB
}

fn default_shutdown_grace() -> u64 {
    30
}

/// Shared outbound HTTP client settings.
///
/// Upstream generation can run for minutes, so there is no overall request
/// timeout unless `timeout_secs` is set explicitly. Collaborator calls
/// (alerts, stop webhook, reports) carry their own per-request timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpClientConfig {
    /// Overall request timeout in seconds. Unset means transport defaults only.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Connection timeout in seconds.
    #[serde(default = "default_http_client_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Maximum idle connections to keep per host.
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,

    /// Idle connection timeout in seconds.
    #[serde(default = "default_pool_idle_timeout")]
    pub pool_idle_timeout_secs: u64,

    /// TCP keepalive interval in seconds. 0 disables keepalive.
    #[serde(default = "default_tcp_keepalive")]
    pub tcp_keepalive_secs: u64,

    /// Enable TCP_NODELAY (disable Nagle's algorithm).
    #[serde(default = "default_tcp_nodelay")]
    pub tcp_nodelay: bool,

    /// User-Agent header to send with requests that did not carry one.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: None,
            connect_timeout_secs: default_http_client_connect_timeout(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
            pool_idle_timeout_secs: default_pool_idle_timeout(),
            tcp_keepalive_secs: default_tcp_keepalive(),
            tcp_nodelay: default_tcp_nodelay(),
            user_agent: default_user_agent(),
        }
    }
}

impl HttpClientConfig {
    /// Build a reqwest Client from this configuration.
    pub fn build_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .pool_max_idle_per_host(self.pool_max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(self.pool_idle_timeout_secs))
            .tcp_nodelay(self.tcp_nodelay)
            .user_agent(&self.user_agent);

        if let Some(secs) = self.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        // TCP keepalive (0 means disabled)
        if self.tcp_keepalive_secs > 0 {
            builder = builder.tcp_keepalive(Duration::from_secs(self.tcp_keepalive_secs));
        }

        builder.build()
    }
}

// Default: 10 seconds to establish connection
fn default_http_client_connect_timeout() -> u64 {
    10
}

fn default_pool_max_idle_per_host() -> usize {
    16
}

// Default: 90 seconds idle timeout
fn default_pool_idle_timeout() -> u64 {
    90
}

// Default: 60 seconds TCP keepalive
fn default_tcp_keepalive() -> u64 {
    60
}

fn default_tcp_nodelay() -> bool {
    true
}

fn default_user_agent() -> String {
    format!("tollgate/{}", env!("CARGO_PKG_VERSION"))
}
