//! External side effects driven by budget enforcement.
//!
//! Two seams: [`Notifier`] delivers threshold alerts and the structured
//! pause notice, [`ComputeLifecycle`] stops the tenant's compute. Both are
//! called from detached tasks with bounded timeouts; failures are returned
//! to the caller for logging and are never retried here.

use std::{process::Stdio, time::Duration};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::process::Command;

use crate::{
    config::{EnforcementConfig, StopActionConfig},
    models::BudgetLevel,
    pricing::{microcents_to_dollars, percent_of},
};

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Sink responded with status {0}")]
    Status(reqwest::StatusCode),

    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with {status}")]
    Exit {
        program: String,
        status: std::process::ExitStatus,
    },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

pub type ActionResult<T> = Result<T, ActionError>;

/// Threshold alert payload.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BudgetAlert {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub tenant: String,
    pub level: BudgetLevel,
    pub message: String,
    /// Cycle spend in USD.
    pub spend: f64,
    /// Budget limit in USD.
    pub limit: f64,
    pub pct: f64,
}

impl BudgetAlert {
    pub fn new(
        tenant: &str,
        level: BudgetLevel,
        spend_microcents: i64,
        limit_microcents: i64,
    ) -> Self {
        let spend = microcents_to_dollars(spend_microcents);
        let limit = microcents_to_dollars(limit_microcents);
        let pct = percent_of(spend_microcents, limit_microcents);
        let consequence = match level {
            BudgetLevel::Normal => "no action",
            BudgetLevel::Warn => "approaching the monthly budget",
            BudgetLevel::Downgrade => "budget exceeded, premium models are being downgraded",
            BudgetLevel::Throttle => "budget exceeded, service is throttled",
            BudgetLevel::Pause => "budget exceeded, compute is being stopped",
        };
        Self {
            kind: "budget_alert",
            tenant: tenant.to_string(),
            level,
            message: format!(
                "Tenant {tenant} at {pct:.1}% of budget (${spend:.2} of ${limit:.2}): {consequence}"
            ),
            spend,
            limit,
            pct,
        }
    }
}

/// Structured notification sent when the tenant is paused.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PauseNotice {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub tenant: String,
    pub spend: f64,
    pub limit: f64,
    pub pct: f64,
}

impl PauseNotice {
    pub fn new(tenant: &str, spend_microcents: i64, limit_microcents: i64) -> Self {
        Self {
            kind: "budget_pause",
            tenant: tenant.to_string(),
            spend: microcents_to_dollars(spend_microcents),
            limit: microcents_to_dollars(limit_microcents),
            pct: percent_of(spend_microcents, limit_microcents),
        }
    }
}

/// Outbound alert and notification sink.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn alert(&self, alert: &BudgetAlert) -> ActionResult<()>;

    async fn notify_pause(&self, notice: &PauseNotice) -> ActionResult<()>;
}

/// The "stop compute" lifecycle action.
#[async_trait]
pub trait ComputeLifecycle: Send + Sync {
    async fn stop(&self, tenant_id: &str) -> ActionResult<()>;

    /// Backend name for logging.
    fn name(&self) -> &'static str;
}

/// POSTs JSON payloads to configured webhook URLs.
///
/// A missing destination is logged and treated as delivered.
pub struct WebhookNotifier {
    client: reqwest::Client,
    alert_url: Option<String>,
    notifier_url: Option<String>,
    timeout: Duration,
}

impl WebhookNotifier {
    pub fn new(client: reqwest::Client, config: &EnforcementConfig) -> Self {
        Self {
            client,
            alert_url: config.alert_destination().map(str::to_string),
            notifier_url: config.notifier_url.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn alert(&self, alert: &BudgetAlert) -> ActionResult<()> {
        let Some(url) = &self.alert_url else {
            tracing::warn!(
                level = %alert.level,
                message = %alert.message,
                "No alert destination configured, alert only logged"
            );
            return Ok(());
        };
        post_json(&self.client, url, alert, self.timeout).await
    }

    async fn notify_pause(&self, notice: &PauseNotice) -> ActionResult<()> {
        let Some(url) = &self.notifier_url else {
            tracing::warn!(
                tenant = %notice.tenant,
                pct = notice.pct,
                "No notifier configured, pause notice only logged"
            );
            return Ok(());
        };
        post_json(&self.client, url, notice, self.timeout).await
    }
}

/// POST a JSON body with a per-request timeout and require a 2xx answer.
pub(crate) async fn post_json<T: Serialize + ?Sized>(
    client: &reqwest::Client,
    url: &str,
    body: &T,
    timeout: Duration,
) -> ActionResult<()> {
    let response = client.post(url).json(body).timeout(timeout).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(ActionError::Status(status));
    }
    Ok(())
}

/// Pause only gates the proxy; nothing external is stopped.
pub struct NoopLifecycle;

#[async_trait]
impl ComputeLifecycle for NoopLifecycle {
    async fn stop(&self, tenant_id: &str) -> ActionResult<()> {
        tracing::info!(tenant_id, "No stop action configured");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

/// Runs a local program. `{tenant}` in any argument is replaced by the tenant id.
///
/// The child is killed if it outlives the timeout.
pub struct CommandLifecycle {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandLifecycle {
    pub fn new(program: String, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program,
            args,
            timeout,
        }
    }

    fn args_for(&self, tenant_id: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.replace("{tenant}", tenant_id))
            .collect()
    }
}

#[async_trait]
impl ComputeLifecycle for CommandLifecycle {
    async fn stop(&self, tenant_id: &str) -> ActionResult<()> {
        let mut child = Command::new(&self.program)
            .args(self.args_for(tenant_id))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ActionError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(status)) => Err(ActionError::Exit {
                program: self.program.clone(),
                status,
            }),
            Ok(Err(source)) => Err(ActionError::Spawn {
                program: self.program.clone(),
                source,
            }),
            Err(_) => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(
                        error = %e,
                        program = %self.program,
                        "Failed to kill stop command"
                    );
                }
                Err(ActionError::Timeout(self.timeout))
            }
        }
    }

    fn name(&self) -> &'static str {
        "command"
    }
}

/// POSTs `{tenant, action: "stop"}` to a lifecycle service.
pub struct WebhookLifecycle {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl WebhookLifecycle {
    pub fn new(client: reqwest::Client, url: String, timeout: Duration) -> Self {
        Self {
            client,
            url,
            timeout,
        }
    }
}

#[derive(Serialize)]
struct StopRequest<'a> {
    tenant: &'a str,
    action: &'static str,
}

#[async_trait]
impl ComputeLifecycle for WebhookLifecycle {
    async fn stop(&self, tenant_id: &str) -> ActionResult<()> {
        let body = StopRequest {
            tenant: tenant_id,
            action: "stop",
        };
        post_json(&self.client, &self.url, &body, self.timeout).await
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}

/// Build the configured stop action.
pub fn lifecycle_from_config(
    client: reqwest::Client,
    config: &StopActionConfig,
) -> Box<dyn ComputeLifecycle> {
    match config {
        StopActionConfig::None => Box::new(NoopLifecycle),
        StopActionConfig::Command {
            program,
            args,
            timeout_secs,
        } => Box::new(CommandLifecycle::new(
            program.clone(),
            args.clone(),
            Duration::from_secs(*timeout_secs),
        )),
        StopActionConfig::Webhook { url, timeout_secs } => Box::new(WebhookLifecycle::new(
            client,
            url.clone(),
            Duration::from_secs(*timeout_secs),
        )),
    }
}
