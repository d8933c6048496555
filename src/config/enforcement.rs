use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Collaborators driven by budget enforcement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnforcementConfig {
    /// Receives the structured pause notification. Also used for alerts when
    /// `alert_url` is unset.
    #[serde(default)]
    pub notifier_url: Option<String>,

    /// Receives threshold alerts (warn, downgrade, throttle, pause).
    #[serde(default)]
    pub alert_url: Option<String>,

    /// Timeout for alert and notifier deliveries, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// The "stop compute" lifecycle action invoked on pause.
    #[serde(default)]
    pub stop: StopActionConfig,
}

impl Default for EnforcementConfig {
    fn default() -> Self {
        Self {
            notifier_url: None,
            alert_url: None,
            timeout_secs: default_timeout_secs(),
            stop: StopActionConfig::default(),
        }
    }
}

impl EnforcementConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("notifier_url", &self.notifier_url),
            ("alert_url", &self.alert_url),
        ] {
            if let Some(url) = value {
                url::Url::parse(url).map_err(|e| {
                    ConfigError::Validation(format!("enforcement.{field} is not a valid URL: {e}"))
                })?;
            }
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "enforcement.timeout_secs must be at least 1".into(),
            ));
        }
        self.stop.validate()
    }

    /// Destination for threshold alerts.
    pub fn alert_destination(&self) -> Option<&str> {
        self.alert_url.as_deref().or(self.notifier_url.as_deref())
    }
}

/// How compute is stopped when spend reaches the pause level.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum StopActionConfig {
    /// No stop action; pause only gates the proxy.
    #[default]
    None,
    /// Run a local command. `{tenant}` in any argument is replaced by the tenant id.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default = "default_stop_timeout_secs")]
        timeout_secs: u64,
    },
    /// POST `{tenant, action}` to a lifecycle service.
    Webhook {
        url: String,
        #[serde(default = "default_stop_timeout_secs")]
        timeout_secs: u64,
    },
}

impl StopActionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        match self {
            StopActionConfig::None => Ok(()),
            StopActionConfig::Command {
                program,
                timeout_secs,
                ..
            } => {
                if program.trim().is_empty() {
                    return Err(ConfigError::Validation(
                        "enforcement.stop.program cannot be empty".into(),
                    ));
                }
                check_timeout(*timeout_secs)
            }
            StopActionConfig::Webhook { url, timeout_secs } => {
                url::Url::parse(url).map_err(|e| {
                    ConfigError::Validation(format!("enforcement.stop.url is not a valid URL: {e}"))
                })?;
                check_timeout(*timeout_secs)
            }
        }
    }
}

fn check_timeout(secs: u64) -> Result<(), ConfigError> {
    if secs == 0 {
        return Err(ConfigError::Validation(
            "enforcement.stop.timeout_secs must be at least 1".into(),
        ));
    }
    Ok(())
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_stop_timeout_secs() -> u64 {
    30
}

/// Daily usage report delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReportingConfig {
    /// Run the scheduled reporter.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Report sink. Reports are still computed and logged when unset.
    #[serde(default)]
    pub url: Option<String>,

    /// Hours between scheduled runs.
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u64,

    /// Timeout for a single delivery, in seconds.
    #[serde(default = "default_report_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: None,
            interval_hours: default_interval_hours(),
            timeout_secs: default_report_timeout_secs(),
        }
    }
}

impl ReportingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(url) = &self.url {
            url::Url::parse(url).map_err(|e| {
                ConfigError::Validation(format!("reporting.url is not a valid URL: {e}"))
            })?;
        }
        if self.interval_hours == 0 {
            return Err(ConfigError::Validation(
                "reporting.interval_hours must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_interval_hours() -> u64 {
    24
}

fn default_report_timeout_secs() -> u64 {
    30
}
