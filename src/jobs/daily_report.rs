//! Daily usage report.
//!
//! Aggregates one calendar day of the usage ledger and POSTs it to the
//! configured sink. The scheduled worker runs once at startup and then on a
//! fixed interval, always reporting the previous UTC day. A failed delivery
//! is logged and not resent.
//!
//! # Configuration
//!
//! ```toml
//! [reporting]
//! url = "https://reports.example.com/daily"
//! interval_hours = 24
//! ```

use std::{sync::Arc, time::Duration};

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::{
    config::TollgateConfig,
    db::{DbError, UsageRepo},
    models::ModelSpend,
    observability::metrics,
    pricing::microcents_to_dollars,
};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Database error: {0}")]
    Db(#[from] DbError),

    #[error("Failed to deliver report: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Report sink responded with status {0}")]
    Status(reqwest::StatusCode),
}

/// One day of usage for the tenant.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DailyReport {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub tenant: String,
    pub date: NaiveDate,
    /// Total spend in USD.
    pub spend: f64,
    pub request_count: i64,
    pub models: Vec<ModelReportLine>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ModelReportLine {
    pub model: String,
    pub spend: f64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub request_count: i64,
}

impl From<ModelSpend> for ModelReportLine {
    fn from(m: ModelSpend) -> Self {
        Self {
            model: m.model,
            spend: microcents_to_dollars(m.cost_microcents),
            input_tokens: m.input_tokens,
            output_tokens: m.output_tokens,
            request_count: m.request_count,
        }
    }
}

/// Builds and delivers daily reports.
pub struct Reporter {
    usage: Arc<dyn UsageRepo>,
    client: reqwest::Client,
    tenant_id: String,
    sink_url: Option<String>,
    timeout: Duration,
}

impl Reporter {
    pub fn new(
        usage: Arc<dyn UsageRepo>,
        client: reqwest::Client,
        tenant_id: String,
        sink_url: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            usage,
            client,
            tenant_id,
            sink_url,
            timeout,
        }
    }

    pub fn from_config(
        usage: Arc<dyn UsageRepo>,
        client: reqwest::Client,
        config: &TollgateConfig,
    ) -> Self {
        Self::new(
            usage,
            client,
            config.tenant_id.clone(),
            config.reporting.url.clone(),
            Duration::from_secs(config.reporting.timeout_secs),
        )
    }

    /// Aggregate the ledger for `date`.
    pub async fn build(&self, date: NaiveDate) -> Result<DailyReport, ReportError> {
        let total = self.usage.daily_total(date).await?;
        let models = self
            .usage
            .daily_summary(date)
            .await?
            .into_iter()
            .map(ModelReportLine::from)
            .collect();

        Ok(DailyReport {
            kind: "daily_report",
            tenant: self.tenant_id.clone(),
            date,
            spend: microcents_to_dollars(total.cost_microcents),
            request_count: total.request_count,
            models,
        })
    }

    /// Deliver a report. Returns `false` when no sink is configured.
    pub async fn send(&self, report: &DailyReport) -> Result<bool, ReportError> {
        let Some(url) = &self.sink_url else {
            tracing::info!(
                date = %report.date,
                spend = report.spend,
                request_count = report.request_count,
                "No report sink configured, daily report only logged"
            );
            return Ok(false);
        };

        let response = self
            .client
            .post(url)
            .json(report)
            .timeout(self.timeout)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ReportError::Status(status));
        }
        Ok(true)
    }

    /// Build and deliver the report for `date`.
    #[tracing::instrument(name = "report.run", skip(self))]
    pub async fn run(&self, date: NaiveDate) -> Result<DailyReport, ReportError> {
        let report = self.build(date).await?;
        if self.send(&report).await? {
            tracing::info!(
                spend = report.spend,
                request_count = report.request_count,
                "Daily report sent"
            );
        }
        Ok(report)
    }
}

/// The calendar day before today (UTC).
pub fn previous_day() -> NaiveDate {
    let today = Utc::now().date_naive();
    today.pred_opt().unwrap_or(today)
}

/// Run the report now, then every `interval`. Never returns.
pub async fn start_daily_report_worker(reporter: Arc<Reporter>, interval: Duration) {
    tracing::info!(
        interval_secs = interval.as_secs(),
        "Starting daily report worker"
    );

    loop {
        if let Err(e) = reporter.run(previous_day()).await {
            metrics::record_side_effect_failure("report");
            tracing::error!(error = %e, "Daily report failed, this day will not be resent");
        }
        tokio::time::sleep(interval).await;
    }
}
