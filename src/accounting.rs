//! Post-hoc accounting for relayed responses.
//!
//! Runs after the caller already has its answer: cost the usage, append it
//! to the ledger, re-derive cycle spend and hand it to the enforcer. Every
//! failure here is logged and swallowed.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;

use crate::{
    billing::BillingCycle,
    db::{DbError, UsageRepo},
    enforcement::{EnforcementOutcome, Enforcer},
    models::{NewUsageRecord, UsageRecord},
    observability::metrics,
    pricing::{PricingConfig, TokenUsage},
    streaming::ExtractedUsage,
};

#[derive(Debug, Error)]
pub enum AccountingError {
    #[error("Database error: {0}")]
    Db(#[from] DbError),
}

pub struct Accountant {
    usage: Arc<dyn UsageRepo>,
    pricing: Arc<PricingConfig>,
    enforcer: Arc<Enforcer>,
    cycle_start_day: u32,
}

impl Accountant {
    pub fn new(
        usage: Arc<dyn UsageRepo>,
        pricing: Arc<PricingConfig>,
        enforcer: Arc<Enforcer>,
        cycle_start_day: u32,
    ) -> Self {
        Self {
            usage,
            pricing,
            enforcer,
            cycle_start_day,
        }
    }

    pub fn enforcer(&self) -> &Arc<Enforcer> {
        &self.enforcer
    }

    pub fn current_cycle(&self) -> BillingCycle {
        BillingCycle::current(self.cycle_start_day)
    }

    /// Cost, persist and enforce one request's usage.
    #[tracing::instrument(skip(self), fields(model = %model))]
    pub async fn record(
        &self,
        model: &str,
        usage: TokenUsage,
    ) -> Result<UsageRecord, AccountingError> {
        let now = Utc::now();
        let cycle = BillingCycle::for_date(now.date_naive(), self.cycle_start_day);
        let cost_microcents = self.pricing.compute_usage_cost(model, &usage);
        if !self.pricing.is_known(model) {
            tracing::debug!(model, "No exact rate for model, charged at the default rate");
        }

        let record = self
            .usage
            .append(NewUsageRecord {
                recorded_at: now,
                model: model.to_string(),
                input_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
                cost_microcents,
                billing_cycle: cycle,
            })
            .await?;
        metrics::record_accounted_usage(model, &usage, cost_microcents);
        tracing::debug!(
            id = %record.id,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            cost_microcents,
            "Usage recorded"
        );

        let spend = self.usage.monthly_spend(&cycle).await?;
        self.enforcer.enforce(cycle, spend).await?;
        Ok(record)
    }

    /// Re-run enforcement against the current cycle without new usage.
    pub async fn recheck(&self) -> Result<EnforcementOutcome, AccountingError> {
        let cycle = self.current_cycle();
        let spend = self.usage.monthly_spend(&cycle).await?;
        Ok(self.enforcer.enforce(cycle, spend).await?)
    }

    /// Best-effort tail of a relayed request. Never fails.
    ///
    /// No usage means nothing is recorded; usage is never estimated.
    /// `requested_model` is charged when the upstream did not name a model.
    pub async fn account(&self, extracted: ExtractedUsage, requested_model: &str) {
        let Some(usage) = extracted.usage else {
            tracing::debug!(requested_model, "Response carried no usage, nothing accounted");
            return;
        };
        let model = extracted.model.as_deref().unwrap_or(requested_model);

        if let Err(e) = self.record(model, usage).await {
            metrics::record_accounting_failure();
            tracing::error!(
                error = %e,
                model,
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "Failed to account usage, record lost"
            );
        }
    }
}
