use async_trait::async_trait;
use chrono::NaiveDate;

use crate::{
    billing::BillingCycle,
    db::error::DbResult,
    models::{DailySpend, DailyTotal, ModelSpend, NewUsageRecord, UsageRecord},
};

/// Append-only usage ledger.
///
/// Reads always hit durable storage; there is no cached spend.
#[async_trait]
pub trait UsageRepo: Send + Sync {
    /// Durably insert one record. Either the whole row is written or nothing is.
    async fn append(&self, record: NewUsageRecord) -> DbResult<UsageRecord>;

    /// Total cost of a billing cycle in microcents. Zero for an empty cycle.
    async fn monthly_spend(&self, cycle: &BillingCycle) -> DbResult<i64>;

    /// Per-day totals within a cycle, oldest first.
    async fn daily_breakdown(&self, cycle: &BillingCycle) -> DbResult<Vec<DailySpend>>;

    /// Per-model totals within a cycle, most expensive first.
    async fn model_breakdown(&self, cycle: &BillingCycle) -> DbResult<Vec<ModelSpend>>;

    /// Per-model totals for one calendar day.
    async fn daily_summary(&self, date: NaiveDate) -> DbResult<Vec<ModelSpend>>;

    /// Spend and request count for one calendar day.
    async fn daily_total(&self, date: NaiveDate) -> DbResult<DailyTotal>;

    /// Number of records in a cycle.
    async fn count_records(&self, cycle: &BillingCycle) -> DbResult<i64>;
}
