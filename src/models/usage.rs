use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::billing::BillingCycle;

/// One accounted request in the usage ledger. Never mutated once written.
///
/// Costs are stored in microcents (1/1,000,000 of a dollar).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageRecord {
    pub id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub model: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost_microcents: i64,
    /// Cycle label fixed at write time so aggregation never depends on later clock handling.
    pub billing_cycle: BillingCycle,
}

/// Input for appending a usage record.
#[derive(Debug, Clone)]
pub struct NewUsageRecord {
    pub recorded_at: DateTime<Utc>,
    pub model: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost_microcents: i64,
    pub billing_cycle: BillingCycle,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DailySpend {
    pub date: NaiveDate,
    /// Total cost in microcents (1/1,000,000 of a dollar)
    pub cost_microcents: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub request_count: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ModelSpend {
    pub model: String,
    /// Total cost in microcents (1/1,000,000 of a dollar)
    pub cost_microcents: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub request_count: i64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct DailyTotal {
    pub date: NaiveDate,
    pub cost_microcents: i64,
    pub request_count: i64,
}
