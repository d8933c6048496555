//! Operational endpoints: `/health`, `/stats`, `/report` and metrics.

mod error;
pub mod health;
pub mod report;
pub mod stats;

pub use error::ApiError;
use serde::Serialize;

use crate::{
    AppState,
    billing::BillingCycle,
    db::DbResult,
    models::BudgetLevel,
    pricing::{microcents_to_dollars, percent_of},
};

/// Spend and enforcement status of the current cycle.
///
/// Amounts are in USD. Spend is always read from the ledger.
#[derive(Debug, Clone, Serialize)]
pub struct BudgetStatus {
    pub tenant: String,
    pub monthly_spend: f64,
    pub budget_limit: f64,
    pub budget_pct: f64,
    pub billing_cycle: BillingCycle,
    pub last_action: BudgetLevel,
    pub downgraded: bool,
    pub throttled: bool,
}

impl BudgetStatus {
    pub async fn load(state: &AppState, cycle: BillingCycle) -> DbResult<Self> {
        let enforcer = state.accountant.enforcer();
        let spend = state.db.usage().monthly_spend(&cycle).await?;
        let budget = enforcer.current_state(cycle).await?;
        let limit = enforcer.limit_microcents();

        Ok(Self {
            tenant: enforcer.tenant_id().to_string(),
            monthly_spend: microcents_to_dollars(spend),
            budget_limit: microcents_to_dollars(limit),
            budget_pct: percent_of(spend, limit),
            billing_cycle: cycle,
            last_action: budget.last_action,
            downgraded: budget.downgraded,
            throttled: budget.throttled,
        })
    }
}
