use async_trait::async_trait;

use crate::{db::error::DbResult, models::BudgetState};

/// Persistence for the per-tenant enforcement state.
///
/// Each write replaces the whole record in a single statement, so a reset
/// is never observed half-applied.
#[async_trait]
pub trait BudgetStateRepo: Send + Sync {
    /// The stored state, whatever cycle it belongs to.
    async fn get(&self, tenant_id: &str) -> DbResult<Option<BudgetState>>;

    /// Insert or replace the tenant's state.
    async fn save(&self, tenant_id: &str, state: &BudgetState) -> DbResult<()>;
}
