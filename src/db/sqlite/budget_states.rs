use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use super::common::parse_cycle;
use crate::{
    db::{error::DbResult, repos::BudgetStateRepo},
    models::{BudgetLevel, BudgetState},
};

pub struct SqliteBudgetStateRepo {
    pool: SqlitePool,
}

impl SqliteBudgetStateRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BudgetStateRepo for SqliteBudgetStateRepo {
    async fn get(&self, tenant_id: &str) -> DbResult<Option<BudgetState>> {
        let row = sqlx::query(
            r#"
            SELECT billing_cycle, last_action, warned_80, downgraded, throttled
            FROM budget_state
            WHERE tenant_id = ?
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(BudgetState {
                billing_cycle: parse_cycle(row.get("billing_cycle"))?,
                last_action: BudgetLevel::from_str(row.get("last_action")),
                warned_80: row.get("warned_80"),
                downgraded: row.get("downgraded"),
                throttled: row.get("throttled"),
            })
        })
        .transpose()
    }

    async fn save(&self, tenant_id: &str, state: &BudgetState) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO budget_state (
                tenant_id, billing_cycle, last_action, warned_80, downgraded, throttled, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (tenant_id) DO UPDATE SET
                billing_cycle = excluded.billing_cycle,
                last_action = excluded.last_action,
                warned_80 = excluded.warned_80,
                downgraded = excluded.downgraded,
                throttled = excluded.throttled,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(tenant_id)
        .bind(state.billing_cycle.to_string())
        .bind(state.last_action.as_str())
        .bind(state.warned_80)
        .bind(state.downgraded)
        .bind(state.throttled)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
