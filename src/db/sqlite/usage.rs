use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::{
    billing::BillingCycle,
    db::{error::DbResult, repos::UsageRepo},
    models::{DailySpend, DailyTotal, ModelSpend, NewUsageRecord, UsageRecord},
};

pub struct SqliteUsageRepo {
    pool: SqlitePool,
}

impl SqliteUsageRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn model_spend(row: &sqlx::sqlite::SqliteRow) -> ModelSpend {
        ModelSpend {
            model: row.get("model"),
            cost_microcents: row.get("cost_microcents"),
            input_tokens: row.get("input_tokens"),
            output_tokens: row.get("output_tokens"),
            request_count: row.get("request_count"),
        }
    }
}

#[async_trait]
impl UsageRepo for SqliteUsageRepo {
    async fn append(&self, record: NewUsageRecord) -> DbResult<UsageRecord> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO usage_records (
                id, recorded_at, usage_date, billing_cycle, model,
                input_tokens, output_tokens, cost_microcents
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(record.recorded_at)
        .bind(record.recorded_at.date_naive())
        .bind(record.billing_cycle.to_string())
        .bind(&record.model)
        .bind(record.input_tokens)
        .bind(record.output_tokens)
        .bind(record.cost_microcents)
        .execute(&self.pool)
        .await?;

        Ok(UsageRecord {
            id,
            recorded_at: record.recorded_at,
            model: record.model,
            input_tokens: record.input_tokens,
            output_tokens: record.output_tokens,
            cost_microcents: record.cost_microcents,
            billing_cycle: record.billing_cycle,
        })
    }

    async fn monthly_spend(&self, cycle: &BillingCycle) -> DbResult<i64> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(cost_microcents), 0) as total
            FROM usage_records
            WHERE billing_cycle = ?
            "#,
        )
        .bind(cycle.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("total"))
    }

    async fn daily_breakdown(&self, cycle: &BillingCycle) -> DbResult<Vec<DailySpend>> {
        let rows = sqlx::query(
            r#"
            SELECT
                usage_date as date,
                COALESCE(SUM(cost_microcents), 0) as cost_microcents,
                COALESCE(SUM(input_tokens), 0) as input_tokens,
                COALESCE(SUM(output_tokens), 0) as output_tokens,
                COUNT(*) as request_count
            FROM usage_records
            WHERE billing_cycle = ?
            GROUP BY usage_date
            ORDER BY usage_date ASC
            "#,
        )
        .bind(cycle.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| DailySpend {
                date: row.get("date"),
                cost_microcents: row.get("cost_microcents"),
                input_tokens: row.get("input_tokens"),
                output_tokens: row.get("output_tokens"),
                request_count: row.get("request_count"),
            })
            .collect())
    }

    async fn model_breakdown(&self, cycle: &BillingCycle) -> DbResult<Vec<ModelSpend>> {
        let rows = sqlx::query(
            r#"
            SELECT
                model,
                COALESCE(SUM(cost_microcents), 0) as cost_microcents,
                COALESCE(SUM(input_tokens), 0) as input_tokens,
                COALESCE(SUM(output_tokens), 0) as output_tokens,
                COUNT(*) as request_count
            FROM usage_records
            WHERE billing_cycle = ?
            GROUP BY model
            ORDER BY cost_microcents DESC, model ASC
            "#,
        )
        .bind(cycle.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::model_spend).collect())
    }

    async fn daily_summary(&self, date: NaiveDate) -> DbResult<Vec<ModelSpend>> {
        let rows = sqlx::query(
            r#"
            SELECT
                model,
                COALESCE(SUM(cost_microcents), 0) as cost_microcents,
                COALESCE(SUM(input_tokens), 0) as input_tokens,
                COALESCE(SUM(output_tokens), 0) as output_tokens,
                COUNT(*) as request_count
            FROM usage_records
            WHERE usage_date = ?
            GROUP BY model
            ORDER BY cost_microcents DESC, model ASC
            "#,
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::model_spend).collect())
    }

    async fn daily_total(&self, date: NaiveDate) -> DbResult<DailyTotal> {
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(cost_microcents), 0) as cost_microcents,
                COUNT(*) as request_count
            FROM usage_records
            WHERE usage_date = ?
            "#,
        )
        .bind(date)
        .fetch_one(&self.pool)
        .await?;

        Ok(DailyTotal {
            date,
            cost_microcents: row.get("cost_microcents"),
            request_count: row.get("request_count"),
        })
    }

    async fn count_records(&self, cycle: &BillingCycle) -> DbResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM usage_records WHERE billing_cycle = ?")
            .bind(cycle.to_string())
            .fetch_one(&self.pool)
            .await?;

        Ok(row.get("count"))
    }
}
