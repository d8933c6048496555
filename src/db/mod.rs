mod error;
pub mod repos;
pub mod sqlite;

#[cfg(test)]
pub mod tests;

use std::sync::Arc;

pub use error::{DbError, DbResult};
pub use repos::*;

use crate::config::DatabaseConfig;

/// Cached repository trait objects, created once at startup.
struct CachedRepos {
    usage: Arc<dyn UsageRepo>,
    budget_states: Arc<dyn BudgetStateRepo>,
}

impl CachedRepos {
    fn sqlite(pool: &sqlx::SqlitePool) -> Self {
        Self {
            usage: Arc::new(sqlite::SqliteUsageRepo::new(pool.clone())),
            budget_states: Arc::new(sqlite::SqliteBudgetStateRepo::new(pool.clone())),
        }
    }
}

/// Handle to the durable store.
pub struct DbPool {
    pool: sqlx::SqlitePool,
    repos: CachedRepos,
}

impl DbPool {
    /// Create a DbPool from an existing SQLite pool.
    /// Primarily useful for testing.
    pub fn from_sqlite(pool: sqlx::SqlitePool) -> Self {
        let repos = CachedRepos::sqlite(&pool);
        Self { pool, repos }
    }

    pub async fn from_config(config: &DatabaseConfig) -> DbResult<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(
                sqlx::sqlite::SqliteConnectOptions::new()
                    .filename(&config.path)
                    .create_if_missing(config.create_if_missing)
                    .journal_mode(if config.wal_mode {
                        sqlx::sqlite::SqliteJournalMode::Wal
                    } else {
                        sqlx::sqlite::SqliteJournalMode::Delete
                    })
                    .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms)),
            )
            .await?;

        Ok(Self::from_sqlite(pool))
    }

    pub async fn run_migrations(&self) -> DbResult<()> {
        tracing::info!("Running SQLite migrations");
        sqlx::migrate!("./migrations_sqlx/sqlite")
            .run(&self.pool)
            .await?;
        tracing::info!("SQLite migrations completed successfully");
        Ok(())
    }

    /// Get usage ledger repository
    pub fn usage(&self) -> Arc<dyn UsageRepo> {
        Arc::clone(&self.repos.usage)
    }

    /// Get budget state repository
    pub fn budget_states(&self) -> Arc<dyn BudgetStateRepo> {
        Arc::clone(&self.repos.budget_states)
    }

    pub async fn health_check(&self) -> DbResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Close all connections. Called during graceful shutdown.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
