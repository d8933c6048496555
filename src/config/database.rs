use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Durable store configuration.
///
/// The usage ledger and budget state live in a single SQLite file. The
/// ledger is the only source of truth for spend, so there is no stateless mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    /// Use `:memory:` for an in-memory database (testing only).
    #[serde(default = "default_path")]
    pub path: String,

    /// Create the database file if it doesn't exist.
    #[serde(default = "default_true")]
    pub create_if_missing: bool,

    /// Run migrations on startup.
    #[serde(default = "default_true")]
    pub run_migrations: bool,

    /// Enable WAL mode for better concurrency.
    #[serde(default = "default_true")]
    pub wal_mode: bool,

    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,

    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            create_if_missing: true,
            run_migrations: true,
            wal_mode: true,
            busy_timeout_ms: default_busy_timeout(),
            max_connections: default_max_connections(),
        }
    }
}

impl DatabaseConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.path.is_empty() {
            return Err(ConfigError::Validation(
                "database.path cannot be empty".into(),
            ));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Validation(
                "database.max_connections must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn default_path() -> String {
    "tollgate.db".to_string()
}

fn default_true() -> bool {
    true
}

fn default_busy_timeout() -> u64 {
    5000 // 5 seconds
}

fn default_max_connections() -> u32 {
    5
}
