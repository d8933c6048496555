use std::{path::PathBuf, sync::Arc, time::Duration};

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use chrono::NaiveDate;
use clap::Parser;
use reqwest::{self, Client};
use tokio_util::task::TaskTracker;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

mod accounting;
mod billing;
mod config;
mod db;
mod enforcement;
mod jobs;
mod models;
pub mod observability;
mod pricing;
mod proxy;
mod routes;
mod streaming;

#[cfg(test)]
mod tests;

#[derive(Clone)]
pub struct AppState {
    pub http_client: Client,
    pub config: Arc<config::TollgateConfig>,
    pub db: Arc<db::DbPool>,
    /// Costs relayed usage and drives budget enforcement.
    pub accountant: Arc<accounting::Accountant>,
    pub reporter: Arc<jobs::Reporter>,
    /// Task tracker for background tasks (accounting, alerts, stop actions).
    /// Ensures all spawned tasks complete during graceful shutdown.
    pub task_tracker: TaskTracker,
}

impl AppState {
    pub async fn new(config: config::TollgateConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let pool = db::DbPool::from_config(&config.database).await?;
        if config.database.run_migrations {
            pool.run_migrations().await?;
        }
        Self::with_db(config, pool)
    }

    /// Wire the proxy around an already opened store.
    pub fn with_db(
        config: config::TollgateConfig,
        pool: db::DbPool,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        // One shared client for the upstream and every collaborator; reqwest
        // keeps a connection pool per host.
        let http_client = config
            .server
            .http_client
            .build_client()
            .map_err(|e| format!("Failed to build HTTP client: {}", e))?;

        tracing::debug!(
            timeout_secs = config.server.http_client.timeout_secs,
            connect_timeout_secs = config.server.http_client.connect_timeout_secs,
            pool_max_idle_per_host = config.server.http_client.pool_max_idle_per_host,
            "HTTP client configured"
        );

        let limit_microcents = config
            .budget
            .limit_microcents()
            .ok_or("budget.monthly_limit_usd is out of range")?;

        let db = Arc::new(pool);
        let task_tracker = TaskTracker::new();

        let notifier = Arc::new(enforcement::WebhookNotifier::new(
            http_client.clone(),
            &config.enforcement,
        ));
        let lifecycle: Arc<dyn enforcement::ComputeLifecycle> = Arc::from(
            enforcement::lifecycle_from_config(http_client.clone(), &config.enforcement.stop),
        );
        tracing::debug!(stop_action = lifecycle.name(), "Stop action configured");

        let enforcer = Arc::new(enforcement::Enforcer::new(
            config.tenant_id.clone(),
            limit_microcents,
            db.budget_states(),
            notifier,
            lifecycle,
            task_tracker.clone(),
        ));
        let accountant = Arc::new(accounting::Accountant::new(
            db.usage(),
            Arc::new(config.pricing.clone()),
            enforcer,
            config.budget.cycle_start_day,
        ));
        let reporter = Arc::new(jobs::Reporter::from_config(
            db.usage(),
            http_client.clone(),
            &config,
        ));

        Ok(Self {
            http_client,
            config: Arc::new(config),
            db,
            accountant,
            reporter,
            task_tracker,
        })
    }
}

#[derive(Parser, Debug)]
#[command(version, about = "Tollgate metering proxy", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file (defaults to ./tollgate.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Start the proxy (default)
    Serve,
    /// Run database migrations and exit
    Migrate,
    /// Build and send the daily report once, then exit
    Report {
        /// Day to report (YYYY-MM-DD). Defaults to yesterday (UTC).
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

pub fn build_app(config: &config::TollgateConfig, state: AppState) -> Router {
    let mut app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/stats", get(routes::stats::stats))
        .route("/report", post(routes::report::trigger_report));

    if config.observability.metrics.enabled {
        app = app.route(
            &config.observability.metrics.path,
            get(routes::health::metrics),
        );
    }

    // Other methods on the metered path are relayed unmetered.
    app = app
        .route(
            &config.upstream.metered_path,
            post(proxy::metered).fallback(proxy::passthrough),
        )
        .fallback(proxy::passthrough);

    // `server.body_limit_bytes` is the only cap; axum's 2 MiB extractor
    // default would otherwise shadow it.
    app.layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(config.server.body_limit_bytes))
        .with_state(state)
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command {
        Some(Command::Migrate) => {
            run_migrate(args.config.as_deref()).await;
        }
        Some(Command::Report { date }) => {
            run_report(args.config.as_deref(), date).await;
        }
        Some(Command::Serve) | None => {
            run_server(args.config.as_deref()).await;
        }
    }
}

fn resolve_config_path(explicit_path: Option<&str>) -> PathBuf {
    PathBuf::from(explicit_path.unwrap_or("tollgate.toml"))
}

/// Load the config file or exit. A missing credential is fatal here, before
/// anything is served.
fn load_config(explicit_path: Option<&str>) -> (config::TollgateConfig, PathBuf) {
    let config_path = resolve_config_path(explicit_path);
    match config::TollgateConfig::from_file(&config_path) {
        Ok(c) => (c, config_path),
        Err(e) => {
            eprintln!(
                "Failed to load config from {}: {}",
                config_path.display(),
                e
            );
            std::process::exit(1);
        }
    }
}

fn init_observability(config: &config::TollgateConfig) {
    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("Failed to initialize tracing: {e}");
        std::process::exit(1);
    }
}

async fn run_server(explicit_config_path: Option<&str>) {
    let (config, config_path) = load_config(explicit_config_path);
    init_observability(&config);

    if let Err(e) = observability::metrics::init_metrics(&config.observability.metrics) {
        tracing::warn!(error = %e, "Failed to initialize metrics: {e}");
    }

    tracing::info!(
        config_file = %config_path.display(),
        tenant = %config.tenant_id,
        upstream = %config.upstream.base_url,
        metered_path = %config.upstream.metered_path,
        "Starting metering proxy"
    );

    let state = match AppState::new(config.clone()).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize application state");
            std::process::exit(1);
        }
    };

    // Re-check the stored state on boot so a pause that lost its stop action
    // to a crash is re-attempted.
    if let Err(e) = state.accountant.recheck().await {
        tracing::warn!(error = %e, "Startup budget check failed");
    }

    if config.reporting.enabled {
        let reporter = state.reporter.clone();
        let interval = Duration::from_secs(config.reporting.interval_hours * 3600);
        tokio::spawn(jobs::start_daily_report_worker(reporter, interval));
    }

    let task_tracker = state.task_tracker.clone();
    let db = state.db.clone();
    let grace = Duration::from_secs(config.server.shutdown_grace_secs);
    let app = build_app(&config, state);

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, address = %bind_addr, "Failed to bind to address");
            std::process::exit(1);
        }
    };

    tracing::info!("Server listening on http://{}", bind_addr);

    // Graceful shutdown: stop accepting on SIGINT/SIGTERM and drain open
    // connections. Streams finishing during the drain spawn accounting, so
    // the tracker is only waited on once serve returns.
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Server error");
    }
    drain_background_tasks(&task_tracker, grace).await;
    db.close().await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining open connections...");
}

/// Wait (bounded) for in-flight accounting and side effects.
async fn drain_background_tasks(task_tracker: &TaskTracker, grace: Duration) {
    tracing::info!("Waiting for background tasks to complete...");

    // Close the task tracker so wait() resolves once the last task finishes
    task_tracker.close();

    // Wait for in-flight accounting and side effects (with timeout)
    match tokio::time::timeout(grace, task_tracker.wait()).await {
        Ok(()) => tracing::info!("All background tasks completed"),
        Err(_) => {
            tracing::warn!("Timeout waiting for background tasks, some may not have completed")
        }
    }

    tracing::info!("Shutdown complete");
}

async fn run_migrate(explicit_config_path: Option<&str>) {
    let (config, config_path) = load_config(explicit_config_path);
    init_observability(&config);

    tracing::info!(
        config_file = %config_path.display(),
        "Running database migrations"
    );

    match db::DbPool::from_config(&config.database).await {
        Ok(pool) => match pool.run_migrations().await {
            Ok(()) => {
                tracing::info!("Database migrations completed successfully");
                std::process::exit(0);
            }
            Err(e) => {
                tracing::error!(error = %e, "Database migrations failed");
                eprintln!("Error: Database migrations failed: {}", e);
                std::process::exit(1);
            }
        },
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to database");
            eprintln!("Error: Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run_report(explicit_config_path: Option<&str>, date: Option<NaiveDate>) {
    let (config, _) = load_config(explicit_config_path);
    init_observability(&config);

    let state = match AppState::new(config).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: Failed to initialize: {}", e);
            std::process::exit(1);
        }
    };

    let date = date.unwrap_or_else(jobs::previous_day);
    match state.reporter.run(date).await {
        Ok(report) => match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => tracing::warn!(error = %e, "Failed to print report"),
        },
        Err(e) => {
            eprintln!("Error: Daily report failed: {}", e);
            std::process::exit(1);
        }
    }
}
