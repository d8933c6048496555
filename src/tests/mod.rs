//! Shared test application and end-to-end tests.
//!
//! Every test app runs the real router over a migrated in-memory store.


use axum::Router;

use crate::{
    AppState, build_app, config::TollgateConfig, db::tests::harness::create_test_db,
    pricing::TokenUsage,
};

/// Config for tenant `acme` with a `limit_usd` budget.
///
/// Every model costs exactly $1 per million input tokens and nothing for
/// output, so a test picks a dollar cost by picking an input token count.
pub fn test_config(upstream_url: &str, limit_usd: i64) -> TollgateConfig {
    TollgateConfig::from_str(&format!(
        r#"
tenant_id = "acme"

[upstream]
base_url = "{upstream_url}"
api_key = "sk-proxy"

[budget]
monthly_limit_usd = {limit_usd}

[pricing]
builtin = false

[pricing.default]
input_per_1m_tokens = 1000000
output_per_1m_tokens = 0

[reporting]
enabled = false
"#
    ))
    .expect("Failed to parse test config")
}

/// Input tokens billed at `usd` dollars under [`test_config`] pricing.
pub fn tokens_for_usd(usd: i64) -> i64 {
    usd * 1_000_000
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
}

impl TestApp {
    pub async fn new(config: TollgateConfig) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let db = create_test_db().await;
        let state = AppState::with_db(config.clone(), db).expect("Failed to create AppState");
        let router = build_app(&config, state.clone());
        Self { router, state }
    }

    /// Account a request costing `usd` dollars directly, bypassing the proxy.
    pub async fn record_cost(&self, model: &str, usd: i64) {
        self.state
            .accountant
            .record(model, TokenUsage::new(tokens_for_usd(usd), 0))
            .await
            .expect("Failed to record usage");
        self.settle().await;
    }

    /// Wait for spawned accounting and enforcement side effects.
    pub async fn settle(&self) {
        let tracker = &self.state.task_tracker;
        tracker.close();
        tracker.wait().await;
        tracker.reopen();
    }

    pub async fn record_count(&self) -> i64 {
        let cycle = self.state.accountant.current_cycle();
        self.state.db.usage().count_records(&cycle).await.unwrap()
    }
}
