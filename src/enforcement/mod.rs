//! Budget state machine and enforcer.
//!
//! Spend is classified against the limit into ordered levels. Warn,
//! downgrade and throttle are one-shot latches whose alert fires only on
//! the false to true transition within a cycle. Pause is not latched: every
//! enforcement at or above 150% re-attempts the pause side effects.

mod actions;

use std::sync::Arc;

pub use actions::*;
use tokio_util::task::TaskTracker;

use crate::{
    billing::BillingCycle,
    db::{BudgetStateRepo, DbResult},
    models::{BudgetLevel, BudgetState},
    observability::metrics,
};

/// Classify cycle spend against the limit.
///
/// Breakpoints are exact: `[0,80)` normal, `[80,100)` warn, `[100,120)`
/// downgrade, `[120,150)` throttle, `>=150` pause (percent of limit). A
/// non-positive limit classifies everything as normal.
pub fn classify(spend_microcents: i64, limit_microcents: i64) -> BudgetLevel {
    if limit_microcents <= 0 {
        return BudgetLevel::Normal;
    }
    let scaled = spend_microcents as i128 * 100;
    let at_least = |pct: i128| scaled >= limit_microcents as i128 * pct;

    if at_least(150) {
        BudgetLevel::Pause
    } else if at_least(120) {
        BudgetLevel::Throttle
    } else if at_least(100) {
        BudgetLevel::Downgrade
    } else if at_least(80) {
        BudgetLevel::Warn
    } else {
        BudgetLevel::Normal
    }
}

/// What one enforcement pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcementOutcome {
    /// Nothing new; carries the current classification.
    Unchanged(BudgetLevel),
    /// Spend fell under 80% with flags set; the state was cleared.
    Reset,
    /// A side effect was scheduled for this level.
    Fired(BudgetLevel),
}

/// Applies budget transitions and schedules their side effects.
pub struct Enforcer {
    tenant_id: String,
    limit_microcents: i64,
    states: Arc<dyn BudgetStateRepo>,
    notifier: Arc<dyn Notifier>,
    lifecycle: Arc<dyn ComputeLifecycle>,
    task_tracker: TaskTracker,
}

impl Enforcer {
    pub fn new(
        tenant_id: String,
        limit_microcents: i64,
        states: Arc<dyn BudgetStateRepo>,
        notifier: Arc<dyn Notifier>,
        lifecycle: Arc<dyn ComputeLifecycle>,
        task_tracker: TaskTracker,
    ) -> Self {
        Self {
            tenant_id,
            limit_microcents,
            states,
            notifier,
            lifecycle,
            task_tracker,
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn limit_microcents(&self) -> i64 {
        self.limit_microcents
    }

    /// The tenant's state for `cycle`.
    ///
    /// A stored state from any other cycle is replaced with fresh defaults
    /// under the new label and persisted.
    pub async fn current_state(&self, cycle: BillingCycle) -> DbResult<BudgetState> {
        match self.states.get(&self.tenant_id).await? {
            Some(state) if state.billing_cycle == cycle => Ok(state),
            previous => {
                let fresh = BudgetState::fresh(cycle);
                if let Some(previous) = previous {
                    tracing::info!(
                        tenant_id = %self.tenant_id,
                        from = %previous.billing_cycle,
                        to = %cycle,
                        "Billing cycle rolled over, budget state reset"
                    );
                }
                self.states.save(&self.tenant_id, &fresh).await?;
                Ok(fresh)
            }
        }
    }

    /// Re-derive the budget state from `spend` and fire newly reached actions.
    ///
    /// The state is saved before any side effect is scheduled. Side effects
    /// run detached on the task tracker; their failures are logged only.
    #[tracing::instrument(skip(self), fields(tenant_id = %self.tenant_id))]
    pub async fn enforce(
        &self,
        cycle: BillingCycle,
        spend_microcents: i64,
    ) -> DbResult<EnforcementOutcome> {
        let mut state = self.current_state(cycle).await?;
        let level = classify(spend_microcents, self.limit_microcents);

        match level {
            BudgetLevel::Normal => {
                if !state.any_flag_set() {
                    return Ok(EnforcementOutcome::Unchanged(level));
                }
                self.states
                    .save(&self.tenant_id, &BudgetState::fresh(cycle))
                    .await?;
                tracing::info!(spend_microcents, "Spend back under 80%, budget state reset");
                Ok(EnforcementOutcome::Reset)
            }
            BudgetLevel::Pause => {
                state.latch_through(level);
                state.last_action = BudgetLevel::Pause;
                self.states.save(&self.tenant_id, &state).await?;
                tracing::warn!(spend_microcents, "Budget at pause level, stopping compute");
                self.fire_pause(spend_microcents);
                Ok(EnforcementOutcome::Fired(level))
            }
            _ if state.is_latched(level) => Ok(EnforcementOutcome::Unchanged(level)),
            _ => {
                state.latch_through(level);
                state.last_action = state.last_action.max(level);
                self.states.save(&self.tenant_id, &state).await?;
                tracing::info!(%level, spend_microcents, "Budget threshold crossed");
                self.fire_alert(level, spend_microcents);
                Ok(EnforcementOutcome::Fired(level))
            }
        }
    }

    fn fire_alert(&self, level: BudgetLevel, spend_microcents: i64) {
        metrics::record_enforcement_action(level.as_str());
        let alert = BudgetAlert::new(
            &self.tenant_id,
            level,
            spend_microcents,
            self.limit_microcents,
        );
        let notifier = self.notifier.clone();
        self.task_tracker.spawn(async move {
            if let Err(e) = notifier.alert(&alert).await {
                metrics::record_side_effect_failure("alert");
                tracing::error!(error = %e, level = %alert.level, "Failed to send budget alert");
            }
        });
    }

    /// Alert, notify and stop are attempted independently.
    fn fire_pause(&self, spend_microcents: i64) {
        self.fire_alert(BudgetLevel::Pause, spend_microcents);

        let notice = PauseNotice::new(&self.tenant_id, spend_microcents, self.limit_microcents);
        let notifier = self.notifier.clone();
        self.task_tracker.spawn(async move {
            if let Err(e) = notifier.notify_pause(&notice).await {
                metrics::record_side_effect_failure("notify");
                tracing::error!(error = %e, "Failed to send pause notification");
            }
        });

        let lifecycle = self.lifecycle.clone();
        let tenant_id = self.tenant_id.clone();
        self.task_tracker.spawn(async move {
            match lifecycle.stop(&tenant_id).await {
                Ok(()) => {
                    tracing::info!(%tenant_id, backend = lifecycle.name(), "Stop action completed")
                }
                Err(e) => {
                    metrics::record_side_effect_failure("stop");
                    tracing::error!(
                        error = %e,
                        %tenant_id,
                        backend = lifecycle.name(),
                        "Stop action failed, will retry on next over-budget request"
                    );
                }
            }
        });
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use rstest::rstest;

    use super::*;
    use crate::db::tests::harness::create_test_db;

    const LIMIT: i64 = 40_000_000;

    /// Records every side effect instead of performing it.
    #[derive(Default)]
    pub struct RecordingActions {
        pub alerts: Mutex<Vec<BudgetAlert>>,
        pub pauses: Mutex<Vec<PauseNotice>>,
        pub stops: Mutex<Vec<String>>,
        pub fail: bool,
    }

    impl RecordingActions {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        pub fn alert_levels(&self) -> Vec<BudgetLevel> {
            self.alerts.lock().unwrap().iter().map(|a| a.level).collect()
        }

        pub fn stop_count(&self) -> usize {
            self.stops.lock().unwrap().len()
        }

        fn outcome(&self) -> ActionResult<()> {
            if self.fail {
                Err(ActionError::Timeout(std::time::Duration::from_secs(1)))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl Notifier for RecordingActions {
        async fn alert(&self, alert: &BudgetAlert) -> ActionResult<()> {
            self.alerts.lock().unwrap().push(alert.clone());
            self.outcome()
        }

        async fn notify_pause(&self, notice: &PauseNotice) -> ActionResult<()> {
            self.pauses.lock().unwrap().push(notice.clone());
            self.outcome()
        }
    }

    #[async_trait]
    impl ComputeLifecycle for RecordingActions {
        async fn stop(&self, tenant_id: &str) -> ActionResult<()> {
            self.stops.lock().unwrap().push(tenant_id.to_string());
            self.outcome()
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    pub struct EnforcerHarness {
        pub enforcer: Enforcer,
        pub actions: Arc<RecordingActions>,
        pub states: Arc<dyn BudgetStateRepo>,
        pub tracker: TaskTracker,
    }

    impl EnforcerHarness {
        /// Wait for every scheduled side effect.
        pub async fn settle(&self) {
            self.tracker.close();
            self.tracker.wait().await;
            self.tracker.reopen();
        }
    }

    async fn harness_with(actions: RecordingActions) -> EnforcerHarness {
        let db = create_test_db().await;
        let states = db.budget_states();
        let actions = Arc::new(actions);
        let tracker = TaskTracker::new();
        let enforcer = Enforcer::new(
            "acme".into(),
            LIMIT,
            states.clone(),
            actions.clone(),
            actions.clone(),
            tracker.clone(),
        );
        EnforcerHarness {
            enforcer,
            actions,
            states,
            tracker,
        }
    }

    async fn harness() -> EnforcerHarness {
        harness_with(RecordingActions::default()).await
    }

    fn cycle(label: &str) -> BillingCycle {
        label.parse().unwrap()
    }

    fn pct(p: i64) -> i64 {
        LIMIT * p / 100
    }

    #[rstest]
    #[case(0, BudgetLevel::Normal)]
    #[case(31_999_600, BudgetLevel::Normal)] // 79.999%
    #[case(31_999_999, BudgetLevel::Normal)]
    #[case(32_000_000, BudgetLevel::Warn)] // 80%
    #[case(39_999_999, BudgetLevel::Warn)]
    #[case(40_000_000, BudgetLevel::Downgrade)] // 100%
    #[case(47_999_999, BudgetLevel::Downgrade)]
    #[case(48_000_000, BudgetLevel::Throttle)] // 120%
    #[case(59_999_999, BudgetLevel::Throttle)]
    #[case(60_000_000, BudgetLevel::Pause)] // 150%
    #[case(i64::MAX, BudgetLevel::Pause)]
    fn test_classify_breakpoints(#[case] spend: i64, #[case] expected: BudgetLevel) {
        assert_eq!(classify(spend, LIMIT), expected);
    }

    #[rstest]
    #[case(100)]
    #[case(7_777)]
    #[case(1_000_000)]
    #[case(123_456_789)]
    fn test_classify_breakpoints_any_limit(#[case] limit: i64) {
        // 0.8 * L rounds up to the first whole microcent at or above 80%
        let warn_at = (limit * 80 + 99) / 100;
        let pause_at = (limit * 150 + 99) / 100;
        assert_eq!(classify(warn_at - 1, limit), BudgetLevel::Normal);
        assert_eq!(classify(warn_at, limit), BudgetLevel::Warn);
        assert_eq!(classify(pause_at - 1, limit), BudgetLevel::Throttle);
        assert_eq!(classify(pause_at, limit), BudgetLevel::Pause);
    }

    #[test]
    fn test_classify_zero_limit_is_normal() {
        assert_eq!(classify(100, 0), BudgetLevel::Normal);
    }

    #[tokio::test]
    async fn test_warn_twice_alerts_once() {
        let h = harness().await;
        let c = cycle("2025-03");

        let first = h.enforcer.enforce(c, pct(85)).await.unwrap();
        let second = h.enforcer.enforce(c, pct(85)).await.unwrap();
        h.settle().await;

        assert_eq!(first, EnforcementOutcome::Fired(BudgetLevel::Warn));
        assert_eq!(second, EnforcementOutcome::Unchanged(BudgetLevel::Warn));
        assert_eq!(h.actions.alert_levels(), vec![BudgetLevel::Warn]);

        let state = h.states.get("acme").await.unwrap().unwrap();
        assert!(state.warned_80);
        assert_eq!(state.last_action, BudgetLevel::Warn);
    }

    #[tokio::test]
    async fn test_escalation_fires_each_level_once() {
        let h = harness().await;
        let c = cycle("2025-03");

        for p in [50, 85, 90, 105, 110, 125, 130] {
            h.enforcer.enforce(c, pct(p)).await.unwrap();
        }
        h.settle().await;

        let mut levels = h.actions.alert_levels();
        levels.sort();
        assert_eq!(
            levels,
            vec![BudgetLevel::Warn, BudgetLevel::Downgrade, BudgetLevel::Throttle]
        );
        assert_eq!(h.actions.stop_count(), 0);
    }

    #[tokio::test]
    async fn test_jump_sets_lower_latches_and_fires_highest_only() {
        let h = harness().await;
        let c = cycle("2025-03");

        h.enforcer.enforce(c, pct(125)).await.unwrap();
        h.settle().await;

        let state = h.states.get("acme").await.unwrap().unwrap();
        assert!(state.warned_80 && state.downgraded && state.throttled);
        assert_eq!(state.last_action, BudgetLevel::Throttle);
        assert_eq!(h.actions.alert_levels(), vec![BudgetLevel::Throttle]);
    }

    #[tokio::test]
    async fn test_downgrade_latch_survives_drop_above_80() {
        let h = harness().await;
        let c = cycle("2025-03");

        h.enforcer.enforce(c, pct(110)).await.unwrap();
        let outcome = h.enforcer.enforce(c, pct(90)).await.unwrap();
        h.settle().await;

        assert_eq!(outcome, EnforcementOutcome::Unchanged(BudgetLevel::Warn));
        let state = h.states.get("acme").await.unwrap().unwrap();
        assert!(state.downgraded);
        assert_eq!(h.actions.alert_levels(), vec![BudgetLevel::Downgrade]);
    }

    #[tokio::test]
    async fn test_below_80_resets_everything() {
        let h = harness().await;
        let c = cycle("2025-03");

        h.enforcer.enforce(c, pct(160)).await.unwrap();
        let outcome = h.enforcer.enforce(c, pct(10)).await.unwrap();
        h.settle().await;

        assert_eq!(outcome, EnforcementOutcome::Reset);
        let state = h.states.get("acme").await.unwrap().unwrap();
        assert_eq!(state, BudgetState::fresh(c));

        // Latches are armed again after the reset.
        h.enforcer.enforce(c, pct(85)).await.unwrap();
        h.settle().await;
        assert_eq!(
            h.actions.alert_levels(),
            vec![BudgetLevel::Pause, BudgetLevel::Warn]
        );
    }

    #[tokio::test]
    async fn test_normal_without_flags_does_not_write() {
        let h = harness().await;
        let c = cycle("2025-03");

        let outcome = h.enforcer.enforce(c, pct(10)).await.unwrap();
        assert_eq!(outcome, EnforcementOutcome::Unchanged(BudgetLevel::Normal));
        h.settle().await;
        assert!(h.actions.alert_levels().is_empty());
    }

    #[tokio::test]
    async fn test_pause_reattempts_every_time() {
        let h = harness().await;
        let c = cycle("2025-03");

        for _ in 0..3 {
            let outcome = h.enforcer.enforce(c, pct(150)).await.unwrap();
            assert_eq!(outcome, EnforcementOutcome::Fired(BudgetLevel::Pause));
        }
        h.settle().await;

        assert_eq!(h.actions.stop_count(), 3);
        assert_eq!(h.actions.pauses.lock().unwrap().len(), 3);
        assert_eq!(h.actions.stops.lock().unwrap()[0], "acme");

        let state = h.states.get("acme").await.unwrap().unwrap();
        assert!(state.is_paused());
        assert!(state.throttled && state.downgraded && state.warned_80);
    }

    #[tokio::test]
    async fn test_pause_side_effects_are_independent() {
        let h = harness_with(RecordingActions::failing()).await;
        let c = cycle("2025-03");

        h.enforcer.enforce(c, pct(200)).await.unwrap();
        h.settle().await;

        // Every failing side effect was still attempted.
        assert_eq!(h.actions.alert_levels(), vec![BudgetLevel::Pause]);
        assert_eq!(h.actions.pauses.lock().unwrap().len(), 1);
        assert_eq!(h.actions.stop_count(), 1);

        // The state was persisted before anything ran.
        assert!(h.states.get("acme").await.unwrap().unwrap().is_paused());
    }

    #[tokio::test]
    async fn test_paused_stays_paused_above_80() {
        let h = harness().await;
        let c = cycle("2025-03");

        h.enforcer.enforce(c, pct(155)).await.unwrap();
        h.enforcer.enforce(c, pct(95)).await.unwrap();

        assert!(h.states.get("acme").await.unwrap().unwrap().is_paused());
    }

    #[tokio::test]
    async fn test_cycle_rollover_yields_fresh_state() {
        let h = harness().await;
        let march = cycle("2025-03");
        let april = cycle("2025-04");

        h.enforcer.enforce(march, pct(110)).await.unwrap();
        h.settle().await;
        let state = h.enforcer.current_state(april).await.unwrap();
        assert_eq!(state, BudgetState::fresh(april));

        // The rollover was persisted.
        let stored = h.states.get("acme").await.unwrap().unwrap();
        assert_eq!(stored.billing_cycle, april);
        assert!(!stored.downgraded);

        // And the new cycle alerts again from scratch.
        h.enforcer.enforce(april, pct(85)).await.unwrap();
        h.settle().await;
        assert_eq!(
            h.actions.alert_levels(),
            vec![BudgetLevel::Downgrade, BudgetLevel::Warn]
        );
    }
}
