use serde::{Deserialize, Serialize};

use crate::billing::BillingCycle;

/// Budget severity, ordered `Normal < Warn < Downgrade < Throttle < Pause`.
///
/// Doubles as the `last_action` recorded in [`BudgetState`], where `Normal`
/// means no action has been taken this cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetLevel {
    #[default]
    Normal,
    Warn,
    Downgrade,
    Throttle,
    Pause,
}

impl BudgetLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Warn => "warn",
            Self::Downgrade => "downgrade",
            Self::Throttle => "throttle",
            Self::Pause => "pause",
        }
    }

    /// Parse a stored value. Unknown values read as `Normal`.
    pub fn from_str(s: &str) -> Self {
        match s {
            "warn" => Self::Warn,
            "downgrade" => Self::Downgrade,
            "throttle" => Self::Throttle,
            "pause" => Self::Pause,
            _ => Self::Normal,
        }
    }
}

impl std::fmt::Display for BudgetLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted enforcement state for one tenant and billing cycle.
///
/// Holds no money amounts; spend is always recomputed from the usage ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetState {
    pub billing_cycle: BillingCycle,
    pub last_action: BudgetLevel,
    pub warned_80: bool,
    pub downgraded: bool,
    pub throttled: bool,
}

impl BudgetState {
    /// Defaults for a cycle: nothing latched, no action taken.
    pub fn fresh(billing_cycle: BillingCycle) -> Self {
        Self {
            billing_cycle,
            last_action: BudgetLevel::Normal,
            warned_80: false,
            downgraded: false,
            throttled: false,
        }
    }

    pub fn any_flag_set(&self) -> bool {
        self.warned_80
            || self.downgraded
            || self.throttled
            || self.last_action != BudgetLevel::Normal
    }

    pub fn is_paused(&self) -> bool {
        self.last_action == BudgetLevel::Pause
    }

    /// Whether the one-shot latch for `level` is already set.
    pub fn is_latched(&self, level: BudgetLevel) -> bool {
        match level {
            BudgetLevel::Normal => true,
            BudgetLevel::Warn => self.warned_80,
            BudgetLevel::Downgrade => self.downgraded,
            BudgetLevel::Throttle => self.throttled,
            BudgetLevel::Pause => false,
        }
    }

    /// Set the latch for `level` and every latch below it.
    pub fn latch_through(&mut self, level: BudgetLevel) {
        self.warned_80 |= level >= BudgetLevel::Warn;
        self.downgraded |= level >= BudgetLevel::Downgrade;
        self.throttled |= level >= BudgetLevel::Throttle;
    }
}
