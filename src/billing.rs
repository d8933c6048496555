//! Billing cycle labels.
//!
//! A cycle is identified by a year-month label. On or after the configured
//! start day the current month is the label; before it, the previous month.

use std::{fmt, str::FromStr};

use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BillingCycle {
    year: i32,
    month: u32,
}

impl BillingCycle {
    /// Cycle containing `date`.
    pub fn for_date(date: NaiveDate, start_day: u32) -> Self {
        if date.day() >= start_day {
            Self {
                year: date.year(),
                month: date.month(),
            }
        } else if date.month() == 1 {
            Self {
                year: date.year() - 1,
                month: 12,
            }
        } else {
            Self {
                year: date.year(),
                month: date.month() - 1,
            }
        }
    }

    /// Cycle containing today (UTC).
    pub fn current(start_day: u32) -> Self {
        Self::for_date(Utc::now().date_naive(), start_day)
    }

    /// First calendar day of the cycle.
    pub fn start_date(&self, start_day: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, start_day)
    }

    pub fn label(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for BillingCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid billing cycle label '{0}', expected YYYY-MM")]
pub struct InvalidCycleLabel(String);

impl FromStr for BillingCycle {
    type Err = InvalidCycleLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidCycleLabel(s.to_string());
        let (year, month) = s.split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        if !(1..=12).contains(&month) {
            return Err(invalid());
        }
        Ok(Self { year, month })
    }
}

impl Serialize for BillingCycle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BillingCycle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[rstest]
    #[case(date(2025, 3, 15), 1, "2025-03")]
    #[case(date(2025, 3, 1), 1, "2025-03")]
    #[case(date(2025, 3, 14), 15, "2025-02")]
    #[case(date(2025, 3, 15), 15, "2025-03")]
    #[case(date(2025, 1, 4), 5, "2024-12")]
    #[case(date(2025, 12, 31), 28, "2025-12")]
    fn test_cycle_label(#[case] on: NaiveDate, #[case] start_day: u32, #[case] expected: &str) {
        assert_eq!(BillingCycle::for_date(on, start_day).label(), expected);
    }

    #[test]
    fn test_start_date() {
        let cycle = BillingCycle::for_date(date(2025, 1, 4), 5);
        assert_eq!(cycle.start_date(5), Some(date(2024, 12, 5)));
    }

    #[test]
    fn test_parse_round_trip() {
        let cycle: BillingCycle = "2024-07".parse().unwrap();
        assert_eq!(cycle.to_string(), "2024-07");
        assert_eq!(serde_json::to_value(cycle).unwrap(), "2024-07");
    }

    #[rstest]
    #[case("2024-13")]
    #[case("2024-7")]
    #[case("24-07")]
    #[case("garbage")]
    fn test_parse_rejects_malformed(#[case] label: &str) {
        assert!(label.parse::<BillingCycle>().is_err());
    }

    #[test]
    fn test_cycles_order_chronologically() {
        let dec: BillingCycle = "2024-12".parse().unwrap();
        let jan: BillingCycle = "2025-01".parse().unwrap();
        assert!(dec < jan);
    }
}
