//! Background jobs.
//!
//! - **Daily report**: aggregates the previous day's usage and pushes it to
//!   the report sink, once at startup and then on a fixed interval.
//!
//! Jobs follow a consistent pattern:
//! 1. Configuration in `config/enforcement.rs`
//! 2. Worker function that runs in a loop with configurable interval
//! 3. Run function that performs a single pass, also callable on demand

mod daily_report;

pub use daily_report::{
    DailyReport, ModelReportLine, ReportError, Reporter, previous_day, start_daily_report_worker,
};
