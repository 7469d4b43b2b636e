//! Usage reporting and alerting on top of the throttled caller's counters.

mod common;
mod usage;

pub use common::format_table;
pub use usage::{append_usage_log, usage_report, AlertKind, UsageAlert, UsageMonitor};
