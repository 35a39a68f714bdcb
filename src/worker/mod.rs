pub mod cycle;
pub mod watch_worker;

pub use cycle::{aggregate_all, check_alerts, pull_prices, run_cycle, track_flows, CycleReport, PullSummary};
pub use watch_worker::run as run_watch_worker;
