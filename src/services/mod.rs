pub mod aggregator;
pub mod alert_evaluator;
pub mod alert_monitor;
pub mod csv_export;
pub mod database;
pub mod money_flow;
pub mod notifier;
pub mod ticker_fetcher;
pub mod trading_hours;
pub mod vci;

pub use aggregator::{AggregateReport, Aggregator};
pub use alert_evaluator::{evaluate, evaluate_rules, Evaluation, Outcome};
pub use alert_monitor::{AlertMonitor, MonitorReport};
pub use database::{PriceWrite, SqliteStore, StoreStats};
pub use money_flow::{FlowReport, MoneyFlowTracker};
pub use notifier::{deliver_with_retry, ConfiguredNotifier, Delivery, LogNotifier, Notifier, TelegramNotifier};
pub use ticker_fetcher::{BatchReport, MarketDataSource, RetryPolicy, TickerFailure, TickerFetcher};
pub use trading_hours::{get_sync_interval, is_trading_day, is_trading_hours, TradingHours};
pub use vci::{OhlcvData, VciClient, VciError};
