mod aggregate;
mod alert;
mod app_config;
mod interval;
mod money_flow;
mod price_point;
mod sector;
mod watchlist;

pub use aggregate::{AggregateBar, AggregatePeriod};
pub use alert::{AlertCondition, AlertEvent, AlertRule, AlertStateMap, RuleState};
pub use app_config::{AppConfig, TelegramConfig};
pub use interval::Interval;
pub use money_flow::{FlowSnapshot, Fundamentals, SectorFlow, Valuation};
pub use price_point::PricePoint;
pub use sector::Sector;
pub use watchlist::{normalize_ticker, Watchlist};

use std::collections::HashMap;

/// Time series for a single ticker, oldest first
pub type TimeSeries = Vec<PricePoint>;

/// Market data collection (ticker -> time series)
pub type MarketData = HashMap<String, TimeSeries>;
