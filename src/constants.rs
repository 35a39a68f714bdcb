//! Shared constants
//!
//! Defaults for the fetch/alert/aggregate pipeline and the column layout of
//! CSV exports. Environment variables in [`crate::models::AppConfig`] override
//! the runtime defaults.

/// List of index tickers (not individual stocks)
/// These are accepted by the watchlist even though they are longer than 4 letters
pub const INDEX_TICKERS: &[&str] = &["VNINDEX", "VN30"];

/// Minimum length of a stock ticker symbol
pub const MIN_TICKER_LEN: usize = 2;

/// Maximum length of a stock ticker symbol
pub const MAX_TICKER_LEN: usize = 4;

/// Default lookback window (number of previous points) for volume-based rules
pub const DEFAULT_LOOKBACK: usize = 20;

/// Default volume multiplier for volume spike and breakout rules
pub const DEFAULT_VOLUME_MULTIPLIER: f64 = 2.0;

/// Default cooldown between two firings of the same rule
pub const DEFAULT_ALERT_COOLDOWN_HOURS: i64 = 1;

/// Requests per minute allowed against the VCI API
pub const DEFAULT_VCI_RATE_LIMIT: u32 = 60;

/// Attempts per ticker before it is skipped for the cycle
pub const DEFAULT_FETCH_MAX_ATTEMPTS: u32 = 3;

/// Base backoff delay between fetch attempts (doubles each retry)
pub const DEFAULT_FETCH_BACKOFF_MS: u64 = 1000;

/// Upper bound for a single backoff delay
pub const MAX_BACKOFF_SECS: u64 = 60;

/// Attempts to deliver one notification
pub const DEFAULT_NOTIFY_MAX_ATTEMPTS: u32 = 3;

/// Number of recent days fetched on each pull (weekends and holidays included)
pub const DEFAULT_RESUME_DAYS: u32 = 5;

/// Minutes between watch cycles during trading hours
pub const DEFAULT_UPDATE_INTERVAL_MINUTES: u64 = 10;

/// Minutes between watch cycles outside trading hours
pub const NON_TRADING_INTERVAL_MINUTES: u64 = 60;

/// Days of intraday money flow snapshots kept before cleanup
pub const DEFAULT_FLOW_RETENTION_DAYS: u32 = 7;

/// Sectors and stocks listed in the money flow summary
pub const FLOW_TOP_SECTORS: usize = 3;
pub const FLOW_TOP_STOCKS: usize = 5;

/// Database schema version stored in the metadata table
pub const DB_SCHEMA_VERSION: &str = "1";

/// Header of price point CSV exports
pub const PRICE_CSV_HEADER: &[&str] = &["ticker", "time", "open", "high", "low", "close", "volume"];

/// Header of aggregate bar CSV exports
pub const AGGREGATE_CSV_HEADER: &[&str] = &[
    "ticker",
    "period",
    "period_start",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "points",
];
