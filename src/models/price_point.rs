use super::Interval;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One OHLCV sample for a ticker at a point in time
///
/// Prices are stored in full VND (e.g., 23200, not 23.2). Index tickers
/// (VNINDEX, VN30) carry their point value unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    /// Ticker symbol
    pub ticker: String,

    /// Interval this sample was fetched at
    pub interval: Interval,

    /// Timestamp of the data point
    #[serde(with = "chrono::serde::ts_seconds")]
    pub time: DateTime<Utc>,

    /// Opening price
    pub open: f64,

    /// Highest price
    pub high: f64,

    /// Lowest price
    pub low: f64,

    /// Closing price
    pub close: f64,

    /// Trading volume (number of shares)
    pub volume: u64,
}

impl PricePoint {
    /// Create a new daily price point
    pub fn new(
        ticker: &str,
        time: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: u64,
    ) -> Self {
        Self {
            ticker: ticker.to_string(),
            interval: Interval::Daily,
            time,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Same point at a different interval
    pub fn with_interval(mut self, interval: Interval) -> Self {
        self.interval = interval;
        self
    }

    /// Check the record is usable: finite prices, positive close, high >= low
    ///
    /// Returns a description of the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        let prices = [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
        ];
        for (name, value) in prices {
            if !value.is_finite() {
                return Err(format!("{} is not a finite number", name));
            }
            if value < 0.0 {
                return Err(format!("{} is negative ({})", name, value));
            }
        }
        if self.close <= 0.0 {
            return Err("close must be positive".to_string());
        }
        if self.high < self.low {
            return Err(format!("high ({}) is below low ({})", self.high, self.low));
        }
        Ok(())
    }
}
