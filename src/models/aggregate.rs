use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Calendar periods that price points are rolled up into
///
/// Both are computed from daily points:
/// - Week: Monday to Sunday (ISO 8601)
/// - Month: calendar month
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregatePeriod {
    /// Weekly candles - Monday to Sunday
    Week,
    /// Monthly candles - calendar month
    Month,
}

impl AggregatePeriod {
    /// Parse from string representation
    ///
    /// # Arguments
    /// * `s` - String like "week", "1W", "month", "1M"
    ///
    /// # Returns
    /// Some(AggregatePeriod) if valid, None otherwise
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "1W" | "week" | "weekly" => Some(AggregatePeriod::Week),
            "1M" | "month" | "monthly" => Some(AggregatePeriod::Month),
            _ => None,
        }
    }

    /// Storage key ("week" / "month")
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregatePeriod::Week => "week",
            AggregatePeriod::Month => "month",
        }
    }

    pub fn all() -> Vec<AggregatePeriod> {
        vec![AggregatePeriod::Week, AggregatePeriod::Month]
    }
}

impl fmt::Display for AggregatePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Period-reduced OHLCV summary derived from price points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateBar {
    pub ticker: String,
    pub period: AggregatePeriod,

    /// Start of the period (Monday 00:00 UTC or the 1st of the month)
    #[serde(with = "chrono::serde::ts_seconds")]
    pub period_start: DateTime<Utc>,

    /// First point's open
    pub open: f64,
    /// Maximum high
    pub high: f64,
    /// Minimum low
    pub low: f64,
    /// Last point's close
    pub close: f64,
    /// Sum of volumes
    pub volume: u64,

    /// Number of price points reduced into this bar
    pub point_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aggregate_period() {
        assert_eq!(AggregatePeriod::from_str("1W"), Some(AggregatePeriod::Week));
        assert_eq!(AggregatePeriod::from_str("week"), Some(AggregatePeriod::Week));
        assert_eq!(AggregatePeriod::from_str("1M"), Some(AggregatePeriod::Month));
        assert_eq!(AggregatePeriod::from_str("monthly"), Some(AggregatePeriod::Month));
        assert_eq!(AggregatePeriod::from_str("2W"), None);
    }

    #[test]
    fn test_period_storage_key() {
        assert_eq!(AggregatePeriod::Week.as_str(), "week");
        assert_eq!(AggregatePeriod::Month.to_string(), "month");
    }
}
