use serde::{Deserialize, Serialize};
use std::fmt;

/// Fetch interval for price points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Interval {
    /// Daily candles
    #[default]
    #[serde(rename = "1D", alias = "daily")]
    Daily,
    /// Hourly candles
    #[serde(rename = "1H", alias = "hourly")]
    Hourly,
    /// Minute candles
    #[serde(rename = "1m", alias = "minute")]
    Minute,
}

impl Interval {
    /// Convert to VCI API format ("1D", "1H", "1m")
    pub fn to_vci_format(&self) -> &'static str {
        match self {
            Interval::Daily => "1D",
            Interval::Hourly => "1H",
            Interval::Minute => "1m",
        }
    }

    /// VCI `timeFrame` payload value
    pub fn vci_time_frame(&self) -> &'static str {
        match self {
            Interval::Daily => "ONE_DAY",
            Interval::Hourly => "ONE_HOUR",
            Interval::Minute => "ONE_MINUTE",
        }
    }

    /// Parse from string (case-insensitive for the long names)
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.trim() {
            "1D" | "1d" => return Ok(Interval::Daily),
            "1H" | "1h" => return Ok(Interval::Hourly),
            "1m" => return Ok(Interval::Minute),
            _ => {}
        }
        match s.trim().to_lowercase().as_str() {
            "daily" => Ok(Interval::Daily),
            "hourly" => Ok(Interval::Hourly),
            "minute" => Ok(Interval::Minute),
            _ => Err(format!("Invalid interval: {}. Valid options: 1D, 1H, 1m", s)),
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_vci_format())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_to_vci_format() {
        assert_eq!(Interval::Daily.to_vci_format(), "1D");
        assert_eq!(Interval::Hourly.to_vci_format(), "1H");
        assert_eq!(Interval::Minute.to_vci_format(), "1m");
        assert_eq!(Interval::Daily.vci_time_frame(), "ONE_DAY");
    }

    #[test]
    fn test_interval_from_str() {
        assert_eq!(Interval::from_str("1D").unwrap(), Interval::Daily);
        assert_eq!(Interval::from_str("daily").unwrap(), Interval::Daily);
        assert_eq!(Interval::from_str("1H").unwrap(), Interval::Hourly);
        assert_eq!(Interval::from_str("Hourly").unwrap(), Interval::Hourly);
        assert_eq!(Interval::from_str("1m").unwrap(), Interval::Minute);
        assert!(Interval::from_str("invalid").is_err());
    }

    #[test]
    fn test_interval_serde_names() {
        assert_eq!(serde_json::to_string(&Interval::Daily).unwrap(), "\"1D\"");
        let parsed: Interval = serde_json::from_str("\"hourly\"").unwrap();
        assert_eq!(parsed, Interval::Hourly);
    }
}
