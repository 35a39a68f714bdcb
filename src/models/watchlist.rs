use super::{AlertRule, Interval};
use crate::constants::{INDEX_TICKERS, MAX_TICKER_LEN, MIN_TICKER_LEN};
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Tickers to track and the alert rules configured over them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Watchlist {
    /// Interval fetched and evaluated for every ticker
    #[serde(default)]
    pub interval: Interval,

    #[serde(default)]
    pub tickers: Vec<String>,

    #[serde(default)]
    pub rules: Vec<AlertRule>,
}

/// Normalize and validate a ticker symbol
///
/// Stock tickers are 2-4 ASCII letters; index tickers (VNINDEX, VN30) are
/// accepted as-is.
pub fn normalize_ticker(raw: &str) -> Result<String> {
    let ticker = raw.trim().to_uppercase();

    if INDEX_TICKERS.contains(&ticker.as_str()) {
        return Ok(ticker);
    }
    if ticker.len() < MIN_TICKER_LEN || ticker.len() > MAX_TICKER_LEN {
        return Err(AppError::InvalidInput(format!(
            "Ticker '{}' must have {}-{} characters",
            raw.trim(),
            MIN_TICKER_LEN,
            MAX_TICKER_LEN
        )));
    }
    if !ticker.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(AppError::InvalidInput(format!(
            "Ticker '{}' may only contain letters",
            raw.trim()
        )));
    }
    Ok(ticker)
}

impl Watchlist {
    /// Load the watchlist from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Cannot read watchlist {}: {}", path.display(), e))
        })?;
        let mut watchlist: Watchlist = serde_json::from_str(&content).map_err(|e| {
            AppError::Config(format!("Invalid watchlist {}: {}", path.display(), e))
        })?;

        for ticker in watchlist.tickers.iter_mut() {
            *ticker = ticker.trim().to_uppercase();
        }
        for rule in watchlist.rules.iter_mut() {
            rule.ticker = rule.ticker.trim().to_uppercase();
        }
        Ok(watchlist)
    }

    /// Write the watchlist back as pretty JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content + "\n")?;
        Ok(())
    }

    /// All tickers to fetch: listed tickers plus any ticker a rule refers to
    pub fn all_tickers(&self) -> Vec<String> {
        let mut tickers: Vec<String> = self
            .tickers
            .iter()
            .cloned()
            .chain(self.rules.iter().map(|r| r.ticker.clone()))
            .collect();
        tickers.sort();
        tickers.dedup();
        tickers
    }

    /// Rules attached to a ticker
    pub fn rules_for<'a>(&'a self, ticker: &'a str) -> impl Iterator<Item = &'a AlertRule> + 'a {
        self.rules.iter().filter(move |r| r.ticker == ticker)
    }

    /// Split rules into usable ones and configuration errors
    ///
    /// A rule is rejected when it fails validation or reuses an id already
    /// taken by an earlier rule.
    pub fn partition_rules(&self) -> (Vec<&AlertRule>, Vec<(String, String)>) {
        let mut valid = Vec::new();
        let mut invalid = Vec::new();
        let mut seen = HashSet::new();

        for rule in &self.rules {
            if let Err(e) = rule.validate() {
                invalid.push((rule.id.clone(), e));
                continue;
            }
            if !seen.insert(rule.id.as_str()) {
                invalid.push((rule.id.clone(), format!("duplicate rule id {}", rule.id)));
                continue;
            }
            valid.push(rule);
        }

        (valid, invalid)
    }

    /// Add a ticker; returns the normalized symbol
    pub fn add_ticker(&mut self, raw: &str) -> Result<String> {
        let ticker = normalize_ticker(raw)?;
        if self.tickers.contains(&ticker) {
            return Err(AppError::InvalidInput(format!(
                "Ticker {} is already in the watchlist",
                ticker
            )));
        }
        self.tickers.push(ticker.clone());
        Ok(ticker)
    }

    /// Remove a ticker and its rules; returns how many rules were dropped
    pub fn remove_ticker(&mut self, raw: &str) -> Result<usize> {
        let ticker = raw.trim().to_uppercase();
        if !self.tickers.contains(&ticker) {
            return Err(AppError::NotFound(format!(
                "Ticker {} is not in the watchlist",
                ticker
            )));
        }
        if self.tickers.len() <= 1 {
            return Err(AppError::InvalidInput(
                "Cannot remove the last ticker".to_string(),
            ));
        }

        self.tickers.retain(|t| t != &ticker);
        let before = self.rules.len();
        self.rules.retain(|r| r.ticker != ticker);
        Ok(before - self.rules.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AlertCondition;

    fn sample() -> Watchlist {
        Watchlist {
            interval: Interval::Daily,
            tickers: vec!["VNM".to_string(), "VIC".to_string()],
            rules: vec![
                AlertRule::new("vnm-low", "VNM", AlertCondition::PriceBelow { threshold: 80000.0 }),
                AlertRule::new("fpt-high", "FPT", AlertCondition::PriceAbove { threshold: 150000.0 }),
            ],
        }
    }

    #[test]
    fn test_normalize_ticker() {
        assert_eq!(normalize_ticker(" vnm ").unwrap(), "VNM");
        assert_eq!(normalize_ticker("vnindex").unwrap(), "VNINDEX");
        assert!(normalize_ticker("A").is_err());
        assert!(normalize_ticker("ABCDE").is_err());
        assert!(normalize_ticker("AB1").is_err());
    }

    #[test]
    fn test_all_tickers_includes_rule_tickers() {
        assert_eq!(sample().all_tickers(), vec!["FPT", "VIC", "VNM"]);
    }

    #[test]
    fn test_add_and_remove_ticker() {
        let mut watchlist = sample();
        assert_eq!(watchlist.add_ticker("hpg").unwrap(), "HPG");
        assert!(watchlist.add_ticker("HPG").is_err());

        assert_eq!(watchlist.remove_ticker("vnm").unwrap(), 1);
        assert!(watchlist.rules_for("VNM").next().is_none());
        assert!(watchlist.remove_ticker("VNM").is_err());
    }

    #[test]
    fn test_cannot_remove_last_ticker() {
        let mut watchlist = Watchlist {
            tickers: vec!["VNM".to_string()],
            ..Watchlist::default()
        };
        assert!(watchlist.remove_ticker("VNM").is_err());
    }

    #[test]
    fn test_partition_rules_rejects_duplicates_and_invalid() {
        let mut watchlist = sample();
        watchlist.rules.push(AlertRule::new(
            "vnm-low",
            "VNM",
            AlertCondition::PriceBelow { threshold: 70000.0 },
        ));
        watchlist.rules.push(AlertRule::new(
            "bad",
            "VIC",
            AlertCondition::PriceAbove { threshold: 0.0 },
        ));

        let (valid, invalid) = watchlist.partition_rules();
        assert_eq!(valid.len(), 2);
        assert_eq!(invalid.len(), 2);
        assert_eq!(invalid[0].0, "vnm-low");
        assert_eq!(invalid[1].0, "bad");
    }

    #[test]
    fn test_file_round_trip_normalizes_case() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watchlist.json");
        std::fs::write(
            &path,
            r#"{"tickers": ["vnm"], "rules": [{"id": "r1", "ticker": "vnm", "kind": "price_above", "threshold": 90000}]}"#,
        )
        .unwrap();

        let watchlist = Watchlist::from_file(&path).unwrap();
        assert_eq!(watchlist.interval, Interval::Daily);
        assert_eq!(watchlist.tickers, vec!["VNM"]);
        assert_eq!(watchlist.rules[0].ticker, "VNM");

        watchlist.save(&path).unwrap();
        assert_eq!(Watchlist::from_file(&path).unwrap(), watchlist);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = Watchlist::from_file("/nonexistent/watchlist.json").unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
