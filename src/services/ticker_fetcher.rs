use crate::constants::MAX_BACKOFF_SECS;
use crate::models::{AppConfig, Interval, MarketData, PricePoint};
use crate::services::vci::{OhlcvData, VciClient, VciError};
use chrono::{DateTime, Utc};
use std::time::Duration as StdDuration;
use tracing::{debug, info, warn};

/// Source of raw OHLCV history for a ticker
#[allow(async_fn_in_trait)]
pub trait MarketDataSource {
    async fn fetch_history(
        &self,
        ticker: &str,
        start: &str,
        end: Option<&str>,
        interval: Interval,
    ) -> Result<Vec<OhlcvData>, VciError>;
}

impl MarketDataSource for VciClient {
    async fn fetch_history(
        &self,
        ticker: &str,
        start: &str,
        end: Option<&str>,
        interval: Interval,
    ) -> Result<Vec<OhlcvData>, VciError> {
        self.get_history(ticker, start, end, interval).await
    }
}

/// Bounded exponential backoff with random jitter
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: StdDuration,
    pub max_delay: StdDuration,
    pub jitter: StdDuration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: StdDuration::from_secs(1),
            max_delay: StdDuration::from_secs(MAX_BACKOFF_SECS),
            jitter: StdDuration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_attempts: config.fetch_max_attempts,
            base_delay: config.fetch_backoff,
            ..Self::default()
        }
    }

    /// No waiting between attempts (tests)
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: StdDuration::ZERO,
            max_delay: StdDuration::ZERO,
            jitter: StdDuration::ZERO,
        }
    }

    /// Delay after the given failed attempt (1-based): base * 2^(attempt-1) + jitter, capped
    pub fn delay_for(&self, attempt: u32) -> StdDuration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        let backoff = self.base_delay.saturating_mul(factor).min(self.max_delay);
        let jitter = if self.jitter.is_zero() {
            StdDuration::ZERO
        } else {
            StdDuration::from_millis(rand::random::<u64>() % (self.jitter.as_millis() as u64 + 1))
        };
        (backoff + jitter).min(self.max_delay)
    }
}

/// A ticker skipped for the current cycle
#[derive(Debug, Clone)]
pub struct TickerFailure {
    pub ticker: String,
    pub error: String,
    pub attempts: u32,
    pub at: DateTime<Utc>,
}

/// Result of fetching one ticker
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub points: Vec<PricePoint>,
    /// Malformed records dropped during normalization
    pub skipped_records: usize,
    pub attempts: u32,
}

/// Result of a batch fetch; failures never abort the batch
#[derive(Debug, Default)]
pub struct BatchReport {
    pub fetched: MarketData,
    pub failures: Vec<TickerFailure>,
    pub skipped_records: usize,
}

impl BatchReport {
    pub fn total_points(&self) -> usize {
        self.fetched.values().map(|points| points.len()).sum()
    }
}

/// Convert raw provider records to validated price points
///
/// Records failing validation are dropped with a warning.
pub fn normalize_records(
    ticker: &str,
    interval: Interval,
    records: Vec<OhlcvData>,
) -> (Vec<PricePoint>, usize) {
    let mut points = Vec::with_capacity(records.len());
    let mut skipped = 0;

    for record in records {
        let point = PricePoint::new(
            ticker,
            record.time,
            record.open,
            record.high,
            record.low,
            record.close,
            record.volume,
        )
        .with_interval(interval);

        match point.validate() {
            Ok(()) => points.push(point),
            Err(reason) => {
                warn!(ticker, time = %record.time, %reason, "Skipping malformed record");
                skipped += 1;
            }
        }
    }

    points.sort_by(|a, b| a.time.cmp(&b.time));
    points.dedup_by(|a, b| a.time == b.time);
    (points, skipped)
}

/// Per-ticker fetcher with retry on transient provider errors
pub struct TickerFetcher<S: MarketDataSource> {
    source: S,
    retry: RetryPolicy,
    interval: Interval,
}

impl<S: MarketDataSource> TickerFetcher<S> {
    pub fn new(source: S, retry: RetryPolicy, interval: Interval) -> Self {
        Self {
            source,
            retry,
            interval,
        }
    }

    /// Fetch and normalize one ticker
    ///
    /// Transient errors are retried up to `max_attempts`; anything else fails
    /// immediately. A window with no data is not a failure.
    pub async fn fetch_ticker(
        &self,
        ticker: &str,
        start: &str,
        end: Option<&str>,
    ) -> Result<FetchOutcome, TickerFailure> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.source.fetch_history(ticker, start, end, self.interval).await {
                Ok(records) => {
                    let (points, skipped_records) = normalize_records(ticker, self.interval, records);
                    debug!(ticker, points = points.len(), skipped_records, attempt, "Fetched ticker");
                    return Ok(FetchOutcome {
                        points,
                        skipped_records,
                        attempts: attempt,
                    });
                }
                Err(VciError::NoData) => {
                    debug!(ticker, start, "No data in window");
                    return Ok(FetchOutcome {
                        attempts: attempt,
                        ..FetchOutcome::default()
                    });
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        ticker,
                        attempt,
                        max_attempts,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Transient fetch error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(TickerFailure {
                        ticker: ticker.to_string(),
                        error: e.to_string(),
                        attempts: attempt,
                        at: Utc::now(),
                    });
                }
            }
        }
    }

    /// Fetch every ticker in order; a failing ticker is logged and skipped
    pub async fn fetch_batch(&self, tickers: &[String], start: &str, end: Option<&str>) -> BatchReport {
        let mut report = BatchReport::default();

        for (index, ticker) in tickers.iter().enumerate() {
            match self.fetch_ticker(ticker, start, end).await {
                Ok(outcome) => {
                    report.skipped_records += outcome.skipped_records;
                    report.fetched.insert(ticker.clone(), outcome.points);
                }
                Err(failure) => {
                    warn!(
                        ticker = %failure.ticker,
                        attempts = failure.attempts,
                        error = %failure.error,
                        "Skipping ticker for this cycle"
                    );
                    report.failures.push(failure);
                }
            }
            debug!(progress = index + 1, total = tickers.len(), "Batch fetch progress");
        }

        info!(
            tickers = tickers.len(),
            fetched = report.fetched.len(),
            failed = report.failures.len(),
            points = report.total_points(),
            "Batch fetch complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Clone, Copy)]
    enum FailMode {
        Timeout,
        Rejected,
        Empty,
    }

    /// Returns canned records; listed tickers fail the given way
    struct FakeSource {
        failing: HashMap<String, FailMode>,
        calls: Mutex<HashMap<String, u32>>,
    }

    impl FakeSource {
        fn new(failing: &[(&str, FailMode)]) -> Self {
            Self {
                failing: failing.iter().map(|(t, mode)| (t.to_string(), *mode)).collect(),
                calls: Mutex::new(HashMap::new()),
            }
        }

        fn calls_for(&self, ticker: &str) -> u32 {
            self.calls.lock().unwrap().get(ticker).copied().unwrap_or(0)
        }
    }

    fn record(day: u32, close: f64) -> OhlcvData {
        OhlcvData {
            time: Utc.with_ymd_and_hms(2025, 11, day, 0, 0, 0).unwrap(),
            open: close,
            high: close + 100.0,
            low: close - 100.0,
            close,
            volume: 1_000_000,
            symbol: None,
        }
    }

    impl MarketDataSource for FakeSource {
        async fn fetch_history(
            &self,
            ticker: &str,
            _start: &str,
            _end: Option<&str>,
            _interval: Interval,
        ) -> Result<Vec<OhlcvData>, VciError> {
            *self.calls.lock().unwrap().entry(ticker.to_string()).or_insert(0) += 1;
            match self.failing.get(ticker) {
                Some(FailMode::Timeout) => return Err(VciError::Timeout),
                Some(FailMode::Rejected) => return Err(VciError::ClientError(400)),
                Some(FailMode::Empty) => return Err(VciError::NoData),
                None => {}
            }
            Ok(vec![record(4, 23400.0), record(3, 23200.0)])
        }
    }

    fn tickers(symbols: &[&str]) -> Vec<String> {
        symbols.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_batch_survives_ticker_that_keeps_timing_out() {
        let source = FakeSource::new(&[("XYZ", FailMode::Timeout)]);
        let fetcher = TickerFetcher::new(source, RetryPolicy::immediate(3), Interval::Daily);

        let report = fetcher
            .fetch_batch(&tickers(&["VCB", "XYZ", "FPT"]), "2025-11-01", None)
            .await;

        assert_eq!(report.fetched.len(), 2);
        assert_eq!(report.fetched["VCB"].len(), 2);
        assert_eq!(report.fetched["FPT"].len(), 2);
        assert!(!report.fetched.contains_key("XYZ"));

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].ticker, "XYZ");
        assert_eq!(report.failures[0].attempts, 3);
        assert_eq!(fetcher.source.calls_for("XYZ"), 3);
        assert_eq!(fetcher.source.calls_for("VCB"), 1);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let source = FakeSource::new(&[("BAD", FailMode::Rejected)]);
        let fetcher = TickerFetcher::new(source, RetryPolicy::immediate(3), Interval::Daily);

        let failure = fetcher.fetch_ticker("BAD", "2025-11-01", None).await.unwrap_err();
        assert_eq!(failure.attempts, 1);
        assert_eq!(fetcher.source.calls_for("BAD"), 1);
    }

    #[tokio::test]
    async fn test_no_data_is_an_empty_success() {
        let source = FakeSource::new(&[("TET", FailMode::Empty)]);
        let fetcher = TickerFetcher::new(source, RetryPolicy::immediate(3), Interval::Daily);

        let outcome = fetcher.fetch_ticker("TET", "2025-11-01", None).await.unwrap();
        assert!(outcome.points.is_empty());
        assert_eq!(outcome.attempts, 1);
    }

    #[test]
    fn test_normalize_drops_malformed_and_sorts() {
        let mut bad_close = record(5, 23000.0);
        bad_close.close = f64::NAN;
        let mut inverted = record(6, 23000.0);
        inverted.high = 1.0;

        let (points, skipped) = normalize_records(
            "VCB",
            Interval::Daily,
            vec![record(4, 23400.0), bad_close, record(3, 23200.0), inverted, record(3, 23200.0)],
        );

        assert_eq!(skipped, 2);
        assert_eq!(points.len(), 2);
        assert!(points[0].time < points[1].time);
        assert_eq!(points[0].ticker, "VCB");
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: StdDuration::from_secs(1),
            max_delay: StdDuration::from_secs(5),
            jitter: StdDuration::ZERO,
        };
        assert_eq!(policy.delay_for(1), StdDuration::from_secs(1));
        assert_eq!(policy.delay_for(2), StdDuration::from_secs(2));
        assert_eq!(policy.delay_for(3), StdDuration::from_secs(4));
        assert_eq!(policy.delay_for(4), StdDuration::from_secs(5));
    }
}
