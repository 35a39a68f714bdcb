use crate::error::Result;
use crate::models::{AggregatePeriod, AppConfig, Watchlist};
use crate::services::aggregator::{AggregateReport, Aggregator};
use crate::services::alert_monitor::{AlertMonitor, MonitorReport};
use crate::services::database::SqliteStore;
use crate::services::money_flow::{FlowReport, MoneyFlowTracker};
use crate::services::notifier::Notifier;
use crate::services::ticker_fetcher::{MarketDataSource, TickerFailure, TickerFetcher};
use chrono::{DateTime, NaiveDate, Utc};
use tracing::{error, info, warn};

/// Result of fetching and storing prices for the watchlist
#[derive(Debug, Default)]
pub struct PullSummary {
    pub tickers: usize,
    pub fetched_points: usize,
    pub new_points: usize,
    /// Open bars updated with a later snapshot
    pub revised_points: usize,
    pub skipped_records: usize,
    pub failures: Vec<TickerFailure>,
}

/// Result of one full fetch → alerts → aggregate → money flow pass
#[derive(Debug, Default)]
pub struct CycleReport {
    pub pull: PullSummary,
    pub alerts: MonitorReport,
    pub aggregates: Vec<(AggregatePeriod, AggregateReport)>,
    pub flows: FlowReport,
}

/// Fetch every watchlist ticker from `start` and write the points to the store
///
/// Fetch and store failures are recorded per ticker; the batch always completes.
pub async fn pull_prices<S: MarketDataSource>(
    fetcher: &TickerFetcher<S>,
    store: &SqliteStore,
    watchlist: &Watchlist,
    start: &str,
) -> Result<PullSummary> {
    let tickers = watchlist.all_tickers();
    let report = fetcher.fetch_batch(&tickers, start, None).await;

    let mut summary = PullSummary {
        tickers: tickers.len(),
        fetched_points: report.total_points(),
        skipped_records: report.skipped_records,
        failures: report.failures,
        ..PullSummary::default()
    };

    let mut fetched: Vec<_> = report.fetched.into_iter().collect();
    fetched.sort_by(|a, b| a.0.cmp(&b.0));

    for (ticker, points) in fetched {
        match store.insert_price_points(&points).await {
            Ok(write) => {
                summary.new_points += write.inserted;
                summary.revised_points += write.revised;
            }
            Err(e) => {
                warn!(ticker = %ticker, error = %e, "Failed to store price points");
                summary.failures.push(TickerFailure {
                    ticker,
                    error: e.to_string(),
                    attempts: 1,
                    at: Utc::now(),
                });
            }
        }
    }

    for failure in &summary.failures {
        if let Err(e) = store.record_fetch_failure(failure).await {
            error!(ticker = %failure.ticker, error = %e, "Failed to record fetch failure");
        }
    }

    info!(
        tickers = summary.tickers,
        new_points = summary.new_points,
        revised_points = summary.revised_points,
        failed = summary.failures.len(),
        "Pull complete"
    );
    Ok(summary)
}

/// Run the alert monitor once over the stored prices
pub async fn check_alerts<N: Notifier>(
    config: &AppConfig,
    store: &SqliteStore,
    notifier: &N,
    watchlist: &Watchlist,
    now: DateTime<Utc>,
) -> Result<MonitorReport> {
    AlertMonitor::new(store, notifier, config.default_cooldown(), config.notify_max_attempts)
        .run(watchlist, now)
        .await
}

/// Recompute the given periods for every watchlist ticker
pub async fn aggregate_all(
    store: &SqliteStore,
    watchlist: &Watchlist,
    periods: &[AggregatePeriod],
    since: Option<DateTime<Utc>>,
) -> Result<Vec<(AggregatePeriod, AggregateReport)>> {
    let tickers = watchlist.all_tickers();
    let mut reports = Vec::with_capacity(periods.len());
    for &period in periods {
        let report = Aggregator::recompute(store, &tickers, watchlist.interval, period, since).await?;
        reports.push((period, report));
    }
    Ok(reports)
}

/// Update money flow from the newest stored bars and prune old snapshots
///
/// A failure here is logged and yields an empty report.
pub async fn track_flows(
    config: &AppConfig,
    store: &SqliteStore,
    watchlist: &Watchlist,
    now: DateTime<Utc>,
) -> FlowReport {
    let tickers = watchlist.all_tickers();
    let report = match MoneyFlowTracker::track(store, &tickers, watchlist.interval, now).await {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "Money flow update failed");
            return FlowReport::default();
        }
    };
    if let Err(e) = MoneyFlowTracker::prune(store, config.flow_retention_days, now).await {
        warn!(error = %e, "Failed to prune flow snapshots");
    }
    report
}

/// Pull → alerts → aggregate → money flow
///
/// Aggregation only rebuilds periods touching the fetched window.
pub async fn run_cycle<S: MarketDataSource, N: Notifier>(
    config: &AppConfig,
    store: &SqliteStore,
    fetcher: &TickerFetcher<S>,
    notifier: &N,
    watchlist: &Watchlist,
) -> Result<CycleReport> {
    let start = config.fetch_start_date();
    let pull = pull_prices(fetcher, store, watchlist, &start).await?;
    let alerts = check_alerts(config, store, notifier, watchlist, Utc::now()).await?;

    let since = NaiveDate::parse_from_str(&start, "%Y-%m-%d")
        .ok()
        .map(|date| date.and_time(chrono::NaiveTime::MIN).and_utc());
    let aggregates = aggregate_all(store, watchlist, &AggregatePeriod::all(), since).await?;
    let flows = track_flows(config, store, watchlist, Utc::now()).await;

    Ok(CycleReport {
        pull,
        alerts,
        aggregates,
        flows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AlertCondition, AlertRule, Interval};
    use crate::services::notifier::LogNotifier;
    use crate::services::ticker_fetcher::RetryPolicy;
    use crate::services::vci::{OhlcvData, VciError};
    use chrono::Duration;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn today() -> DateTime<Utc> {
        Utc::now().date_naive().and_time(chrono::NaiveTime::MIN).and_utc()
    }

    fn bar(ticker: &str, time: DateTime<Utc>, close: f64) -> OhlcvData {
        OhlcvData {
            time,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1_000_000,
            symbol: Some(ticker.to_string()),
        }
    }

    /// Two recent daily bars per ticker; XYZ always times out
    struct RecentSource;

    impl MarketDataSource for RecentSource {
        async fn fetch_history(
            &self,
            ticker: &str,
            _start: &str,
            _end: Option<&str>,
            _interval: Interval,
        ) -> std::result::Result<Vec<OhlcvData>, VciError> {
            if ticker == "XYZ" {
                return Err(VciError::Timeout);
            }
            let today = today();
            Ok(vec![bar(ticker, today - Duration::days(1), 10.0), bar(ticker, today, 10.6)])
        }
    }

    /// Today's bar is still open: 10.0 on the first fetch, 10.8 afterwards
    struct OpenBarSource {
        calls: AtomicU32,
    }

    impl MarketDataSource for OpenBarSource {
        async fn fetch_history(
            &self,
            ticker: &str,
            _start: &str,
            _end: Option<&str>,
            _interval: Interval,
        ) -> std::result::Result<Vec<OhlcvData>, VciError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let close = if call == 0 { 10.0 } else { 10.8 };
            let today = today();
            Ok(vec![bar(ticker, today - Duration::days(1), 9.9), bar(ticker, today, close)])
        }
    }

    fn watchlist() -> Watchlist {
        Watchlist {
            interval: Interval::Daily,
            tickers: vec!["ABC".to_string(), "XYZ".to_string(), "VCB".to_string()],
            rules: vec![AlertRule::new("abc-up", "ABC", AlertCondition::PriceAbove { threshold: 10.5 })],
        }
    }

    #[tokio::test]
    async fn test_cycle_completes_despite_failing_ticker() {
        let config = AppConfig::default();
        let store = SqliteStore::in_memory().await.unwrap();
        let fetcher = TickerFetcher::new(RecentSource, RetryPolicy::immediate(3), Interval::Daily);
        let notifier = LogNotifier;

        let report = run_cycle(&config, &store, &fetcher, &notifier, &watchlist()).await.unwrap();

        assert_eq!(report.pull.tickers, 3);
        assert_eq!(report.pull.new_points, 4);
        assert_eq!(report.pull.failures.len(), 1);
        assert_eq!(report.pull.failures[0].ticker, "XYZ");
        assert_eq!(report.pull.failures[0].attempts, 3);

        let failures = store.recent_fetch_failures(10).await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].ticker, "XYZ");

        assert_eq!(report.alerts.fired, 1);
        assert_eq!(report.aggregates.len(), 2);
        assert!(report.aggregates.iter().all(|(_, r)| r.tickers == 2));

        // ABC and VCB have bars, XYZ has none
        assert_eq!(report.flows.snapshots.len(), 2);
        assert_eq!(report.flows.missing, vec!["XYZ".to_string()]);
        let date = report.flows.date.unwrap();
        assert_eq!(store.load_sector_flows(date).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_second_pull_adds_nothing() {
        let store = SqliteStore::in_memory().await.unwrap();
        let fetcher = TickerFetcher::new(RecentSource, RetryPolicy::immediate(1), Interval::Daily);

        let first = pull_prices(&fetcher, &store, &watchlist(), "2025-01-01").await.unwrap();
        let second = pull_prices(&fetcher, &store, &watchlist(), "2025-01-01").await.unwrap();
        assert_eq!(first.new_points, 4);
        assert_eq!(second.new_points, 0);
        assert_eq!(second.revised_points, 0);
        assert_eq!(second.fetched_points, 4);
    }

    #[tokio::test]
    async fn test_open_bar_update_reaches_alerts_and_aggregates() {
        let config = AppConfig::default();
        let store = SqliteStore::in_memory().await.unwrap();
        let source = OpenBarSource {
            calls: AtomicU32::new(0),
        };
        let fetcher = TickerFetcher::new(source, RetryPolicy::immediate(1), Interval::Daily);
        let notifier = LogNotifier;
        let watchlist = Watchlist {
            interval: Interval::Daily,
            tickers: vec!["ABC".to_string()],
            rules: vec![AlertRule::new("abc-up", "ABC", AlertCondition::PriceAbove { threshold: 10.5 })],
        };

        let first = run_cycle(&config, &store, &fetcher, &notifier, &watchlist).await.unwrap();
        assert_eq!(first.pull.new_points, 2);
        assert_eq!(first.alerts.fired, 0);

        let second = run_cycle(&config, &store, &fetcher, &notifier, &watchlist).await.unwrap();
        assert_eq!(second.pull.new_points, 0);
        assert_eq!(second.pull.revised_points, 1);
        assert_eq!(second.alerts.fired, 1);
        assert_eq!(
            second.alerts.outcomes,
            vec![("abc-up".to_string(), "fired")]
        );

        let stored = store.latest_points("ABC", Interval::Daily, 1).await.unwrap();
        assert_eq!(stored[0].time, today());
        assert_eq!(stored[0].close, 10.8);

        let weeks = store
            .load_aggregate_bars(Some("ABC"), AggregatePeriod::Week)
            .await
            .unwrap();
        assert_eq!(weeks.last().map(|bar| bar.close), Some(10.8));
    }
}
