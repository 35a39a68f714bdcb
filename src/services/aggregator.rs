use crate::error::Result;
use crate::models::{AggregateBar, AggregatePeriod, Interval, PricePoint};
use crate::services::database::SqliteStore;
use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveTime, Utc};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Rolls price points up into weekly and monthly bars
pub struct Aggregator;

/// Outcome of a recompute over the store
#[derive(Debug, Default)]
pub struct AggregateReport {
    pub bars_written: usize,
    pub tickers: usize,
    pub failures: Vec<(String, String)>,
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

impl Aggregator {
    /// Start of the period containing `time`
    ///
    /// Weeks start on Monday 00:00 UTC (ISO 8601), months on the 1st.
    pub fn period_start(time: DateTime<Utc>, period: AggregatePeriod) -> DateTime<Utc> {
        let date = time.date_naive();
        match period {
            AggregatePeriod::Week => {
                let days_from_monday = date.weekday().num_days_from_monday() as i64;
                start_of_day(date - Duration::days(days_from_monday))
            }
            AggregatePeriod::Month => start_of_day(date.with_day(1).unwrap_or(date)),
        }
    }

    /// Start of the period after the one beginning at `start`
    pub fn next_period_start(start: DateTime<Utc>, period: AggregatePeriod) -> DateTime<Utc> {
        match period {
            AggregatePeriod::Week => start + Duration::weeks(1),
            AggregatePeriod::Month => start_of_day(
                start
                    .date_naive()
                    .checked_add_months(Months::new(1))
                    .unwrap_or(NaiveDate::MAX),
            ),
        }
    }

    /// Widen `[start, end)` so it covers whole periods
    pub fn period_bounds(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        period: AggregatePeriod,
    ) -> (DateTime<Utc>, DateTime<Utc>) {
        let first = Self::period_start(start, period);
        let last = Self::period_start(end, period);
        let widened_end = if last == end {
            end
        } else {
            Self::next_period_start(last, period)
        };
        (first, widened_end)
    }

    /// Reduce points to one bar per (ticker, period start)
    ///
    /// open = first, close = last, high/low = extrema, volume = sum. Output is
    /// ordered by ticker then period start and does not depend on input order.
    pub fn aggregate(points: &[PricePoint], period: AggregatePeriod) -> Vec<AggregateBar> {
        let mut buckets: BTreeMap<(String, DateTime<Utc>), Vec<&PricePoint>> = BTreeMap::new();
        for point in points {
            let key = (point.ticker.clone(), Self::period_start(point.time, period));
            buckets.entry(key).or_default().push(point);
        }

        let bars: Vec<AggregateBar> = buckets
            .into_iter()
            .map(|((ticker, period_start), mut records)| {
                records.sort_by_key(|r| r.time);
                Self::reduce(ticker, period, period_start, &records)
            })
            .collect();

        debug!(points = points.len(), bars = bars.len(), %period, "Aggregated points");
        bars
    }

    fn reduce(
        ticker: String,
        period: AggregatePeriod,
        period_start: DateTime<Utc>,
        records: &[&PricePoint],
    ) -> AggregateBar {
        let first = records[0];
        let last = records[records.len() - 1];

        AggregateBar {
            ticker,
            period,
            period_start,
            open: first.open,
            high: records.iter().map(|r| r.high).fold(f64::NEG_INFINITY, f64::max),
            low: records.iter().map(|r| r.low).fold(f64::INFINITY, f64::min),
            close: last.close,
            volume: records.iter().map(|r| r.volume).sum(),
            point_count: records.len() as u32,
        }
    }

    /// Recompute bars for the given tickers from stored points and upsert them
    ///
    /// With `since`, only periods touching `[since, now)` are rebuilt; the
    /// range is widened to whole periods so no partial bar is written. A
    /// ticker that fails is logged and skipped.
    pub async fn recompute(
        store: &SqliteStore,
        tickers: &[String],
        interval: Interval,
        period: AggregatePeriod,
        since: Option<DateTime<Utc>>,
    ) -> Result<AggregateReport> {
        let mut report = AggregateReport::default();
        let start = since.map(|since| Self::period_start(since, period));

        for ticker in tickers {
            let points = match store.points_between(ticker, interval, start, None).await {
                Ok(points) => points,
                Err(e) => {
                    warn!(ticker = %ticker, error = %e, %period, "Failed to load points for aggregation");
                    report.failures.push((ticker.clone(), e.to_string()));
                    continue;
                }
            };
            if points.is_empty() {
                continue;
            }

            let bars = Self::aggregate(&points, period);
            match store.upsert_aggregate_bars(&bars).await {
                Ok(written) => {
                    report.bars_written += written;
                    report.tickers += 1;
                }
                Err(e) => {
                    warn!(ticker = %ticker, error = %e, %period, "Failed to store aggregate bars");
                    report.failures.push((ticker.clone(), e.to_string()));
                }
            }
        }

        info!(
            %period,
            tickers = report.tickers,
            bars = report.bars_written,
            failed = report.failures.len(),
            "Aggregation complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(d: u32, close: f64, volume: u64) -> PricePoint {
        let time = Utc.with_ymd_and_hms(2025, 11, d, 0, 0, 0).unwrap();
        PricePoint::new("VCB", time, close - 1.0, close + 1.0, close - 2.0, close, volume)
    }

    #[test]
    fn test_period_start_week() {
        // Wednesday Nov 5, 2025
        let time = Utc.with_ymd_and_hms(2025, 11, 5, 15, 30, 0).unwrap();
        assert_eq!(
            Aggregator::period_start(time, AggregatePeriod::Week),
            Utc.with_ymd_and_hms(2025, 11, 3, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_period_start_month() {
        let time = Utc.with_ymd_and_hms(2025, 11, 15, 12, 30, 45).unwrap();
        assert_eq!(
            Aggregator::period_start(time, AggregatePeriod::Month),
            Utc.with_ymd_and_hms(2025, 11, 1, 0, 0, 0).unwrap()
        );
        let december = Utc.with_ymd_and_hms(2025, 12, 1, 0, 0, 0).unwrap();
        assert_eq!(
            Aggregator::next_period_start(december, AggregatePeriod::Month),
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_period_bounds_widen_to_whole_weeks() {
        let start = Utc.with_ymd_and_hms(2025, 11, 5, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 11, 12, 0, 0, 0).unwrap();
        let (from, to) = Aggregator::period_bounds(start, end, AggregatePeriod::Week);
        assert_eq!(from, Utc.with_ymd_and_hms(2025, 11, 3, 0, 0, 0).unwrap());
        assert_eq!(to, Utc.with_ymd_and_hms(2025, 11, 17, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_weekly_ohlcv_reduction() {
        // Mon 3 .. Fri 7, then Mon 10
        let points = vec![
            day(5, 102.0, 3000),
            day(3, 100.0, 1000),
            day(7, 101.0, 5000),
            day(4, 105.0, 2000),
            day(10, 110.0, 7000),
        ];

        let bars = Aggregator::aggregate(&points, AggregatePeriod::Week);
        assert_eq!(bars.len(), 2);

        let first = &bars[0];
        assert_eq!(first.period_start, Utc.with_ymd_and_hms(2025, 11, 3, 0, 0, 0).unwrap());
        assert_eq!(first.open, 99.0);
        assert_eq!(first.close, 101.0);
        assert_eq!(first.high, 106.0);
        assert_eq!(first.low, 98.0);
        assert_eq!(first.volume, 11000);
        assert_eq!(first.point_count, 4);

        assert_eq!(bars[1].point_count, 1);
        assert_eq!(bars[1].close, 110.0);
    }

    #[test]
    fn test_aggregation_is_deterministic() {
        let points = vec![day(3, 100.0, 1000), day(4, 105.0, 2000), day(28, 90.0, 500)];
        let mut shuffled = points.clone();
        shuffled.reverse();

        let a = Aggregator::aggregate(&points, AggregatePeriod::Month);
        let b = Aggregator::aggregate(&shuffled, AggregatePeriod::Month);
        assert_eq!(a, b);
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].close, 90.0);
    }

    #[tokio::test]
    async fn test_recompute_is_idempotent() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .insert_price_points(&[day(3, 100.0, 1000), day(4, 105.0, 2000), day(10, 110.0, 7000)])
            .await
            .unwrap();
        let tickers = vec!["VCB".to_string()];

        let first = Aggregator::recompute(&store, &tickers, Interval::Daily, AggregatePeriod::Week, None)
            .await
            .unwrap();
        assert_eq!(first.bars_written, 2);
        let bars_before = store.load_aggregate_bars(None, AggregatePeriod::Week).await.unwrap();

        Aggregator::recompute(&store, &tickers, Interval::Daily, AggregatePeriod::Week, None)
            .await
            .unwrap();
        let bars_after = store.load_aggregate_bars(None, AggregatePeriod::Week).await.unwrap();
        assert_eq!(bars_before, bars_after);
        assert_eq!(bars_after.len(), 2);
    }

    #[tokio::test]
    async fn test_recompute_since_rebuilds_whole_period() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .insert_price_points(&[day(3, 100.0, 1000), day(4, 105.0, 2000), day(5, 104.0, 1500)])
            .await
            .unwrap();
        let tickers = vec!["VCB".to_string()];

        // since mid-week still rebuilds the bar from Monday
        let since = Utc.with_ymd_and_hms(2025, 11, 5, 0, 0, 0).unwrap();
        Aggregator::recompute(&store, &tickers, Interval::Daily, AggregatePeriod::Week, Some(since))
            .await
            .unwrap();

        let bars = store.load_aggregate_bars(Some("VCB"), AggregatePeriod::Week).await.unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].point_count, 3);
        assert_eq!(bars[0].volume, 4500);
    }
}
