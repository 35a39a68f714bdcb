//! Money flow and valuation rollups
//!
//! A ticker's flow for a bar is `(close - open) × volume`: positive when the
//! bar closed up, negative when it closed down. Flows are summed per
//! [`Sector`] into a daily summary. Valuation multiples come from
//! fundamentals imported from CSV and are priced at the bar's close.
//!
//! Intraday snapshots are appended on every run and pruned after the
//! configured retention; the sector summary of a date is replaced as a whole.

use crate::constants::INDEX_TICKERS;
use crate::error::Result;
use crate::models::{
    normalize_ticker, FlowSnapshot, Fundamentals, Interval, PricePoint, Sector, SectorFlow, Valuation,
};
use crate::services::database::SqliteStore;
use crate::services::trading_hours::TradingHours;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use std::collections::BTreeMap;
use std::io::Read;
use tracing::{info, warn};

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0u32), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

fn is_index(ticker: &str) -> bool {
    INDEX_TICKERS.contains(&ticker)
}

/// P/E, P/B, P/S and market cap at `price`
///
/// Each multiple needs its inputs to be present and positive; P/B, P/S and
/// market cap also need the share count.
pub fn calculate_valuation(price: f64, fundamentals: Option<&Fundamentals>) -> Valuation {
    let Some(f) = fundamentals else {
        return Valuation::default();
    };
    if !(price.is_finite() && price > 0.0) {
        return Valuation::default();
    }

    let shares = positive(f.shares_outstanding);
    let market_cap = shares.map(|shares| price * shares);

    Valuation {
        pe: positive(f.eps).map(|eps| round2(price / eps)),
        pb: positive(f.equity)
            .zip(shares)
            .map(|(equity, shares)| round2(price / (equity / shares))),
        ps: positive(f.revenue)
            .zip(market_cap)
            .map(|(revenue, cap)| round2(cap / revenue)),
        market_cap_bn: market_cap.map(|cap| round2(cap / 1e9)),
    }
}

/// Flow of one bar
pub fn flow_snapshot(
    point: &PricePoint,
    fundamentals: Option<&Fundamentals>,
    taken_at: DateTime<Utc>,
) -> FlowSnapshot {
    let change = point.close - point.open;
    let price_change_pct = if point.open > 0.0 {
        round2(change / point.open * 100.0)
    } else {
        0.0
    };

    FlowSnapshot {
        ticker: point.ticker.clone(),
        sector: Sector::of(&point.ticker),
        taken_at,
        bar_time: point.time,
        open: point.open,
        close: point.close,
        volume: point.volume,
        price_change_pct,
        money_flow: change * point.volume as f64,
        valuation: calculate_valuation(point.close, fundamentals),
    }
}

/// Per-sector totals for one date, largest inflow first
pub fn summarize_by_sector(snapshots: &[FlowSnapshot], date: NaiveDate) -> Vec<SectorFlow> {
    let mut groups: BTreeMap<Sector, Vec<&FlowSnapshot>> = BTreeMap::new();
    for snapshot in snapshots {
        groups.entry(snapshot.sector).or_default().push(snapshot);
    }

    let mut flows: Vec<SectorFlow> = groups
        .into_iter()
        .map(|(sector, members)| SectorFlow {
            date,
            sector,
            total_flow_bn: round2(members.iter().map(|s| s.money_flow_bn()).sum()),
            avg_price_change_pct: mean(members.iter().map(|s| s.price_change_pct))
                .map(round2)
                .unwrap_or(0.0),
            avg_pe: mean(members.iter().filter_map(|s| s.valuation.pe)).map(round2),
            avg_pb: mean(members.iter().filter_map(|s| s.valuation.pb)).map(round2),
            stock_count: members.len() as u32,
        })
        .collect();

    flows.sort_by(|a, b| {
        b.total_flow_bn
            .total_cmp(&a.total_flow_bn)
            .then_with(|| a.sector.name().cmp(b.sector.name()))
    });
    flows
}

/// The `n` tickers with the largest inflow
pub fn top_stocks(snapshots: &[FlowSnapshot], n: usize) -> Vec<&FlowSnapshot> {
    let mut ranked: Vec<&FlowSnapshot> = snapshots.iter().collect();
    ranked.sort_by(|a, b| {
        b.money_flow
            .total_cmp(&a.money_flow)
            .then_with(|| a.ticker.cmp(&b.ticker))
    });
    ranked.truncate(n);
    ranked
}

/// Read `ticker,eps,revenue,equity,shares_outstanding` rows
///
/// Empty cells are missing values. Rows with an invalid ticker are skipped.
pub fn read_fundamentals_csv<R: Read>(reader: R) -> Result<Vec<Fundamentals>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut rows = Vec::new();
    for record in csv_reader.deserialize::<Fundamentals>() {
        let mut row = record?;
        match normalize_ticker(&row.ticker) {
            Ok(ticker) => {
                row.ticker = ticker;
                rows.push(row);
            }
            Err(e) => warn!(ticker = %row.ticker, error = %e, "Skipping fundamentals row"),
        }
    }
    Ok(rows)
}

/// Flows of one run
#[derive(Debug, Default)]
pub struct FlowReport {
    pub date: Option<NaiveDate>,
    pub snapshots: Vec<FlowSnapshot>,
    pub sectors: Vec<SectorFlow>,
    /// Tickers without a stored bar
    pub missing: Vec<String>,
}

/// Computes money flow from the newest stored bars and keeps the store's flow tables current
pub struct MoneyFlowTracker;

impl MoneyFlowTracker {
    /// Snapshot the newest bar of every stock ticker and replace today's sector summary
    ///
    /// Index tickers are skipped.
    pub async fn track(
        store: &SqliteStore,
        tickers: &[String],
        interval: Interval,
        taken_at: DateTime<Utc>,
    ) -> Result<FlowReport> {
        let date = TradingHours::default().local_date(taken_at);
        let fundamentals = store.load_fundamentals().await?;

        let mut report = FlowReport {
            date: Some(date),
            ..FlowReport::default()
        };

        for ticker in tickers.iter().filter(|t| !is_index(t)) {
            let latest = store.latest_points(ticker, interval, 1).await?;
            match latest.last() {
                Some(point) => report
                    .snapshots
                    .push(flow_snapshot(point, fundamentals.get(ticker), taken_at)),
                None => report.missing.push(ticker.clone()),
            }
        }

        store.record_flow_snapshots(&report.snapshots).await?;
        report.sectors = summarize_by_sector(&report.snapshots, date);
        store.replace_sector_flows(date, &report.sectors).await?;

        info!(
            %date,
            stocks = report.snapshots.len(),
            sectors = report.sectors.len(),
            missing = report.missing.len(),
            "Money flow updated"
        );
        Ok(report)
    }

    /// Rebuild the sector summary of every trading date in `[start, end]` from stored bars
    ///
    /// Returns the summaries in date order. No intraday snapshots are written.
    pub async fn backfill(
        store: &SqliteStore,
        tickers: &[String],
        interval: Interval,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<(NaiveDate, Vec<SectorFlow>)>> {
        let hours = TradingHours::default();
        let fundamentals = store.load_fundamentals().await?;
        let from = start.and_time(NaiveTime::MIN).and_utc();
        let to = (end + Duration::days(1)).and_time(NaiveTime::MIN).and_utc();

        let mut by_date: BTreeMap<NaiveDate, Vec<FlowSnapshot>> = BTreeMap::new();
        for ticker in tickers.iter().filter(|t| !is_index(t)) {
            let points = store.points_between(ticker, interval, Some(from), Some(to)).await?;
            for point in &points {
                by_date
                    .entry(hours.local_date(point.time))
                    .or_default()
                    .push(flow_snapshot(point, fundamentals.get(ticker), point.time));
            }
        }

        let mut summaries = Vec::with_capacity(by_date.len());
        for (date, snapshots) in by_date {
            let sectors = summarize_by_sector(&snapshots, date);
            store.replace_sector_flows(date, &sectors).await?;
            summaries.push((date, sectors));
        }

        info!(%start, %end, dates = summaries.len(), "Money flow history rebuilt");
        Ok(summaries)
    }

    /// Import fundamentals; returns the number of tickers written
    pub async fn import_fundamentals<R: Read>(store: &SqliteStore, reader: R) -> Result<usize> {
        let rows = read_fundamentals_csv(reader)?;
        store.upsert_fundamentals(&rows).await
    }

    /// Drop snapshots older than `retention_days` before `now`
    pub async fn prune(store: &SqliteStore, retention_days: u32, now: DateTime<Utc>) -> Result<u64> {
        let cutoff = now - Duration::days(retention_days as i64);
        let removed = store.prune_flow_snapshots(cutoff).await?;
        if removed > 0 {
            info!(removed, cutoff = %cutoff.format("%Y-%m-%d %H:%M"), "Pruned flow snapshots");
        }
        Ok(removed)
    }
}
