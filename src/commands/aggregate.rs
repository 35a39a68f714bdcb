use super::{exit_with_error, load_context, open_store, runtime};
use crate::error::{AppError, Result};
use crate::models::AggregatePeriod;
use crate::services::aggregator::{AggregateReport, Aggregator};
use crate::worker::aggregate_all;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

/// Parse `week`, `month` or `all`
pub(crate) fn parse_periods(value: &str) -> Result<Vec<AggregatePeriod>> {
    if value.eq_ignore_ascii_case("all") {
        return Ok(AggregatePeriod::all());
    }
    AggregatePeriod::from_str(value)
        .map(|period| vec![period])
        .ok_or_else(|| {
            AppError::InvalidInput(format!(
                "Invalid period: {}. Valid options: week, month, all",
                value
            ))
        })
}

fn parse_since(value: &str) -> Result<DateTime<Utc>> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(|date| date.and_time(NaiveTime::MIN).and_utc())
        .map_err(|e| AppError::InvalidInput(format!("Invalid --since date '{}': {}", value, e)))
}

pub fn run(period: String, since: Option<String>) {
    if let Err(e) = execute(&period, since.as_deref()) {
        exit_with_error("Aggregation failed", e);
    }
}

fn execute(period: &str, since: Option<&str>) -> Result<()> {
    let periods = parse_periods(period)?;
    let since = since.map(parse_since).transpose()?;
    let (config, watchlist) = load_context()?;

    for &period in &periods {
        match since {
            Some(since) => {
                let (from, to) = Aggregator::period_bounds(since, Utc::now(), period);
                println!(
                    "📊 Rebuilding {} bars from {} to {}",
                    period,
                    from.format("%Y-%m-%d"),
                    to.format("%Y-%m-%d")
                );
            }
            None => println!("📊 Rebuilding all {} bars", period),
        }
    }

    let reports = runtime()?.block_on(async {
        let store = open_store(&config).await?;
        let reports = aggregate_all(&store, &watchlist, &periods, since).await;
        store.close().await;
        reports
    })?;

    print_reports(&reports);
    Ok(())
}

pub(crate) fn print_reports(reports: &[(AggregatePeriod, AggregateReport)]) {
    for (period, report) in reports {
        println!(
            "✅ {}: {} bars across {} tickers",
            period, report.bars_written, report.tickers
        );
        for (ticker, error) in &report.failures {
            println!("   ⚠️  {} - {}", ticker, error);
        }
    }
}
