use super::{exit_with_error, load_context, open_store, runtime, vci_fetcher};
use crate::error::Result;
use crate::models::normalize_ticker;
use crate::services::trading_hours::is_trading_day_today;
use crate::worker::{pull_prices, PullSummary};
use chrono::Utc;

pub fn run(days: Option<u32>, force: bool, tickers: Option<String>) {
    if let Err(e) = execute(days, force, tickers) {
        exit_with_error("Pull failed", e);
    }
}

fn execute(days: Option<u32>, force: bool, tickers: Option<String>) -> Result<()> {
    let (mut config, mut watchlist) = load_context()?;

    if !force && !is_trading_day_today() {
        println!("📅 Today is not a trading day in Vietnam, nothing to pull (use --force to override)");
        return Ok(());
    }

    if let Some(days) = days {
        config.resume_days = days;
    }
    if let Some(list) = tickers {
        let selected = list
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(normalize_ticker)
            .collect::<Result<Vec<_>>>()?;
        watchlist.tickers = selected;
        // rules of other tickers must not pull them in
        let keep = watchlist.tickers.clone();
        watchlist.rules.retain(|r| keep.contains(&r.ticker));
    }

    let start = config.fetch_start_date();
    println!(
        "📥 Pulling {} tickers ({}) since {}",
        watchlist.all_tickers().len(),
        watchlist.interval,
        start
    );

    let started = Utc::now();
    let summary = runtime()?.block_on(async {
        let store = open_store(&config).await?;
        let fetcher = vci_fetcher(&config, &watchlist)?;
        let summary = pull_prices(&fetcher, &store, &watchlist, &start).await;
        store.close().await;
        summary
    })?;

    print_summary(&summary);
    println!("⏱️  Took {}s", (Utc::now() - started).num_seconds());
    Ok(())
}

pub(crate) fn print_summary(summary: &PullSummary) {
    println!(
        "✅ Fetched {} points, {} new, {} revised ({} tickers)",
        summary.fetched_points, summary.new_points, summary.revised_points, summary.tickers
    );
    if summary.skipped_records > 0 {
        println!("⚠️  Skipped {} malformed records", summary.skipped_records);
    }
    if !summary.failures.is_empty() {
        println!("⚠️  {} tickers skipped this cycle:", summary.failures.len());
        for failure in &summary.failures {
            println!(
                "   {} - {} (after {} attempts)",
                failure.ticker, failure.error, failure.attempts
            );
        }
    }
}
