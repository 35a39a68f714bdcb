use super::{exit_with_error, load_context, open_store, runtime};
use crate::error::Result;
use crate::services::trading_hours::{is_trading_day_today, is_trading_hours};
use crate::utils::{format_date, format_thousands};

pub fn run() {
    println!("📊 Stock Data Status\n");

    if let Err(e) = show_status() {
        exit_with_error("Error", e);
    }
}

fn show_status() -> Result<()> {
    let (config, watchlist) = load_context()?;

    let (stats, failures, events) = runtime()?.block_on(async {
        let store = open_store(&config).await?;
        let stats = store.get_stats().await?;
        let failures = store.recent_fetch_failures(5).await?;
        let events = store.recent_alert_events(None, 5).await?;
        store.close().await;
        Ok::<_, crate::error::AppError>((stats, failures, events))
    })?;

    println!("🗄️  Database: {}", config.database_path.display());
    println!(
        "📋 Watchlist: {} tickers, {} rules ({})",
        watchlist.all_tickers().len(),
        watchlist.rules.len(),
        config.watchlist_path.display()
    );
    println!(
        "🕘 Market: {}",
        if is_trading_hours() {
            "open"
        } else if is_trading_day_today() {
            "closed (trading day)"
        } else {
            "closed (non-trading day)"
        }
    );

    println!("\n═══════════════════════════════════════════════════════════\n");

    if stats.total_points == 0 {
        println!("⚠️  No price data yet. Run 'pull' first.");
    } else {
        println!(
            "📈 {} price points across {} tickers",
            format_thousands(stats.total_points as u64),
            stats.unique_tickers
        );
        if let Some((first, last)) = &stats.date_range {
            println!("   Range: {} → {}", format_date(first), format_date(last));
        }
    }
    println!("📊 Aggregate bars: {}", format_thousands(stats.aggregate_bars as u64));
    println!(
        "💰 Flow snapshots: {} ({} tickers with fundamentals)",
        format_thousands(stats.flow_snapshots as u64),
        stats.fundamentals
    );
    println!(
        "🔔 Alert events: {} ({} undelivered)",
        stats.alert_events, stats.undelivered_events
    );

    if !events.is_empty() {
        println!("\n🔔 Recent alerts:");
        for event in &events {
            println!(
                "   {} {} {} close={} {}",
                format_date(&event.fired_at),
                event.ticker,
                event.kind,
                event.close,
                if event.delivered { "✅" } else { "❌" }
            );
        }
    }

    if !failures.is_empty() {
        println!("\n⚠️  Recent fetch failures ({} total):", stats.fetch_failures);
        for failure in &failures {
            println!(
                "   {} {} - {} (after {} attempts)",
                format_date(&failure.at),
                failure.ticker,
                failure.error,
                failure.attempts
            );
        }
    }

    Ok(())
}
