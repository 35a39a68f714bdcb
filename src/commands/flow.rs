use super::{exit_with_error, load_context, open_store, runtime};
use crate::constants::{FLOW_TOP_SECTORS, FLOW_TOP_STOCKS};
use crate::error::{AppError, Result};
use crate::models::SectorFlow;
use crate::services::money_flow::{top_stocks, FlowReport, MoneyFlowTracker};
use crate::services::trading_hours::TradingHours;
use chrono::{Duration, Utc};
use std::fs::File;
use std::path::PathBuf;

/// Money flow by sector and stock
pub fn run(fundamentals: Option<PathBuf>, days: Option<u32>, cleanup: bool) {
    if let Err(e) = execute(fundamentals, days, cleanup) {
        exit_with_error("Money flow failed", e);
    }
}

fn execute(fundamentals: Option<PathBuf>, days: Option<u32>, cleanup: bool) -> Result<()> {
    let (config, watchlist) = load_context()?;
    let tickers = watchlist.all_tickers();
    let now = Utc::now();

    runtime()?.block_on(async {
        let store = open_store(&config).await?;

        if let Some(path) = &fundamentals {
            let file = File::open(path)
                .map_err(|e| AppError::Io(format!("Failed to open {}: {}", path.display(), e)))?;
            let imported = MoneyFlowTracker::import_fundamentals(&store, file).await?;
            println!("📥 Imported fundamentals for {} tickers", imported);
        }

        if cleanup {
            let removed = MoneyFlowTracker::prune(&store, config.flow_retention_days, now).await?;
            println!(
                "🧹 Removed {} snapshots older than {} days",
                removed, config.flow_retention_days
            );
        } else if let Some(days) = days {
            let end = TradingHours::default().local_date(now);
            let start = end - Duration::days(days.saturating_sub(1) as i64);
            println!("📊 Rebuilding sector flows from {} to {}", start, end);
            let summaries =
                MoneyFlowTracker::backfill(&store, &tickers, watchlist.interval, start, end).await?;
            for (date, sectors) in &summaries {
                println!("\n📅 {}", date);
                print_sectors(sectors);
            }
            if summaries.is_empty() {
                println!("⚠️  No stored bars in that range");
            }
        } else {
            let report = MoneyFlowTracker::track(&store, &tickers, watchlist.interval, now).await?;
            print_report(&report);
        }

        store.close().await;
        Ok::<_, AppError>(())
    })
}

fn print_sectors(sectors: &[SectorFlow]) {
    for (rank, sector) in sectors.iter().take(FLOW_TOP_SECTORS).enumerate() {
        let pe = sector
            .avg_pe
            .map(|pe| format!(", P/E {:.1}", pe))
            .unwrap_or_default();
        println!(
            "   {}. {} ({}): {:+.2} bn VND, {:+.2}% avg, {} stocks{}",
            rank + 1,
            sector.sector,
            sector.sector.name_vi(),
            sector.total_flow_bn,
            sector.avg_price_change_pct,
            sector.stock_count,
            pe
        );
    }
}

pub(crate) fn print_report(report: &FlowReport) {
    if report.snapshots.is_empty() {
        println!("⚠️  No stored bars to compute money flow from");
        return;
    }

    println!("💰 Top sectors");
    print_sectors(&report.sectors);

    println!("\n🏆 Top stocks");
    for (rank, snapshot) in top_stocks(&report.snapshots, FLOW_TOP_STOCKS).iter().enumerate() {
        println!(
            "   {}. {} [{}]: {:+.2} bn VND ({:+.2}%)",
            rank + 1,
            snapshot.ticker,
            snapshot.sector,
            snapshot.money_flow_bn(),
            snapshot.price_change_pct
        );
    }

    if !report.missing.is_empty() {
        println!("\n⚠️  No stored bars for: {}", report.missing.join(", "));
    }
}
