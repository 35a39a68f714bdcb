use super::{exit_with_error, load_context, open_store, runtime, vci_fetcher};
use crate::error::Result;
use crate::services::trading_hours::is_trading_day_today;
use crate::services::ConfiguredNotifier;
use crate::worker::run_cycle;

/// Manual trigger: pull, check alerts, rebuild aggregates, update money flow
pub fn run(force: bool) {
    if let Err(e) = execute(force) {
        exit_with_error("Run failed", e);
    }
}

fn execute(force: bool) -> Result<()> {
    let (config, watchlist) = load_context()?;

    if !force && !is_trading_day_today() {
        println!("📅 Today is not a trading day in Vietnam, skipping run (use --force to override)");
        return Ok(());
    }

    let notifier = ConfiguredNotifier::from_config(config.telegram.as_ref())?;
    println!(
        "🚀 Running full cycle for {} tickers and {} rules",
        watchlist.all_tickers().len(),
        watchlist.rules.len()
    );

    let report = runtime()?.block_on(async {
        let store = open_store(&config).await?;
        let fetcher = vci_fetcher(&config, &watchlist)?;
        let report = run_cycle(&config, &store, &fetcher, &notifier, &watchlist).await;
        store.close().await;
        report
    })?;

    println!("\n📥 Pull");
    super::pull::print_summary(&report.pull);
    println!("\n🔔 Alerts");
    super::alerts::print_report(&report.alerts);
    println!("\n📊 Aggregates");
    super::aggregate::print_reports(&report.aggregates);
    println!("\n💰 Money flow");
    super::flow::print_report(&report.flows);
    Ok(())
}
