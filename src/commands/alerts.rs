use super::{exit_with_error, load_context, open_store, runtime};
use crate::error::Result;
use crate::services::alert_monitor::MonitorReport;
use crate::services::ConfiguredNotifier;
use crate::worker::check_alerts;
use chrono::Utc;

pub fn run() {
    if let Err(e) = execute() {
        exit_with_error("Alert check failed", e);
    }
}

fn execute() -> Result<()> {
    let (config, watchlist) = load_context()?;
    let notifier = ConfiguredNotifier::from_config(config.telegram.as_ref())?;

    println!("🔔 Checking {} alert rules", watchlist.rules.len());

    let report = runtime()?.block_on(async {
        let store = open_store(&config).await?;
        let report = check_alerts(&config, &store, &notifier, &watchlist, Utc::now()).await;
        store.close().await;
        report
    })?;

    print_report(&report);
    Ok(())
}

pub(crate) fn print_report(report: &MonitorReport) {
    for (rule_id, reason) in &report.invalid_rules {
        println!("⚠️  Rule {} skipped: {}", rule_id, reason);
    }
    for (ticker, error) in &report.ticker_errors {
        println!("⚠️  {} alerts not checked: {}", ticker, error);
    }

    println!(
        "✅ Evaluated {} rules: {} fired, {} delivered",
        report.rules_evaluated, report.fired, report.delivered
    );
    if report.delivery_failures > 0 {
        println!(
            "⚠️  {} notifications could not be delivered (events were still recorded)",
            report.delivery_failures
        );
    }
}
