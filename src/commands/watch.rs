use super::{exit_with_error, load_context, open_store, runtime, vci_fetcher};
use crate::error::{AppError, Result};
use crate::services::ConfiguredNotifier;
use crate::worker::run_watch_worker;

pub fn run() {
    if let Err(e) = execute() {
        exit_with_error("Watch failed", e);
    }
}

fn execute() -> Result<()> {
    let (config, watchlist) = load_context()?;
    let notifier = ConfiguredNotifier::from_config(config.telegram.as_ref())?;

    println!(
        "👀 Watching {} tickers every {} minutes during trading hours (Ctrl+C to stop)",
        watchlist.all_tickers().len(),
        config.update_interval_minutes
    );

    runtime()?.block_on(async {
        let store = open_store(&config).await?;
        let fetcher = vci_fetcher(&config, &watchlist)?;

        tokio::select! {
            _ = run_watch_worker(config.clone(), store.clone(), fetcher, notifier, watchlist) => {}
            _ = tokio::signal::ctrl_c() => {
                println!("\n🛑 Stopping watch");
            }
        }

        store.close().await;
        Ok::<(), AppError>(())
    })
}
