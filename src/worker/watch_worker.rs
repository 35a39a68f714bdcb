use crate::constants::NON_TRADING_INTERVAL_MINUTES;
use crate::models::{AppConfig, Watchlist};
use crate::services::database::SqliteStore;
use crate::services::notifier::Notifier;
use crate::services::ticker_fetcher::{MarketDataSource, TickerFetcher};
use crate::services::trading_hours::{get_sync_interval, is_trading_day_today, is_trading_hours};
use crate::worker::cycle::run_cycle;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

/// Run the fetch → alerts → aggregate cycle forever
///
/// Cycles run every `UPDATE_INTERVAL_MINUTES` during trading hours and at a
/// relaxed cadence otherwise. Non-trading days skip the cycle entirely. The
/// watchlist is re-read every iteration so edits take effect without a
/// restart; a broken file keeps the previous one.
#[instrument(skip_all)]
pub async fn run<S: MarketDataSource, N: Notifier>(
    config: AppConfig,
    store: SqliteStore,
    fetcher: TickerFetcher<S>,
    notifier: N,
    mut watchlist: Watchlist,
) {
    let trading_interval = Duration::from_secs(config.update_interval_minutes * 60);
    let non_trading_interval = Duration::from_secs(NON_TRADING_INTERVAL_MINUTES * 60);

    info!(
        trading_interval_mins = config.update_interval_minutes,
        non_trading_interval_mins = NON_TRADING_INTERVAL_MINUTES,
        "Starting watch worker"
    );

    let mut iteration_count = 0u64;

    loop {
        iteration_count += 1;
        let loop_start = std::time::Instant::now();
        let is_trading = is_trading_hours();

        match Watchlist::from_file(&config.watchlist_path) {
            Ok(latest) => watchlist = latest,
            Err(e) => {
                warn!(iteration = iteration_count, error = %e, "Watch worker: Keeping previous watchlist");
            }
        }

        if is_trading_day_today() {
            info!(iteration = iteration_count, is_trading_hours = is_trading, "Watch worker: Starting cycle");

            match run_cycle(&config, &store, &fetcher, &notifier, &watchlist).await {
                Ok(report) => {
                    info!(
                        iteration = iteration_count,
                        new_points = report.pull.new_points,
                        revised_points = report.pull.revised_points,
                        fetch_failures = report.pull.failures.len(),
                        alerts_fired = report.alerts.fired,
                        delivery_failures = report.alerts.delivery_failures,
                        flow_stocks = report.flows.snapshots.len(),
                        "Watch worker: Cycle completed"
                    );
                }
                Err(e) => {
                    error!(iteration = iteration_count, error = %e, "Watch worker: Cycle failed");
                }
            }
        } else {
            info!(iteration = iteration_count, "Watch worker: Not a trading day, skipping cycle");
        }

        let sync_interval = get_sync_interval(trading_interval, non_trading_interval);

        info!(
            iteration = iteration_count,
            loop_duration_secs = loop_start.elapsed().as_secs_f64(),
            next_sync_secs = sync_interval.as_secs(),
            is_trading_hours = is_trading,
            "Watch worker: Iteration completed"
        );

        sleep(sync_interval).await;
    }
}
