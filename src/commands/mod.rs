pub mod aggregate;
pub mod alerts;
pub mod export;
pub mod flow;
pub mod pull;
pub mod run;
pub mod status;
pub mod tickers;
pub mod watch;

use crate::error::{AppError, Result};
use crate::models::{AppConfig, Watchlist};
use crate::services::{RetryPolicy, SqliteStore, TickerFetcher, VciClient};

/// Create the Tokio runtime a command blocks on
pub(crate) fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new()
        .map_err(|e| AppError::Other(format!("Failed to create runtime: {}", e)))
}

/// Configuration and watchlist shared by most commands
pub(crate) fn load_context() -> Result<(AppConfig, Watchlist)> {
    let config = AppConfig::from_env()?;
    let watchlist = Watchlist::from_file(&config.watchlist_path)?;
    Ok((config, watchlist))
}

pub(crate) async fn open_store(config: &AppConfig) -> Result<SqliteStore> {
    SqliteStore::open(&config.database_path).await
}

/// VCI-backed fetcher configured from the environment
pub(crate) fn vci_fetcher(config: &AppConfig, watchlist: &Watchlist) -> Result<TickerFetcher<VciClient>> {
    let client = VciClient::new(true, config.vci_rate_limit)
        .map_err(|e| AppError::Network(format!("Failed to create VCI client: {}", e)))?;
    Ok(TickerFetcher::new(
        client,
        RetryPolicy::from_config(config),
        watchlist.interval,
    ))
}

/// Print a failure and exit with status 1
pub(crate) fn exit_with_error(context: &str, error: AppError) -> ! {
    eprintln!("❌ {}: {}", context, error);
    std::process::exit(1);
}
