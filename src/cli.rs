use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::commands;
use crate::commands::tickers::TickerAction;
use crate::utils::init_tracing;

#[derive(Parser)]
#[command(name = "stockvn")]
#[command(about = "Vietnamese stock price fetcher, alert monitor and aggregator", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch recent prices for the watchlist into the store
    Pull {
        /// Number of recent days to fetch (default: RESUME_DAYS)
        #[arg(short, long)]
        days: Option<u32>,

        /// Pull even on non-trading days
        #[arg(short, long)]
        force: bool,

        /// Comma-separated tickers to pull instead of the watchlist (e.g. VCB,FPT)
        #[arg(short, long)]
        tickers: Option<String>,
    },
    /// Evaluate alert rules against the newest stored prices
    Alerts,
    /// Rebuild weekly/monthly bars from stored prices
    Aggregate {
        /// week, month or all
        #[arg(short, long, default_value = "all")]
        period: String,

        /// Only rebuild periods from this date (YYYY-MM-DD)
        #[arg(short, long)]
        since: Option<String>,
    },
    /// Pull, check alerts and aggregate once
    Run {
        /// Run even on non-trading days
        #[arg(short, long)]
        force: bool,
    },
    /// Run the cycle continuously on the configured cadence
    Watch,
    /// Show store statistics and recent failures
    Status,
    /// Manage watchlist tickers
    Tickers {
        #[command(subcommand)]
        action: TickerAction,
    },
    /// Money flow by sector and stock from stored prices
    Flow {
        /// Import fundamentals CSV (ticker,eps,revenue,equity,shares_outstanding) first
        #[arg(long)]
        fundamentals: Option<PathBuf>,

        /// Rebuild daily sector flows for the last N days instead of taking a snapshot
        #[arg(short, long)]
        days: Option<u32>,

        /// Delete snapshots older than FLOW_RETENTION_DAYS
        #[arg(long)]
        cleanup: bool,
    },
    /// Export aggregate bars or raw prices as CSV
    Export {
        /// week, month or points
        #[arg(short, long, default_value = "week")]
        period: String,

        /// Only this ticker
        #[arg(short, long)]
        ticker: Option<String>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

pub fn run() {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Pull { days, force, tickers } => {
            commands::pull::run(days, force, tickers);
        }
        Commands::Alerts => {
            commands::alerts::run();
        }
        Commands::Aggregate { period, since } => {
            commands::aggregate::run(period, since);
        }
        Commands::Run { force } => {
            commands::run::run(force);
        }
        Commands::Watch => {
            commands::watch::run();
        }
        Commands::Status => {
            commands::status::run();
        }
        Commands::Tickers { action } => {
            commands::tickers::run(action);
        }
        Commands::Flow {
            fundamentals,
            days,
            cleanup,
        } => {
            commands::flow::run(fundamentals, days, cleanup);
        }
        Commands::Export {
            period,
            ticker,
            output,
        } => {
            commands::export::run(period, ticker, output);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pull_flags() {
        let cli = Cli::try_parse_from(["stockvn", "pull", "--days", "3", "--force", "-t", "VCB,FPT"]).unwrap();
        match cli.command {
            Commands::Pull { days, force, tickers } => {
                assert_eq!(days, Some(3));
                assert!(force);
                assert_eq!(tickers.as_deref(), Some("VCB,FPT"));
            }
            _ => panic!("expected pull"),
        }
    }

    #[test]
    fn test_parse_ticker_subcommand() {
        let cli = Cli::try_parse_from(["stockvn", "tickers", "add", "hpg"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Tickers {
                action: TickerAction::Add { .. }
            }
        ));
    }

    #[test]
    fn test_export_defaults() {
        let cli = Cli::try_parse_from(["stockvn", "export"]).unwrap();
        match cli.command {
            Commands::Export { period, ticker, output } => {
                assert_eq!(period, "week");
                assert!(ticker.is_none());
                assert!(output.is_none());
            }
            _ => panic!("expected export"),
        }
    }

    #[test]
    fn test_parse_flow_flags() {
        let cli = Cli::try_parse_from(["stockvn", "flow", "--fundamentals", "fin.csv", "-d", "5"]).unwrap();
        match cli.command {
            Commands::Flow {
                fundamentals,
                days,
                cleanup,
            } => {
                assert_eq!(fundamentals, Some(PathBuf::from("fin.csv")));
                assert_eq!(days, Some(5));
                assert!(!cleanup);
            }
            _ => panic!("expected flow"),
        }
    }
}
