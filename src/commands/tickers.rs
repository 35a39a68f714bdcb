use super::exit_with_error;
use crate::error::{AppError, Result};
use crate::models::{AppConfig, Watchlist};
use clap::Subcommand;
use std::path::Path;

#[derive(Subcommand, Debug)]
pub enum TickerAction {
    /// List watched tickers and their rules
    List,
    /// Add a ticker to the watchlist
    Add { ticker: String },
    /// Remove a ticker and its rules from the watchlist
    Remove { ticker: String },
}

pub fn run(action: TickerAction) {
    if let Err(e) = execute(action) {
        exit_with_error("Watchlist update failed", e);
    }
}

fn load_or_empty(path: &Path) -> Result<Watchlist> {
    if path.exists() {
        Watchlist::from_file(path)
    } else {
        Ok(Watchlist::default())
    }
}

fn execute(action: TickerAction) -> Result<()> {
    let config = AppConfig::from_env()?;
    let path = config.watchlist_path.as_path();

    match action {
        TickerAction::List => {
            let watchlist = Watchlist::from_file(path)?;
            println!("📋 {} tickers ({})", watchlist.tickers.len(), watchlist.interval);
            for ticker in &watchlist.tickers {
                let rules: Vec<&str> = watchlist
                    .rules_for(ticker)
                    .map(|r| r.condition.kind_name())
                    .collect();
                if rules.is_empty() {
                    println!("   {}", ticker);
                } else {
                    println!("   {} ({})", ticker, rules.join(", "));
                }
            }
            let (_, invalid) = watchlist.partition_rules();
            for (rule_id, reason) in invalid {
                println!("⚠️  Rule {} is invalid: {}", rule_id, reason);
            }
        }
        TickerAction::Add { ticker } => {
            let mut watchlist = load_or_empty(path)?;
            let added = watchlist.add_ticker(&ticker)?;
            watchlist.save(path)?;
            println!("✅ Added {} ({} tickers)", added, watchlist.tickers.len());
        }
        TickerAction::Remove { ticker } => {
            if !path.exists() {
                return Err(AppError::NotFound(format!(
                    "Watchlist {} does not exist",
                    path.display()
                )));
            }
            let mut watchlist = Watchlist::from_file(path)?;
            let dropped = watchlist.remove_ticker(&ticker)?;
            watchlist.save(path)?;
            println!(
                "✅ Removed {} ({} rules dropped, {} tickers left)",
                ticker.trim().to_uppercase(),
                dropped,
                watchlist.tickers.len()
            );
        }
    }
    Ok(())
}
