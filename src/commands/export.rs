use super::{exit_with_error, load_context, open_store, runtime};
use crate::error::{AppError, Result};
use crate::models::{normalize_ticker, AggregatePeriod};
use crate::services::csv_export::{write_aggregate_csv, write_price_csv};
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::PathBuf;

/// What to export
#[derive(Clone, Copy)]
enum ExportKind {
    Bars(AggregatePeriod),
    Points,
}

fn parse_kind(value: &str) -> Result<ExportKind> {
    if value.eq_ignore_ascii_case("points") || value.eq_ignore_ascii_case("raw") {
        return Ok(ExportKind::Points);
    }
    AggregatePeriod::from_str(value)
        .map(ExportKind::Bars)
        .ok_or_else(|| {
            AppError::InvalidInput(format!(
                "Invalid export period: {}. Valid options: week, month, points",
                value
            ))
        })
}

pub fn run(period: String, ticker: Option<String>, output: Option<PathBuf>) {
    if let Err(e) = execute(&period, ticker.as_deref(), output) {
        exit_with_error("Export failed", e);
    }
}

fn execute(period: &str, ticker: Option<&str>, output: Option<PathBuf>) -> Result<()> {
    let kind = parse_kind(period)?;
    let ticker = ticker.map(normalize_ticker).transpose()?;
    let (config, watchlist) = load_context()?;
    let raw_points = matches!(kind, ExportKind::Points);

    let (bars, points) = runtime()?.block_on(async {
        let store = open_store(&config).await?;
        let result = match kind {
            ExportKind::Bars(period) => {
                let bars = store.load_aggregate_bars(ticker.as_deref(), period).await?;
                (bars, Vec::new())
            }
            ExportKind::Points => {
                let tickers = match &ticker {
                    Some(ticker) => vec![ticker.clone()],
                    None => store.tickers(watchlist.interval).await?,
                };
                let mut points = Vec::new();
                for ticker in &tickers {
                    points.extend(
                        store
                            .points_between(ticker, watchlist.interval, None, None)
                            .await?,
                    );
                }
                (Vec::new(), points)
            }
        };
        store.close().await;
        Ok::<_, AppError>(result)
    })?;

    let rows = match output {
        Some(path) => {
            let writer = BufWriter::new(File::create(&path)?);
            let rows = if !raw_points {
                write_aggregate_csv(writer, &bars)?
            } else {
                write_price_csv(writer, &points)?
            };
            eprintln!("✅ Wrote {} rows to {}", rows, path.display());
            rows
        }
        None => {
            let stdout = io::stdout();
            if !raw_points {
                write_aggregate_csv(stdout.lock(), &bars)?
            } else {
                write_price_csv(stdout.lock(), &points)?
            }
        }
    };

    if rows == 0 {
        eprintln!("⚠️  Nothing to export. Run 'pull' and 'aggregate' first.");
    }
    Ok(())
}
