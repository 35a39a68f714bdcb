use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// Get SQLite database path from environment variable or use default
pub fn get_database_path() -> PathBuf {
    std::env::var("STOCKVN_DB_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data").join("stockvn.db"))
}

/// Get watchlist file path from environment variable or use default
pub fn get_watchlist_path() -> PathBuf {
    std::env::var("STOCKVN_WATCHLIST")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("watchlist.json"))
}

/// Initialize tracing with `RUST_LOG` support, defaulting to `info`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .try_init();
}

/// Format a timestamp as `YYYY-MM-DD HH:MM:SS`
pub fn format_date(time: &DateTime<Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Format an integer with thousand separators (1234567 -> "1,234,567")
pub fn format_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Format a VND price rounded to whole dong with thousand separators
pub fn format_vnd(value: f64) -> String {
    if !value.is_finite() {
        return "N/A".to_string();
    }
    let rounded = value.round();
    let formatted = format_thousands(rounded.abs() as u64);
    if rounded < 0.0 {
        format!("-{}", formatted)
    } else {
        formatted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_thousands() {
        assert_eq!(format_thousands(0), "0");
        assert_eq!(format_thousands(999), "999");
        assert_eq!(format_thousands(1000), "1,000");
        assert_eq!(format_thousands(2_100_000), "2,100,000");
    }

    #[test]
    fn test_format_vnd() {
        assert_eq!(format_vnd(80000.0), "80,000");
        assert_eq!(format_vnd(23249.6), "23,250");
        assert_eq!(format_vnd(-1500.0), "-1,500");
        assert_eq!(format_vnd(f64::NAN), "N/A");
    }

    #[test]
    fn test_format_date() {
        let time = Utc.with_ymd_and_hms(2025, 11, 8, 9, 7, 30).unwrap();
        assert_eq!(format_date(&time), "2025-11-08 09:07:30");
    }
}
