use crate::constants::{
    DEFAULT_ALERT_COOLDOWN_HOURS, DEFAULT_FETCH_BACKOFF_MS, DEFAULT_FETCH_MAX_ATTEMPTS,
    DEFAULT_FLOW_RETENTION_DAYS, DEFAULT_NOTIFY_MAX_ATTEMPTS, DEFAULT_RESUME_DAYS, DEFAULT_UPDATE_INTERVAL_MINUTES,
    DEFAULT_VCI_RATE_LIMIT,
};
use crate::error::{AppError, Result};
use crate::utils::{get_database_path, get_watchlist_path};
use chrono::Utc;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Telegram bot credentials
#[derive(Debug, Clone, PartialEq)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

/// Runtime configuration, read from environment variables with defaults
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// SQLite row store
    pub database_path: PathBuf,

    /// Watchlist JSON (tickers + alert rules)
    pub watchlist_path: PathBuf,

    /// Minutes between watch cycles during trading hours
    pub update_interval_minutes: u64,

    /// Cooldown applied to rules without their own
    pub alert_cooldown_hours: i64,

    /// Number of recent days fetched on each pull
    pub resume_days: u32,

    /// VCI requests per minute
    pub vci_rate_limit: u32,

    /// Attempts per ticker before skipping it for the cycle
    pub fetch_max_attempts: u32,

    /// Base backoff between fetch attempts
    pub fetch_backoff: Duration,

    /// Attempts per notification
    pub notify_max_attempts: u32,

    /// Days of intraday flow snapshots kept by cleanup
    pub flow_retention_days: u32,

    /// None disables Telegram delivery (alerts are logged instead)
    pub telegram: Option<TelegramConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: get_database_path(),
            watchlist_path: get_watchlist_path(),
            update_interval_minutes: DEFAULT_UPDATE_INTERVAL_MINUTES,
            alert_cooldown_hours: DEFAULT_ALERT_COOLDOWN_HOURS,
            resume_days: DEFAULT_RESUME_DAYS,
            vci_rate_limit: DEFAULT_VCI_RATE_LIMIT,
            fetch_max_attempts: DEFAULT_FETCH_MAX_ATTEMPTS,
            fetch_backoff: Duration::from_millis(DEFAULT_FETCH_BACKOFF_MS),
            notify_max_attempts: DEFAULT_NOTIFY_MAX_ATTEMPTS,
            flow_retention_days: DEFAULT_FLOW_RETENTION_DAYS,
            telegram: None,
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T> {
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{} has an invalid value: '{}'", key, raw))),
        _ => Ok(default),
    }
}

impl AppConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let database_path = lookup("STOCKVN_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.database_path);
        let watchlist_path = lookup("STOCKVN_WATCHLIST")
            .map(PathBuf::from)
            .unwrap_or(defaults.watchlist_path);

        let update_interval_minutes =
            parse_var(&lookup, "UPDATE_INTERVAL_MINUTES", defaults.update_interval_minutes)?;
        let alert_cooldown_hours =
            parse_var(&lookup, "ALERT_COOLDOWN_HOURS", defaults.alert_cooldown_hours)?;
        let resume_days = parse_var(&lookup, "RESUME_DAYS", defaults.resume_days)?;
        let vci_rate_limit = parse_var(&lookup, "VCI_RATE_LIMIT", defaults.vci_rate_limit)?;
        let fetch_max_attempts =
            parse_var(&lookup, "FETCH_MAX_ATTEMPTS", defaults.fetch_max_attempts)?;
        let fetch_backoff_ms = parse_var(&lookup, "FETCH_BACKOFF_MS", DEFAULT_FETCH_BACKOFF_MS)?;
        let notify_max_attempts =
            parse_var(&lookup, "NOTIFY_MAX_ATTEMPTS", defaults.notify_max_attempts)?;
        let flow_retention_days =
            parse_var(&lookup, "FLOW_RETENTION_DAYS", defaults.flow_retention_days)?;

        if update_interval_minutes == 0 {
            return Err(AppError::Config("UPDATE_INTERVAL_MINUTES must be at least 1".to_string()));
        }
        if alert_cooldown_hours < 0 {
            return Err(AppError::Config("ALERT_COOLDOWN_HOURS must not be negative".to_string()));
        }
        if vci_rate_limit == 0 {
            return Err(AppError::Config("VCI_RATE_LIMIT must be at least 1".to_string()));
        }
        if fetch_max_attempts == 0 || notify_max_attempts == 0 {
            return Err(AppError::Config(
                "FETCH_MAX_ATTEMPTS and NOTIFY_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        let telegram = match (lookup("TELEGRAM_BOT_TOKEN"), lookup("TELEGRAM_CHAT_ID")) {
            (Some(bot_token), Some(chat_id))
                if !bot_token.trim().is_empty() && !chat_id.trim().is_empty() =>
            {
                Some(TelegramConfig {
                    bot_token: bot_token.trim().to_string(),
                    chat_id: chat_id.trim().to_string(),
                })
            }
            _ => None,
        };

        Ok(Self {
            database_path,
            watchlist_path,
            update_interval_minutes,
            alert_cooldown_hours,
            resume_days,
            vci_rate_limit,
            fetch_max_attempts,
            fetch_backoff: Duration::from_millis(fetch_backoff_ms),
            notify_max_attempts,
            flow_retention_days,
            telegram,
        })
    }

    /// Default cooldown for rules that do not set one
    pub fn default_cooldown(&self) -> chrono::Duration {
        chrono::Duration::hours(self.alert_cooldown_hours)
    }

    /// First date fetched on a resume pull (YYYY-MM-DD)
    pub fn fetch_start_date(&self) -> String {
        let start = Utc::now() - chrono::Duration::days(self.resume_days as i64);
        start.format("%Y-%m-%d").to_string()
    }
}
