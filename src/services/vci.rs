use crate::models::Interval;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, Utc};
use isahc::{config::Configurable, prelude::*, HttpClient};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration as StdDuration, SystemTime};
use tokio::sync::Mutex as TokioMutex;
use tokio::time::sleep;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub enum VciError {
    Http(isahc::Error),
    Timeout,
    Serialization(serde_json::Error),
    InvalidDate(String),
    InvalidResponse(String),
    RateLimit,
    ServerError(u16),
    ClientError(u16),
    NoData,
}

impl VciError {
    /// Whether retrying the same request later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            VciError::Http(_) | VciError::Timeout | VciError::RateLimit | VciError::ServerError(_)
        )
    }
}

impl From<isahc::Error> for VciError {
    fn from(error: isahc::Error) -> Self {
        if error.is_timeout() {
            VciError::Timeout
        } else {
            VciError::Http(error)
        }
    }
}

impl From<serde_json::Error> for VciError {
    fn from(error: serde_json::Error) -> Self {
        VciError::Serialization(error)
    }
}

impl std::fmt::Display for VciError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VciError::Http(e) => write!(f, "HTTP error: {}", e),
            VciError::Timeout => write!(f, "Request timed out"),
            VciError::Serialization(e) => write!(f, "Serialization error: {}", e),
            VciError::InvalidDate(s) => write!(f, "Invalid date: {}", s),
            VciError::InvalidResponse(s) => write!(f, "Invalid response: {}", s),
            VciError::RateLimit => write!(f, "Rate limit exceeded"),
            VciError::ServerError(code) => write!(f, "Server error ({})", code),
            VciError::ClientError(code) => write!(f, "Client error ({}) - not retryable", code),
            VciError::NoData => write!(f, "No data available"),
        }
    }
}

impl std::error::Error for VciError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            VciError::Http(e) => Some(e),
            VciError::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

/// Raw OHLCV record as returned by the gap-chart endpoint
///
/// Missing prices come through as NaN so the normalization step can drop
/// the record instead of storing a zero price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OhlcvData {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub symbol: Option<String>,
}

/// Shared rate limiter for VCI API requests across all concurrent tasks
#[derive(Debug)]
pub struct SharedRateLimiter {
    /// Timestamps of recent requests (sliding window)
    request_timestamps: TokioMutex<Vec<SystemTime>>,
    /// Maximum requests allowed per minute
    rate_limit_per_minute: u32,
}

impl SharedRateLimiter {
    /// Create a new shared rate limiter
    pub fn new(rate_limit_per_minute: u32) -> Self {
        Self {
            request_timestamps: TokioMutex::new(Vec::new()),
            rate_limit_per_minute: rate_limit_per_minute.max(1),
        }
    }

    /// Enforce rate limiting using sliding window algorithm
    /// This method is async-safe and can be called from multiple concurrent tasks
    pub async fn enforce_rate_limit(&self) {
        let current_time = SystemTime::now();
        let mut timestamps = self.request_timestamps.lock().await;

        // Remove timestamps older than 1 minute
        timestamps.retain(|&timestamp| {
            current_time
                .duration_since(timestamp)
                .unwrap_or(StdDuration::from_secs(0))
                < StdDuration::from_secs(60)
        });

        // If at rate limit, wait until oldest request expires
        if timestamps.len() >= self.rate_limit_per_minute as usize {
            if let Some(&oldest_request) = timestamps.first() {
                let wait_time = StdDuration::from_secs(60).saturating_sub(
                    current_time
                        .duration_since(oldest_request)
                        .unwrap_or(StdDuration::from_secs(0)),
                );

                if !wait_time.is_zero() {
                    // Drop lock before sleeping to allow other tasks to check rate limit
                    drop(timestamps);
                    debug!(wait_secs = wait_time.as_secs_f64(), "VCI rate limit reached, waiting");
                    sleep(wait_time + StdDuration::from_millis(100)).await;
                    let mut timestamps = self.request_timestamps.lock().await;
                    timestamps.push(SystemTime::now());
                    return;
                }
            }
        }
        timestamps.push(current_time);
    }
}

/// Sanitize proxy URL for logging (removes credentials)
fn sanitize_proxy_url(proxy_url: &str) -> String {
    match proxy_url.parse::<isahc::http::Uri>() {
        Ok(uri) => {
            let scheme = uri.scheme_str().unwrap_or("unknown");
            let host = uri.host().unwrap_or("unknown");
            let port = uri.port_u16().map_or(String::new(), |p| format!(":{}", p));
            format!("{}://{}{}", scheme, host, port)
        }
        Err(_) => {
            if let Some(at_pos) = proxy_url.find('@') {
                if let Some(scheme_end) = proxy_url.find("://") {
                    let scheme = &proxy_url[..scheme_end + 3];
                    let after_at = &proxy_url[at_pos + 1..];
                    format!("{}:***@{}", scheme, after_at)
                } else {
                    "***@***".to_string()
                }
            } else {
                proxy_url.to_string()
            }
        }
    }
}

/// Parse a `YYYY-MM-DD` date
fn parse_date(date: &str) -> Result<NaiveDate, VciError> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|e| VciError::InvalidDate(format!("'{}': {}", date, e)))
}

/// Read a gap-chart timestamp, given either as a number or a numeric string
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let seconds = match value {
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        other => other.as_i64()?,
    };
    DateTime::<Utc>::from_timestamp(seconds, 0)
}

/// Parse one symbol's gap-chart item (`{"o": [...], "h": [...], ..., "t": [...]}`)
///
/// Records before `start_date` are filtered out. Records with an unreadable
/// timestamp or volume are skipped; missing prices are kept as NaN for the
/// caller to reject.
pub fn parse_gap_chart(
    symbol: &str,
    data_item: &Value,
    start_date: NaiveDate,
) -> Result<Vec<OhlcvData>, VciError> {
    let column = |key: &str| -> Result<&Vec<Value>, VciError> {
        data_item
            .get(key)
            .and_then(|v| v.as_array())
            .ok_or_else(|| VciError::InvalidResponse(format!("Missing key: {}", key)))
    };

    let opens = column("o")?;
    let highs = column("h")?;
    let lows = column("l")?;
    let closes = column("c")?;
    let volumes = column("v")?;
    let times = column("t")?;

    let length = times.len();
    if [opens.len(), highs.len(), lows.len(), closes.len(), volumes.len()]
        .iter()
        .any(|&len| len != length)
    {
        return Err(VciError::InvalidResponse("Inconsistent array lengths".to_string()));
    }

    let mut result = Vec::with_capacity(length);
    for i in 0..length {
        let Some(time) = parse_timestamp(&times[i]) else {
            warn!(symbol, index = i, raw = %times[i], "Skipping record with invalid timestamp");
            continue;
        };
        if time.date_naive() < start_date {
            continue;
        }

        let volume = volumes[i]
            .as_u64()
            .or_else(|| volumes[i].as_f64().filter(|v| v.is_finite() && *v >= 0.0).map(|v| v as u64));
        let Some(volume) = volume else {
            warn!(symbol, index = i, raw = %volumes[i], "Skipping record with invalid volume");
            continue;
        };

        result.push(OhlcvData {
            time,
            open: opens[i].as_f64().unwrap_or(f64::NAN),
            high: highs[i].as_f64().unwrap_or(f64::NAN),
            low: lows[i].as_f64().unwrap_or(f64::NAN),
            close: closes[i].as_f64().unwrap_or(f64::NAN),
            volume,
            symbol: Some(symbol.to_string()),
        });
    }

    result.sort_by(|a, b| a.time.cmp(&b.time));
    Ok(result)
}

/// Client for the Vietcap (VCI) chart API
#[derive(Clone)]
pub struct VciClient {
    clients: Vec<HttpClient>,
    base_url: String,
    user_agents: Vec<String>,
    random_agent: bool,
    rate_limiter: Arc<SharedRateLimiter>,
}

impl VciClient {
    /// Create a VCI client with a direct connection plus any proxies
    ///
    /// Proxies are read from `HTTP_PROXIES` (comma separated); the direct
    /// client is always the first entry.
    pub fn new(random_agent: bool, rate_limit_per_minute: u32) -> Result<Self, VciError> {
        let rate_limiter = Arc::new(SharedRateLimiter::new(rate_limit_per_minute));
        let mut clients = vec![HttpClient::builder()
            .timeout(StdDuration::from_secs(30))
            .build()?];

        if let Ok(proxy_urls) = std::env::var("HTTP_PROXIES") {
            for proxy_url in proxy_urls.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                match proxy_url.parse::<isahc::http::Uri>() {
                    Ok(proxy_uri) => {
                        match HttpClient::builder()
                            .proxy(Some(proxy_uri))
                            .timeout(StdDuration::from_secs(30))
                            .build()
                        {
                            Ok(client) => {
                                clients.push(client);
                                info!(proxy = %sanitize_proxy_url(proxy_url), "Added VCI proxy");
                            }
                            Err(e) => {
                                warn!(proxy = %sanitize_proxy_url(proxy_url), error = %e, "Failed to create proxy client");
                            }
                        }
                    }
                    Err(e) => {
                        warn!(proxy = %sanitize_proxy_url(proxy_url), error = %e, "Invalid proxy URL");
                    }
                }
            }
        }

        debug!(clients = clients.len(), "VciClient initialized");

        let user_agents = vec![
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:120.0) Gecko/20100101 Firefox/120.0".to_string(),
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.3 Safari/605.1.15".to_string(),
        ];

        Ok(VciClient {
            clients,
            base_url: "https://trading.vietcap.com.vn/api/".to_string(),
            user_agents,
            random_agent,
            rate_limiter,
        })
    }

    fn get_user_agent(&self) -> String {
        if self.random_agent {
            use rand::seq::SliceRandom;
            self.user_agents
                .choose(&mut rand::thread_rng())
                .unwrap_or(&self.user_agents[0])
                .clone()
        } else {
            self.user_agents[0].clone()
        }
    }

    /// Send one POST through a randomly chosen client
    ///
    /// Retrying is left to the caller; failures are classified so transient
    /// ones can be told apart.
    async fn make_request(&self, url: &str, payload: &Value) -> Result<Value, VciError> {
        self.rate_limiter.enforce_rate_limit().await;

        let client_index = rand::random::<usize>() % self.clients.len();
        let client = &self.clients[client_index];
        let label = if client_index == 0 {
            "direct".to_string()
        } else {
            format!("proxy-{}", client_index)
        };

        let body = serde_json::to_string(payload)?;
        debug!(url, client = %label, payload_size = body.len(), "VCI request");

        let request = isahc::Request::builder()
            .uri(url)
            .method("POST")
            .header("Accept", "application/json, text/plain, */*")
            .header("Accept-Language", "en-US,en;q=0.9,vi-VN;q=0.8,vi;q=0.7")
            .header("Content-Type", "application/json")
            .header("Cache-Control", "no-cache")
            .header("User-Agent", self.get_user_agent())
            .header("Referer", "https://trading.vietcap.com.vn/")
            .header("Origin", "https://trading.vietcap.com.vn")
            .body(body)
            .map_err(|e| VciError::InvalidResponse(format!("Request build error: {}", e)))?;

        let mut response = client.send_async(request).await?;
        let status = response.status();

        if status == 429 {
            return Err(VciError::RateLimit);
        }
        if status == 403 {
            // VCI answers throttled clients with 403 as well
            return Err(VciError::RateLimit);
        }
        if status.is_server_error() {
            return Err(VciError::ServerError(status.as_u16()));
        }
        if status.is_client_error() {
            return Err(VciError::ClientError(status.as_u16()));
        }
        if !status.is_success() {
            return Err(VciError::InvalidResponse(format!("Unexpected status {}", status)));
        }

        let text = response
            .text()
            .await
            .map_err(|e| VciError::InvalidResponse(format!("Response body error: {}", e)))?;
        Ok(serde_json::from_str::<Value>(&text)?)
    }

    /// End-of-day timestamp for the given date (or today)
    pub fn calculate_timestamp(&self, date_str: Option<&str>) -> Result<i64, VciError> {
        let date = match date_str {
            Some(date) => parse_date(date)?,
            None => Utc::now().date_naive(),
        };
        let end_of_day = date
            .and_hms_opt(23, 59, 59)
            .ok_or_else(|| VciError::InvalidDate(date.to_string()))?
            .and_utc();
        Ok(end_of_day.timestamp())
    }

    /// Number of bars to request so the window reaches back to `start`
    pub fn calculate_count_back(
        &self,
        start: &str,
        end: Option<&str>,
        interval: Interval,
    ) -> Result<u32, VciError> {
        let start_date = parse_date(start)?;
        let end_date = match end {
            Some(date) => parse_date(date)?,
            None => Utc::now().date_naive(),
        };

        // Business days only (weekends excluded)
        let mut business_days = 0u32;
        let mut current_date = start_date;
        while current_date <= end_date {
            let weekday = current_date.weekday().num_days_from_sunday();
            if weekday != 0 && weekday != 6 {
                business_days += 1;
            }
            current_date += ChronoDuration::days(1);
        }

        // VCI needs a generous buffer to reliably return the whole window
        let count_back = match interval {
            Interval::Daily => business_days + 100,
            Interval::Hourly => ((business_days as f32 * 6.5) as u32) + 100,
            Interval::Minute => ((business_days as f32 * 6.5 * 60.0) as u32) + 100,
        };

        debug!(start, ?end, business_days, count_back, "VCI count back");
        Ok(count_back)
    }

    /// Fetch OHLCV history for one symbol
    pub async fn get_history(
        &self,
        symbol: &str,
        start: &str,
        end: Option<&str>,
        interval: Interval,
    ) -> Result<Vec<OhlcvData>, VciError> {
        let start_date = parse_date(start)?;
        let end_timestamp = self.calculate_timestamp(end)?;
        let count_back = self.calculate_count_back(start, end, interval)?;

        let url = format!("{}chart/OHLCChart/gap-chart", self.base_url);
        let payload = serde_json::json!({
            "timeFrame": interval.vci_time_frame(),
            "symbols": [symbol],
            "to": end_timestamp,
            "countBack": count_back
        });

        debug!(
            symbol,
            start,
            ?end,
            interval = %interval,
            end_timestamp,
            count_back,
            "VCI get_history"
        );

        let response_data = self.make_request(&url, &payload).await?;

        let data_item = match response_data.as_array().and_then(|items| items.first()) {
            Some(item) => item,
            None => return Err(VciError::NoData),
        };

        let result = parse_gap_chart(symbol, data_item, start_date)?;
        if result.is_empty() {
            return Err(VciError::NoData);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_vci_client_creation() {
        let client = VciClient::new(true, 6).unwrap();
        assert!(!client.clients.is_empty());
        assert!(client.random_agent);
    }

    #[test]
    fn test_transient_classification() {
        assert!(VciError::Timeout.is_transient());
        assert!(VciError::RateLimit.is_transient());
        assert!(VciError::ServerError(502).is_transient());
        assert!(!VciError::ClientError(400).is_transient());
        assert!(!VciError::NoData.is_transient());
        assert!(!VciError::InvalidResponse("x".to_string()).is_transient());
    }

    #[test]
    fn test_count_back_counts_business_days() {
        let client = VciClient::new(false, 6).unwrap();
        // Mon 2025-11-03 .. Sun 2025-11-09: five business days
        let count = client
            .calculate_count_back("2025-11-03", Some("2025-11-09"), Interval::Daily)
            .unwrap();
        assert_eq!(count, 105);
        assert!(client.calculate_count_back("11/03/2025", None, Interval::Daily).is_err());
    }

    #[test]
    fn test_parse_gap_chart_filters_and_sorts() {
        // 2025-11-03, 2025-11-04, 2025-10-31 (before start)
        let item = json!({
            "o": [23000.0, 23100.0, 22000.0],
            "h": [23500.0, 23600.0, 22500.0],
            "l": [22800.0, 22900.0, 21900.0],
            "c": [23200.0, 23400.0, 22100.0],
            "v": [1000000, 1200000, 900000],
            "t": ["1762214400", 1762128000, 1761868800]
        });
        let start = NaiveDate::from_ymd_opt(2025, 11, 1).unwrap();

        let records = parse_gap_chart("VCB", &item, start).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].time < records[1].time);
        assert_eq!(records[0].close, 23200.0);
        assert_eq!(records[1].close, 23400.0);
        assert_eq!(records[0].symbol.as_deref(), Some("VCB"));
    }

    #[test]
    fn test_parse_gap_chart_skips_malformed_records() {
        let item = json!({
            "o": [23000.0, 23100.0, null],
            "h": [23500.0, 23600.0, 23700.0],
            "l": [22800.0, 22900.0, 23000.0],
            "c": [23200.0, 23400.0, 23500.0],
            "v": [1000000, "n/a", 1100000],
            "t": [1762128000, 1762214400, "garbage"]
        });
        let start = NaiveDate::from_ymd_opt(2025, 11, 1).unwrap();

        let records = parse_gap_chart("VCB", &item, start).unwrap();
        // second record has a bad volume, third a bad timestamp
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].volume, 1000000);
    }

    #[test]
    fn test_parse_gap_chart_rejects_inconsistent_arrays() {
        let item = json!({
            "o": [1.0], "h": [1.0], "l": [1.0], "c": [1.0, 2.0], "v": [1], "t": [1762128000]
        });
        let start = NaiveDate::from_ymd_opt(2025, 11, 1).unwrap();
        assert!(parse_gap_chart("VCB", &item, start).is_err());

        let missing = json!({"o": [1.0]});
        assert!(matches!(
            parse_gap_chart("VCB", &missing, start),
            Err(VciError::InvalidResponse(_))
        ));
    }
}
