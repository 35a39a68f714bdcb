use crate::error::{AppError, Result};
use crate::models::TelegramConfig;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outbound channel for alert notifications
#[allow(async_fn_in_trait)]
pub trait Notifier {
    /// Deliver one message; returns a delivery receipt (message id)
    async fn send(&self, text: &str) -> Result<String>;

    fn name(&self) -> &'static str;
}

/// Telegram Bot API sender (`sendMessage`, HTML parse mode)
pub struct TelegramNotifier {
    base_url: String,
    bot_token: String,
    chat_id: String,
    client: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        Self::with_base_url(config, "https://api.telegram.org")
    }

    /// Sender against a different Bot API host
    pub fn with_base_url(config: &TelegramConfig, base_url: &str) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(AppError::Config(format!(
                "Invalid Telegram base_url: must start with http:// or https://, got: '{}'",
                base_url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url,
            bot_token: config.bot_token.clone(),
            chat_id: config.chat_id.clone(),
            client,
        })
    }

    fn send_message_url(&self) -> String {
        format!("{}/bot{}/sendMessage", self.base_url, self.bot_token)
    }
}

impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> Result<String> {
        let payload = serde_json::json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": "HTML",
        });

        let response = self
            .client
            .post(self.send_message_url())
            .json(&payload)
            .send()
            .await
            // reqwest errors include the URL, which carries the bot token
            .map_err(|e| AppError::Network(format!("Telegram request failed: {}", e.without_url())))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::Network(format!("Failed to read Telegram response: {}", e.without_url())))?;

        if status.as_u16() == 429 {
            return Err(AppError::RateLimit);
        }
        if !status.is_success() {
            return Err(AppError::Notification(format!(
                "Telegram returned status {}: {}",
                status, body
            )));
        }

        let json: Value = serde_json::from_str(&body)?;
        if json.get("ok").and_then(Value::as_bool) != Some(true) {
            return Err(AppError::Notification(format!("Telegram rejected message: {}", body)));
        }

        let message_id = json
            .pointer("/result/message_id")
            .map(|id| id.to_string())
            .unwrap_or_default();
        debug!(message_id = %message_id, "Telegram message sent");
        Ok(message_id)
    }

    fn name(&self) -> &'static str {
        "telegram"
    }
}

/// Writes alerts to the log when no messaging credentials are configured
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    async fn send(&self, text: &str) -> Result<String> {
        info!(message = %text, "Alert (no Telegram credentials configured)");
        Ok("log".to_string())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Notifier chosen from configuration
pub enum ConfiguredNotifier {
    Telegram(TelegramNotifier),
    Log(LogNotifier),
}

impl ConfiguredNotifier {
    /// Telegram when both token and chat id are set, log-only otherwise
    pub fn from_config(telegram: Option<&TelegramConfig>) -> Result<Self> {
        match telegram {
            Some(config) => Ok(Self::Telegram(TelegramNotifier::new(config)?)),
            None => {
                warn!("TELEGRAM_BOT_TOKEN/TELEGRAM_CHAT_ID not set, alerts will only be logged");
                Ok(Self::Log(LogNotifier))
            }
        }
    }
}

impl Notifier for ConfiguredNotifier {
    async fn send(&self, text: &str) -> Result<String> {
        match self {
            Self::Telegram(notifier) => notifier.send(text).await,
            Self::Log(notifier) => notifier.send(text).await,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Telegram(notifier) => notifier.name(),
            Self::Log(notifier) => notifier.name(),
        }
    }
}

/// Result of a bounded delivery attempt
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub delivered: bool,
    pub attempts: u32,
    pub receipt: Option<String>,
    pub error: Option<String>,
}

/// Send with at most `max_attempts` tries, waiting `backoff * attempt` between them
///
/// Never returns an error: the final failure is reported in [`Delivery`].
pub async fn deliver_with_retry<N: Notifier>(
    notifier: &N,
    text: &str,
    max_attempts: u32,
    backoff: Duration,
) -> Delivery {
    let max_attempts = max_attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        match notifier.send(text).await {
            Ok(receipt) => {
                return Delivery {
                    delivered: true,
                    attempts: attempt,
                    receipt: Some(receipt),
                    error: None,
                };
            }
            Err(e) => {
                warn!(
                    notifier = notifier.name(),
                    attempt,
                    max_attempts,
                    error = %e,
                    "Notification delivery failed"
                );
                last_error = Some(e.to_string());
                if attempt < max_attempts && !backoff.is_zero() {
                    tokio::time::sleep(backoff * attempt).await;
                }
            }
        }
    }

    Delivery {
        delivered: false,
        attempts: max_attempts,
        receipt: None,
        error: last_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves one canned HTTP response and hands back the raw request
    async fn stub_server(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
            }

            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });

        (base_url, handle)
    }

    /// Fails the first `failures` sends
    struct FlakyNotifier {
        failures: u32,
        calls: AtomicU32,
    }

    impl Notifier for FlakyNotifier {
        async fn send(&self, _text: &str) -> Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err(AppError::Network("connection reset".to_string()))
            } else {
                Ok(format!("msg-{}", call))
            }
        }

        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    fn config() -> TelegramConfig {
        TelegramConfig {
            bot_token: "123:abc".to_string(),
            chat_id: "-100200".to_string(),
        }
    }

    #[tokio::test]
    async fn test_retry_until_delivered() {
        let notifier = FlakyNotifier {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        let delivery = deliver_with_retry(&notifier, "hi", 3, Duration::ZERO).await;
        assert!(delivery.delivered);
        assert_eq!(delivery.attempts, 3);
        assert_eq!(delivery.receipt.as_deref(), Some("msg-3"));
    }

    #[tokio::test]
    async fn test_retry_is_bounded() {
        let notifier = FlakyNotifier {
            failures: 10,
            calls: AtomicU32::new(0),
        };
        let delivery = deliver_with_retry(&notifier, "hi", 3, Duration::ZERO).await;
        assert!(!delivery.delivered);
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 3);
        assert!(delivery.error.unwrap().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_log_notifier_always_delivers() {
        let notifier = ConfiguredNotifier::from_config(None).unwrap();
        assert_eq!(notifier.name(), "log");
        assert_eq!(notifier.send("<b>test</b>").await.unwrap(), "log");
    }

    #[test]
    fn test_telegram_url() {
        let notifier = TelegramNotifier::with_base_url(&config(), "http://localhost:8081/").unwrap();
        assert_eq!(notifier.send_message_url(), "http://localhost:8081/bot123:abc/sendMessage");
        assert!(TelegramNotifier::with_base_url(&config(), "localhost").is_err());
    }

    #[tokio::test]
    async fn test_unreachable_telegram_is_network_error() {
        let notifier = TelegramNotifier::with_base_url(&config(), "http://127.0.0.1:9").unwrap();
        let err = notifier.send("hi").await.unwrap_err();
        assert!(matches!(err, AppError::Network(_)));
        assert!(!err.to_string().contains("123:abc"));
    }

    #[tokio::test]
    async fn test_telegram_send_returns_message_id() {
        let (base_url, server) =
            stub_server("200 OK", r#"{"ok":true,"result":{"message_id":4711,"chat":{"id":-100200}}}"#).await;
        let notifier = TelegramNotifier::with_base_url(&config(), &base_url).unwrap();

        let receipt = notifier.send("<b>VCB</b> crossed above").await.unwrap();
        assert_eq!(receipt, "4711");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /bot123:abc/sendMessage"));
        assert!(request.contains(r#""chat_id":"-100200""#));
        assert!(request.contains(r#""parse_mode":"HTML""#));
        assert!(request.contains("<b>VCB</b> crossed above"));
    }

    #[tokio::test]
    async fn test_telegram_rejection_is_notification_error() {
        let (base_url, server) =
            stub_server("200 OK", r#"{"ok":false,"error_code":400,"description":"Bad Request: chat not found"}"#).await;
        let notifier = TelegramNotifier::with_base_url(&config(), &base_url).unwrap();

        let err = notifier.send("hi").await.unwrap_err();
        assert!(matches!(err, AppError::Notification(_)));
        assert!(err.to_string().contains("chat not found"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_telegram_rate_limit_status() {
        let (base_url, server) =
            stub_server("429 Too Many Requests", r#"{"ok":false,"error_code":429,"parameters":{"retry_after":3}}"#).await;
        let notifier = TelegramNotifier::with_base_url(&config(), &base_url).unwrap();

        let err = notifier.send("hi").await.unwrap_err();
        assert!(matches!(err, AppError::RateLimit));
        server.await.unwrap();
    }
}
