//! Rate-limited Telegram alerts for gateway operators.
//!
//! The notifier is fire-and-forget: a misconfigured channel, a rate-limited
//! category, or a Telegram failure all degrade to `false` and a log line.
//! Nothing here can crash or block the delivery pipeline.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default minimum interval between two alerts of the same category.
pub const DEFAULT_RATE_LIMIT: Duration = Duration::from_secs(60);

/// Default aggregation period for the operational summary.
pub const DEFAULT_SUMMARY_PERIOD: Duration = Duration::from_secs(60 * 60);

/// Default Telegram Bot API base URL.
pub const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Timeout applied to each Telegram request.
const TELEGRAM_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Placeholder values shipped in example env files. Credentials still set to
/// these count as unconfigured.
const PLACEHOLDER_BOT_TOKEN: &str = "tu_token_aqui";
const PLACEHOLDER_CHAT_ID: &str = "tu_chat_id_aqui";

/// Alert categories, rate-limited independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertCategory {
    Success,
    Info,
    Warning,
    Critical,
    Summary,
}

impl AlertCategory {
    /// Severity prefix prepended to the alert text.
    fn prefix(&self) -> &'static str {
        match self {
            AlertCategory::Success => "🟢 <b>OK</b>",
            AlertCategory::Info => "🔵 <b>Info</b>",
            AlertCategory::Warning => "🟡 <b>Advertencia</b>",
            AlertCategory::Critical => "🔴 <b>CRÍTICO</b>",
            AlertCategory::Summary => "📊 <b>Resumen</b>",
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            AlertCategory::Success => "success",
            AlertCategory::Info => "info",
            AlertCategory::Warning => "warning",
            AlertCategory::Critical => "critical",
            AlertCategory::Summary => "summary",
        }
    }
}

impl std::fmt::Display for AlertCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notifier configuration.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// Master enable flag.
    pub enabled: bool,
    /// Telegram bot token. Unset or placeholder disables the notifier.
    pub bot_token: Option<String>,
    /// Telegram chat id the alerts go to.
    pub chat_id: Option<String>,
    /// Device name shown in alert text.
    pub device_name: String,
    /// Minimum interval between two alerts of the same category.
    pub rate_limit: Duration,
    /// Aggregation period for the operational summary.
    pub summary_period: Duration,
    /// Telegram Bot API base URL.
    pub api_base: String,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token: None,
            chat_id: None,
            device_name: "Gateway".to_string(),
            rate_limit: DEFAULT_RATE_LIMIT,
            summary_period: DEFAULT_SUMMARY_PERIOD,
            api_base: DEFAULT_TELEGRAM_API_BASE.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SendMessageRequest {
    chat_id: String,
    text: String,
    parse_mode: String,
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Per-category last-sent instants plus the running counters for the
/// periodic summary.
struct NotifierState {
    last_sent: HashMap<AlertCategory, Instant>,
    sent: u64,
    failed: u64,
    period_start: Instant,
}

/// Rate-limited operational alert channel over the Telegram Bot API.
pub struct Notifier {
    config: NotifierConfig,
    http_client: reqwest::Client,
    state: Mutex<NotifierState>,
}

impl Notifier {
    /// Create a notifier. A disabled or misconfigured notifier is inert.
    pub fn new(config: NotifierConfig) -> Self {
        Self {
            config,
            http_client: reqwest::Client::new(),
            state: Mutex::new(NotifierState {
                last_sent: HashMap::new(),
                sent: 0,
                failed: 0,
                period_start: Instant::now(),
            }),
        }
    }

    /// Whether the alert channel is usable at all.
    pub fn is_configured(&self) -> bool {
        let token_set = self
            .config
            .bot_token
            .as_deref()
            .is_some_and(|t| !t.is_empty() && t != PLACEHOLDER_BOT_TOKEN);
        let chat_set = self
            .config
            .chat_id
            .as_deref()
            .is_some_and(|c| !c.is_empty() && c != PLACEHOLDER_CHAT_ID);
        self.config.enabled && token_set && chat_set
    }

    /// Send an alert. Returns whether a message actually went out.
    ///
    /// Suppressed when the notifier is unconfigured or the category was
    /// alerted within the rate-limit window. Telegram failures are logged
    /// and swallowed.
    pub async fn alert(&self, message: &str, category: AlertCategory) -> bool {
        if !self.is_configured() {
            return false;
        }

        {
            let state = self.state.lock().expect("lock poisoned");
            let last = state.last_sent.get(&category).copied();
            if !can_send(last, self.config.rate_limit, Instant::now()) {
                debug!(category = %category, "Alert suppressed by rate limit");
                return false;
            }
        }

        let timestamp = chrono::Local::now().format("%d/%m/%Y %H:%M:%S");
        let text = format!(
            "[{}] {}\n{}\n{}",
            self.config.device_name,
            timestamp,
            category.prefix(),
            message
        );

        match self.deliver(&text).await {
            Ok(()) => {
                self.state
                    .lock()
                    .expect("lock poisoned")
                    .last_sent
                    .insert(category, Instant::now());
                true
            }
            Err(detail) => {
                warn!(category = %category, error = %detail, "Telegram alert failed");
                false
            }
        }
    }

    async fn deliver(&self, text: &str) -> Result<(), String> {
        let token = self.config.bot_token.as_deref().unwrap_or_default();
        let url = format!("{}/bot{}/sendMessage", self.config.api_base, token);

        let request = SendMessageRequest {
            chat_id: self.config.chat_id.clone().unwrap_or_default(),
            text: text.to_string(),
            parse_mode: "HTML".to_string(),
        };

        let response = self
            .http_client
            .post(&url)
            .timeout(TELEGRAM_REQUEST_TIMEOUT)
            .json(&request)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let body: TelegramResponse = response.json().await.map_err(|e| e.to_string())?;
        if body.ok {
            Ok(())
        } else {
            Err(body
                .description
                .unwrap_or_else(|| "no description".to_string()))
        }
    }

    /// Record one delivered message for the periodic summary.
    pub fn record_sent(&self) {
        self.state.lock().expect("lock poisoned").sent += 1;
    }

    /// Record one failed message for the periodic summary.
    pub fn record_failed(&self) {
        self.state.lock().expect("lock poisoned").failed += 1;
    }

    /// Current (sent, failed) counters for the running summary period.
    pub fn counters(&self) -> (u64, u64) {
        let state = self.state.lock().expect("lock poisoned");
        (state.sent, state.failed)
    }

    /// Emit the periodic summary, if its period has elapsed.
    ///
    /// No-op inside the period. Once due, the counters and the period start
    /// are reset whether or not the alert itself goes out.
    pub async fn summary(&self, connected: bool) {
        let (sent, failed) = {
            let mut state = self.state.lock().expect("lock poisoned");
            if !summary_due(state.period_start, self.config.summary_period, Instant::now()) {
                return;
            }
            let counters = (state.sent, state.failed);
            state.sent = 0;
            state.failed = 0;
            state.period_start = Instant::now();
            counters
        };

        let status = if connected {
            "✅ Conectado"
        } else {
            "❌ Desconectado"
        };
        let message = format!(
            "<b>Resumen última hora</b>\n✅ Enviados: {}\n❌ Fallidos: {}\n📡 Estado: {}",
            sent, failed, status
        );

        self.alert(&message, AlertCategory::Summary).await;
    }
}

/// Whether a category may send again, given its last-sent instant.
fn can_send(last_sent: Option<Instant>, window: Duration, now: Instant) -> bool {
    match last_sent {
        None => true,
        Some(last) => now.duration_since(last) >= window,
    }
}

/// Whether the summary period has elapsed since its start.
fn summary_due(period_start: Instant, period: Duration, now: Instant) -> bool {
    now.duration_since(period_start) >= period
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn configured(api_base: &str) -> NotifierConfig {
        NotifierConfig {
            enabled: true,
            bot_token: Some("123:abc".to_string()),
            chat_id: Some("-100999".to_string()),
            api_base: api_base.to_string(),
            ..NotifierConfig::default()
        }
    }

    #[test]
    fn disabled_notifier_is_not_configured() {
        let notifier = Notifier::new(NotifierConfig::default());
        assert!(!notifier.is_configured());
    }

    #[test]
    fn placeholder_credentials_are_not_configured() {
        let notifier = Notifier::new(NotifierConfig {
            enabled: true,
            bot_token: Some(PLACEHOLDER_BOT_TOKEN.to_string()),
            chat_id: Some("-100999".to_string()),
            ..NotifierConfig::default()
        });
        assert!(!notifier.is_configured());

        let notifier = Notifier::new(NotifierConfig {
            enabled: true,
            bot_token: Some("123:abc".to_string()),
            chat_id: Some(PLACEHOLDER_CHAT_ID.to_string()),
            ..NotifierConfig::default()
        });
        assert!(!notifier.is_configured());
    }

    #[test]
    fn missing_chat_id_is_not_configured() {
        let notifier = Notifier::new(NotifierConfig {
            enabled: true,
            bot_token: Some("123:abc".to_string()),
            chat_id: None,
            ..NotifierConfig::default()
        });
        assert!(!notifier.is_configured());
    }

    #[tokio::test]
    async fn disabled_notifier_alert_returns_false_without_io() {
        // api_base points nowhere routable; a disabled notifier must bail
        // before any network call.
        let notifier = Notifier::new(NotifierConfig {
            api_base: "http://127.0.0.1:1".to_string(),
            ..NotifierConfig::default()
        });
        assert!(!notifier.alert("hello", AlertCategory::Info).await);
    }

    #[test]
    fn can_send_respects_window() {
        let window = Duration::from_secs(60);
        let start = Instant::now();

        assert!(can_send(None, window, start));
        assert!(!can_send(
            Some(start),
            window,
            start + Duration::from_secs(10)
        ));
        assert!(can_send(
            Some(start),
            window,
            start + Duration::from_secs(61)
        ));
    }

    #[test]
    fn summary_due_respects_period() {
        let period = Duration::from_secs(3600);
        let start = Instant::now();

        assert!(!summary_due(start, period, start + Duration::from_secs(10)));
        assert!(summary_due(start, period, start + Duration::from_secs(3600)));
    }

    #[test]
    fn counters_are_monotonic_between_resets() {
        let notifier = Notifier::new(NotifierConfig::default());
        notifier.record_sent();
        notifier.record_sent();
        notifier.record_failed();
        assert_eq!(notifier.counters(), (2, 1));
    }

    #[tokio::test]
    async fn summary_noops_inside_period() {
        let notifier = Notifier::new(NotifierConfig::default());
        notifier.record_sent();
        notifier.summary(true).await;
        assert_eq!(notifier.counters(), (1, 0));
    }

    #[tokio::test]
    async fn summary_resets_counters_after_period() {
        let notifier = Notifier::new(NotifierConfig {
            summary_period: Duration::ZERO,
            ..NotifierConfig::default()
        });
        notifier.record_sent();
        notifier.record_failed();
        notifier.summary(false).await;
        assert_eq!(notifier.counters(), (0, 0));
    }

    /// Serves canned `{"ok":true}` Telegram responses, counting requests.
    async fn fake_telegram(listener: TcpListener, hits: std::sync::Arc<std::sync::atomic::AtomicUsize>) {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            hits.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

            let mut buf = vec![0u8; 4096];
            let mut read = 0;
            loop {
                match stream.read(&mut buf[read..]).await {
                    Ok(0) => break,
                    Ok(n) => {
                        read += n;
                        let head = String::from_utf8_lossy(&buf[..read]);
                        if let Some(split) = head.find("\r\n\r\n") {
                            let content_length = head
                                .lines()
                                .find_map(|l| l.strip_prefix("content-length: "))
                                .or_else(|| {
                                    head.lines().find_map(|l| l.strip_prefix("Content-Length: "))
                                })
                                .and_then(|v| v.trim().parse::<usize>().ok())
                                .unwrap_or(0);
                            if read >= split + 4 + content_length {
                                break;
                            }
                        }
                    }
                    Err(_) => break,
                }
            }

            let body = r#"{"ok":true}"#;
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes()).await;
        }
    }

    #[tokio::test]
    async fn alert_sends_and_rate_limits_per_category() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let api_base = format!("http://{}", listener.local_addr().unwrap());
        let hits = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        tokio::spawn(fake_telegram(listener, hits.clone()));

        let notifier = Notifier::new(configured(&api_base));

        assert!(notifier.alert("first", AlertCategory::Warning).await);
        // Same category inside the window is suppressed without a request.
        assert!(!notifier.alert("second", AlertCategory::Warning).await);
        // A different category is limited independently.
        assert!(notifier.alert("third", AlertCategory::Critical).await);

        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn telegram_failure_is_swallowed() {
        // Nothing listens here; the send errors and alert returns false.
        let notifier = Notifier::new(configured("http://127.0.0.1:1"));
        assert!(!notifier.alert("hello", AlertCategory::Info).await);
    }
}
