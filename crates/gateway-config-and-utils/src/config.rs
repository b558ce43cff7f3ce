//! Configuration management for the gateway daemon.
//!
//! All settings come from environment variables (an optional `.env` file is
//! honored by the binary before this module reads anything). The queue API
//! base URL is the only hard requirement; everything else has a default.

use crate::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use url::Url;

/// Default device name reported to the queue API and used in alert text.
pub const DEFAULT_API_DEVICE_NAME: &str = "Gateway";

/// Default delivery-loop poll interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 15_000;

/// Default transport bridge WebSocket URL.
pub const DEFAULT_BRIDGE_URL: &str = "ws://127.0.0.1:8055";

/// Default cap on consecutive reconnection attempts before giving up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Default base delay for reconnection backoff in milliseconds.
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 2_000;

/// Default maximum delay for reconnection backoff in milliseconds.
pub const DEFAULT_BACKOFF_CAP_MS: u64 = 60_000;

/// Main gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Queue API base URL (e.g. `https://queue.example.com`). Required.
    pub api_base_url: String,
    /// Queue API login email.
    pub api_email: String,
    /// Queue API login password.
    pub api_password: String,
    /// Device name sent on login and shown in alerts.
    pub api_device_name: String,
    /// Delivery-loop poll interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Whether Telegram alerts are enabled.
    pub telegram_enabled: bool,
    /// Telegram bot token for alerts.
    pub telegram_bot_token: Option<String>,
    /// Telegram chat ID for alerts.
    pub telegram_chat_id: Option<String>,
    /// Transport bridge WebSocket URL.
    pub bridge_url: String,
    /// Maximum consecutive reconnection attempts before the session is fatal.
    pub max_reconnect_attempts: u32,
    /// Base delay for reconnection backoff in milliseconds.
    pub backoff_base_ms: u64,
    /// Maximum delay for reconnection backoff in milliseconds.
    pub backoff_cap_ms: u64,
}

impl Config {
    /// Load configuration from process environment variables.
    ///
    /// Fails with [`CoreError::Config`] when `API_BASE_URL` is unset — the
    /// daemon cannot do anything useful without it.
    pub fn from_env() -> CoreResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> CoreResult<Self> {
        let api_base_url = lookup("API_BASE_URL")
            .and_then(non_empty)
            .ok_or_else(|| CoreError::Config("API_BASE_URL is not set".to_string()))?;

        Ok(Self {
            api_base_url,
            api_email: lookup("API_EMAIL").and_then(non_empty).unwrap_or_default(),
            api_password: lookup("API_PASSWORD")
                .and_then(non_empty)
                .unwrap_or_default(),
            api_device_name: lookup("API_DEVICE_NAME")
                .and_then(non_empty)
                .unwrap_or_else(|| DEFAULT_API_DEVICE_NAME.to_string()),
            poll_interval_ms: parse_or(
                lookup("CHECK_MESSAGES_INTERVAL"),
                DEFAULT_POLL_INTERVAL_MS,
            ),
            telegram_enabled: lookup("TELEGRAM_ENABLED")
                .map(|raw| raw.trim().eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            telegram_bot_token: lookup("TELEGRAM_BOT_TOKEN").and_then(non_empty),
            telegram_chat_id: lookup("TELEGRAM_CHAT_ID").and_then(non_empty),
            bridge_url: lookup("BRIDGE_URL")
                .and_then(non_empty)
                .unwrap_or_else(|| DEFAULT_BRIDGE_URL.to_string()),
            max_reconnect_attempts: parse_or(
                lookup("MAX_RECONNECT_ATTEMPTS"),
                DEFAULT_MAX_RECONNECT_ATTEMPTS,
            ),
            backoff_base_ms: parse_or(lookup("RECONNECT_BACKOFF_BASE_MS"), DEFAULT_BACKOFF_BASE_MS),
            backoff_cap_ms: parse_or(lookup("RECONNECT_BACKOFF_CAP_MS"), DEFAULT_BACKOFF_CAP_MS),
        })
    }

    /// Get the queue API base URL as a parsed URL.
    pub fn api_base_url(&self) -> CoreResult<Url> {
        Url::parse(&self.api_base_url).map_err(CoreError::from)
    }
}

fn non_empty(raw: String) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_or<T: std::str::FromStr>(raw: Option<String>, fallback: T) -> T {
    raw.and_then(non_empty)
        .and_then(|value| value.parse::<T>().ok())
        .unwrap_or(fallback)
}
