//! Core configuration and utilities for the SMS gateway daemon.

mod config;
mod error;
mod logging;

pub use config::{
    Config, DEFAULT_API_DEVICE_NAME, DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_CAP_MS,
    DEFAULT_BRIDGE_URL, DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_POLL_INTERVAL_MS,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, parse_level};
