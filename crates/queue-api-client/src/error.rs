//! Queue API error types.

use thiserror::Error;

/// Queue API error type.
#[derive(Error, Debug)]
pub enum ApiError {
    /// The request did not complete within the deadline
    #[error("Request timed out")]
    Timeout,

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The API rejected the bearer token twice in a row
    #[error("Unauthorized: token rejected after re-login")]
    Unauthorized,
}

/// Result type alias using ApiError.
pub type ApiResult<T> = Result<T, ApiError>;
