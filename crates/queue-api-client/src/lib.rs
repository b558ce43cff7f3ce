//! Authenticated client for the queue API.
//!
//! Holds the bearer-token session, performs single-flight logins, and maps
//! queue API trouble to degraded-but-safe results so the delivery loop never
//! has to special-case connectivity failures of the queue side.

mod client;
mod error;
mod types;

pub use client::{QueueApiClient, API_REQUEST_TIMEOUT};
pub use error::{ApiError, ApiResult};
pub use types::{ConfirmRequest, GenerateTokenRequest, OneOrMany, PendingMessagesResponse, WireItem};
