//! Authenticated queue API client.

use crate::error::{ApiError, ApiResult};
use crate::types::{
    ConfirmRequest, ConfirmResponse, GenerateTokenRequest, GenerateTokenResponse, OneOrMany,
    PendingMessagesResponse,
};
use async_trait::async_trait;
use message_delivery_worker::{DeliveryItem, DeliveryOutcome, MessageSource};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Hard deadline for every queue API request.
pub const API_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a completed login outcome is handed to further callers before a
/// fresh credential exchange is allowed.
const LOGIN_COOLDOWN: Duration = Duration::from_secs(1);

/// Maximum length (in characters) the confirm endpoint accepts for
/// `mensaje_error`.
const MAX_ERROR_TEXT_CHARS: usize = 255;

/// Single-flight login record: the cell's mutex serializes credential
/// exchanges, the record fans the latest outcome out during the cool-down.
struct LoginCell {
    last: Option<(bool, Instant)>,
}

/// Bearer-authenticated client for the queue API.
///
/// `fetch_pending` and `confirm` never fail outward: connectivity and parse
/// trouble degrade to an empty list / `false` with a warning, so the
/// delivery loop does not have to special-case queue API downtime.
pub struct QueueApiClient {
    http_client: reqwest::Client,
    base_url: String,
    email: String,
    password: String,
    device_name: String,
    token: RwLock<Option<String>>,
    login_cell: Mutex<LoginCell>,
}

impl QueueApiClient {
    /// Create a new client for the given queue API base URL.
    pub fn new(
        base_url: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
        device_name: impl Into<String>,
    ) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            http_client: reqwest::Client::new(),
            base_url,
            email: email.into(),
            password: password.into(),
            device_name: device_name.into(),
            token: RwLock::new(None),
            login_cell: Mutex::new(LoginCell { last: None }),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Perform the credential exchange, single-flight.
    ///
    /// Concurrent callers share one underlying request: whoever holds the
    /// cell performs the exchange, everyone else blocks on it and receives
    /// the recorded outcome. The record stays authoritative for a short
    /// cool-down so completion does not trigger an immediate re-login storm.
    pub async fn login(&self) -> bool {
        let mut cell = self.login_cell.lock().await;

        if let Some((outcome, completed_at)) = cell.last {
            if completed_at.elapsed() < LOGIN_COOLDOWN {
                debug!(outcome, "Reusing just-completed login outcome");
                return outcome;
            }
        }

        let outcome = self.exchange_credentials().await;
        cell.last = Some((outcome, Instant::now()));
        outcome
    }

    async fn exchange_credentials(&self) -> bool {
        let url = self.endpoint("/v1/auth/generate-token");
        info!(url = %url, "Logging in to queue API");

        let request = GenerateTokenRequest {
            email: self.email.clone(),
            password: self.password.clone(),
            device_name: self.device_name.clone(),
        };

        let response = match tokio::time::timeout(
            API_REQUEST_TIMEOUT,
            self.http_client.post(&url).json(&request).send(),
        )
        .await
        {
            Err(_) => {
                warn!("Login request timed out");
                return false;
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Login request failed");
                return false;
            }
            Ok(Ok(response)) => response,
        };

        let body: GenerateTokenResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "Failed to parse login response");
                return false;
            }
        };

        match body.token {
            Some(token) if !token.is_empty() => {
                *self.token.write().await = Some(token);
                info!("Queue API token obtained");
                true
            }
            _ => {
                warn!("No token in login response");
                false
            }
        }
    }

    /// Fetch the pending delivery items. Never fails outward.
    pub async fn fetch_pending(&self) -> Vec<DeliveryItem> {
        let url = self.endpoint("/v1/gateway/sms/supplier/pending-messages");

        let response = match self
            .send_with_auth(|client, token| {
                let mut request = client.get(&url);
                if let Some(token) = token {
                    request = request.bearer_auth(token);
                }
                request
            })
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Failed to fetch pending messages");
                return Vec::new();
            }
        };

        let body: PendingMessagesResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "Failed to parse pending-messages response");
                return Vec::new();
            }
        };

        if body.response_type != "success" {
            warn!(
                response_type = %body.response_type,
                "Queue API reported an error for pending messages"
            );
            return Vec::new();
        }

        let items: Vec<DeliveryItem> = body
            .data
            .map(OneOrMany::into_vec)
            .unwrap_or_default()
            .into_iter()
            .map(DeliveryItem::from)
            .collect();

        debug!(pending = items.len(), "Fetched pending messages");
        items
    }

    /// Report the terminal outcome for one item. Never fails outward.
    ///
    /// `error_text` is truncated to the confirm endpoint's 255-character
    /// limit before transmission.
    pub async fn confirm(
        &self,
        id: &str,
        outcome: DeliveryOutcome,
        error_text: Option<&str>,
    ) -> bool {
        let url = self.endpoint("/v1/gateway/sms/supplier/confirm-sent-message");

        let request = ConfirmRequest {
            id_proveedor_envio_sms: id.to_string(),
            estado_envio: outcome.as_str().to_string(),
            mensaje_error: error_text.map(truncate_error),
        };

        let response = match self
            .send_with_auth(|client, token| {
                let mut builder = client.post(&url).json(&request);
                if let Some(token) = token {
                    builder = builder.bearer_auth(token);
                }
                builder
            })
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(id = %id, error = %e, "Failed to confirm message");
                return false;
            }
        };

        match response.json::<ConfirmResponse>().await {
            Ok(body) => {
                let accepted = body.response_type == "success";
                if !accepted {
                    warn!(id = %id, response_type = %body.response_type, "Confirm rejected");
                }
                accepted
            }
            Err(e) => {
                warn!(id = %id, error = %e, "Failed to parse confirm response");
                false
            }
        }
    }

    /// Execute a request with the bearer token attached, retrying exactly
    /// once through a re-login when the API answers 401. A second 401 is
    /// surfaced as [`ApiError::Unauthorized`] without further retries.
    async fn send_with_auth<F>(&self, build: F) -> ApiResult<reqwest::Response>
    where
        F: Fn(&reqwest::Client, Option<&str>) -> reqwest::RequestBuilder,
    {
        let token = self.token.read().await.clone();
        let response = self.execute(&build, token.as_deref()).await?;
        if response.status() != reqwest::StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        debug!("Queue API answered 401, re-logging in once");
        *self.token.write().await = None;
        if !self.login().await {
            return Err(ApiError::Unauthorized);
        }

        let token = self.token.read().await.clone();
        let response = self.execute(&build, token.as_deref()).await?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }
        Ok(response)
    }

    async fn execute<F>(&self, build: &F, token: Option<&str>) -> ApiResult<reqwest::Response>
    where
        F: Fn(&reqwest::Client, Option<&str>) -> reqwest::RequestBuilder,
    {
        let request = build(&self.http_client, token);
        match tokio::time::timeout(API_REQUEST_TIMEOUT, request.send()).await {
            Err(_) => Err(ApiError::Timeout),
            Ok(Err(e)) => Err(ApiError::Http(e)),
            Ok(Ok(response)) => Ok(response),
        }
    }
}

#[async_trait]
impl MessageSource for QueueApiClient {
    async fn fetch_pending(&self) -> Vec<DeliveryItem> {
        QueueApiClient::fetch_pending(self).await
    }

    async fn confirm(&self, id: &str, outcome: DeliveryOutcome, error_text: Option<&str>) -> bool {
        QueueApiClient::confirm(self, id, outcome, error_text).await
    }
}

/// Truncate a failure reason to the confirm endpoint's limit, on a char
/// boundary.
fn truncate_error(text: &str) -> String {
    text.chars().take(MAX_ERROR_TEXT_CHARS).collect()
}
