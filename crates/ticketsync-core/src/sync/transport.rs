//! Sync transport: one request/response exchange with the server.

use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::config::SyncSettings;
use crate::util::{compact_text, is_http_url, normalize_text_option};

use super::protocol::{SyncRequest, SyncResponse};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Sync request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Sync server unreachable: {0}")]
    Connect(String),
    #[error("Sync HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Sync API error: {message}")]
    Api { status: u16, message: String },
    #[error("Invalid sync response: {0}")]
    Decode(String),
    #[error("Invalid sync configuration: {0}")]
    InvalidConfiguration(String),
}

impl TransportError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Connect(_) => true,
            Self::Http(error) => !(error.is_builder() || error.is_decode()),
            Self::Api { status, .. } => *status >= 500 || matches!(*status, 408 | 429),
            Self::Decode(_) | Self::InvalidConfiguration(_) => false,
        }
    }
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Moves one sync request to the server and brings back its response.
///
/// Implementations never interpret per-record results.
pub trait SyncTransport: Send + Sync {
    fn exchange(
        &self,
        request: &SyncRequest,
    ) -> impl Future<Output = TransportResult<SyncResponse>> + Send;
}

/// How many times and how patiently a cycle retries its exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per cycle, first try included
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Upper bound for a single attempt
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        SyncSettings::default().retry_policy()
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Run one exchange with per-attempt timeouts and exponential backoff.
pub async fn exchange_with_retry<T: SyncTransport>(
    transport: &T,
    request: &SyncRequest,
    policy: &RetryPolicy,
) -> TransportResult<SyncResponse> {
    let mut attempt = 1;
    loop {
        let outcome =
            match tokio::time::timeout(policy.request_timeout, transport.exchange(request)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(TransportError::Timeout(policy.request_timeout)),
            };

        match outcome {
            Ok(response) => return Ok(response),
            Err(error) if error.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    "Sync attempt {attempt}/{} failed: {error}; retrying in {delay:?}",
                    policy.max_attempts
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

/// `POST {api_base_url}/sync` with bearer authentication
#[derive(Clone)]
pub struct HttpSyncTransport {
    endpoint: String,
    auth_token: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpSyncTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpSyncTransport")
            .field("endpoint", &self.endpoint)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl HttpSyncTransport {
    pub fn new(
        api_base_url: impl Into<String>,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> TransportResult<Self> {
        let base = normalize_base_url(api_base_url.into())?;
        Ok(Self {
            endpoint: format!("{base}/sync"),
            auth_token: normalize_text_option(auth_token),
            timeout,
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    /// Build from resolved settings; an API URL is required.
    pub fn from_settings(settings: &SyncSettings) -> TransportResult<Self> {
        let base = settings.api_base_url.clone().ok_or_else(|| {
            TransportError::InvalidConfiguration("api_base_url is not configured".to_string())
        })?;
        Self::new(
            base,
            settings.auth_token.clone(),
            Duration::from_secs(settings.request_timeout_secs),
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl SyncTransport for HttpSyncTransport {
    async fn exchange(&self, request: &SyncRequest) -> TransportResult<SyncResponse> {
        let mut builder = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(request);
        if let Some(token) = &self.auth_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|error| classify(error, self.timeout))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| classify(error, self.timeout))?;

        if !status.is_success() {
            return Err(TransportError::Api {
                status: status.as_u16(),
                message: parse_api_error(status, &body),
            });
        }

        decode_body(status, &body)
    }
}

/// Split client errors into the retryable timeout and connect cases.
pub(crate) fn classify(error: reqwest::Error, timeout: Duration) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(timeout)
    } else if error.is_connect() {
        TransportError::Connect(error.to_string())
    } else {
        TransportError::Http(error)
    }
}

/// Standard response envelope wrapping most server payloads
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    data: T,
}

/// Decode a success body, unwrapping the `{success, data}` envelope if present.
pub(crate) fn decode_body<T: DeserializeOwned>(
    status: StatusCode,
    body: &str,
) -> TransportResult<T> {
    if let Ok(envelope) = serde_json::from_str::<Envelope<T>>(body) {
        if !envelope.success {
            return Err(TransportError::Api {
                status: status.as_u16(),
                message: parse_api_error(status, body),
            });
        }
        return Ok(envelope.data);
    }
    serde_json::from_str(body).map_err(|error| TransportError::Decode(error.to_string()))
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<ApiErrorField>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ApiErrorField {
    Text(String),
    Detail { message: Option<String> },
}

/// Human-readable message from an error response body.
pub(crate) fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        let nested = payload.error.and_then(|error| match error {
            ApiErrorField::Text(message) => Some(message),
            ApiErrorField::Detail { message } => message,
        });
        if let Some(message) = payload.message.or(nested) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

pub(crate) fn normalize_base_url(raw: String) -> TransportResult<String> {
    let base = normalize_text_option(Some(raw)).ok_or_else(|| {
        TransportError::InvalidConfiguration("api_base_url must not be empty".to_string())
    })?;
    if is_http_url(&base) {
        Ok(base.trim_end_matches('/').to_string())
    } else {
        Err(TransportError::InvalidConfiguration(
            "api_base_url must include http:// or https://".to_string(),
        ))
    }
}
