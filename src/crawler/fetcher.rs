//! HTTP fetcher implementation
//!
//! This module handles all network retrieval for the harvester, including:
//! - Building the HTTP client with the configured headers and timeouts
//! - Classifying responses and transport errors as retryable or terminal
//! - Retrying with exponential backoff, honoring `Retry-After`
//! - Stopping at the next retry boundary once the run is cancelled
//!
//! The network itself sits behind the `Transport` trait so the retry
//! protocol can be exercised without sockets.

use crate::config::FetchConfig;
use crate::crawler::backoff::BackoffPolicy;
use crate::state::PageId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, RETRY_AFTER};
use reqwest::Client;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Errors raised below the HTTP status level
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    /// Refused, reset, or dropped mid-response
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Connection(_))
    }

    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_connect() || e.is_request() || e.is_body() {
            Self::Connection(e.to_string())
        } else if e.is_builder() {
            Self::Malformed(e.to_string())
        } else {
            Self::Other(e.to_string())
        }
    }
}

/// What came back from one request
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    /// Server-requested wait, already converted to a duration
    pub retry_after: Option<Duration>,
    pub body: String,
}

impl RawResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            retry_after: None,
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            retry_after: None,
            body: String::new(),
        }
    }
}

/// A single request/response exchange
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &Url) -> Result<RawResponse, TransportError>;
}

/// `reqwest`-backed transport
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(config: &FetchConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client(config)?,
        })
    }
}

/// Builds an HTTP client with the configured identity and timeouts
pub fn build_http_client(config: &FetchConfig) -> Result<Client, reqwest::Error> {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&config.accept_language) {
        headers.insert(ACCEPT_LANGUAGE, value);
    }

    Client::builder()
        .user_agent(config.user_agent.clone())
        .default_headers(headers)
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .gzip(true)
        .brotli(true)
        .build()
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &Url) -> Result<RawResponse, TransportError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(TransportError::from_reqwest)?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_retry_after(v, Utc::now()));

        let body = response
            .text()
            .await
            .map_err(TransportError::from_reqwest)?;

        Ok(RawResponse {
            status,
            retry_after,
            body,
        })
    }
}

/// Parses a `Retry-After` value given as delta-seconds or an HTTP-date
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?;
    // A date in the past means "retry now"
    Some(
        at.with_timezone(&Utc)
            .signed_duration_since(now)
            .to_std()
            .unwrap_or(Duration::ZERO),
    )
}

/// Why a fetch gave up
#[derive(Debug, Clone, PartialEq)]
pub enum FailureKind {
    Timeout,
    Connection(String),
    /// Non-success HTTP status
    Status(u16),
    InvalidUrl(String),
    Transport(String),
    Cancelled,
}

impl From<TransportError> for FailureKind {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Timeout => FailureKind::Timeout,
            TransportError::Connection(msg) => FailureKind::Connection(msg),
            TransportError::Malformed(msg) => FailureKind::InvalidUrl(msg),
            TransportError::Other(msg) => FailureKind::Transport(msg),
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Connection(msg) => write!(f, "connection failed: {}", msg),
            FailureKind::Status(code) => write!(f, "HTTP {}", code),
            FailureKind::InvalidUrl(msg) => write!(f, "invalid URL: {}", msg),
            FailureKind::Transport(msg) => write!(f, "{}", msg),
            FailureKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result of a fetch operation
#[derive(Debug, Clone, PartialEq)]
pub enum FetchResult {
    Success {
        content: String,
        attempts: u32,
    },
    /// `retryable` is true when the retry budget ran out on a transient error
    Failure {
        kind: FailureKind,
        retryable: bool,
        attempts: u32,
    },
}

impl FetchResult {
    pub fn attempts(&self) -> u32 {
        match self {
            FetchResult::Success { attempts, .. } | FetchResult::Failure { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FetchResult::Success { .. })
    }
}

/// Fetches pages with bounded retry
///
/// # Retry Logic
///
/// | Condition | Action |
/// |-----------|--------|
/// | 2xx | Success |
/// | 429 | Retry after `Retry-After` (capped) or the backoff delay |
/// | 5xx | Retry after the backoff delay |
/// | Timeout / connection refused or reset | Retry after the backoff delay |
/// | Other status | Immediate failure |
/// | Malformed URL | Immediate failure, no request sent |
/// | Cancelled | Failure at the next retry boundary |
#[derive(Clone)]
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    policy: BackoffPolicy,
}

impl Fetcher {
    pub fn new(transport: Arc<dyn Transport>, policy: BackoffPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Fetches one page, retrying transient failures
    ///
    /// # Arguments
    ///
    /// * `id` - Page being fetched, used for logging
    /// * `url` - Absolute URL of the page
    /// * `cancel` - Checked before every attempt and during backoff sleeps
    ///
    /// # Returns
    ///
    /// `FetchResult::Success` with the body on a 2xx, otherwise
    /// `FetchResult::Failure` describing the last error. The attempt count is
    /// reported either way.
    pub async fn fetch(&self, id: PageId, url: &str, cancel: &CancellationToken) -> FetchResult {
        let url = match Url::parse(url) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!("Page {}: invalid URL {}: {}", id, url, e);
                return FetchResult::Failure {
                    kind: FailureKind::InvalidUrl(e.to_string()),
                    retryable: false,
                    attempts: 0,
                };
            }
        };

        let mut attempts = 0;
        loop {
            if cancel.is_cancelled() {
                return FetchResult::Failure {
                    kind: FailureKind::Cancelled,
                    retryable: false,
                    attempts,
                };
            }

            attempts += 1;
            let (kind, retryable, requested_delay) = match self.transport.get(&url).await {
                Ok(response) if (200..300).contains(&response.status) => {
                    tracing::debug!("Page {}: fetched in {} attempt(s)", id, attempts);
                    return FetchResult::Success {
                        content: response.body,
                        attempts,
                    };
                }
                Ok(response) if response.status == 429 => {
                    (FailureKind::Status(429), true, response.retry_after)
                }
                Ok(response) if response.status >= 500 => {
                    (FailureKind::Status(response.status), true, None)
                }
                Ok(response) => (FailureKind::Status(response.status), false, None),
                Err(e) => {
                    let retryable = e.is_retryable();
                    (FailureKind::from(e), retryable, None)
                }
            };

            if !retryable {
                tracing::warn!("Page {}: {} (not retryable)", id, kind);
                return FetchResult::Failure {
                    kind,
                    retryable: false,
                    attempts,
                };
            }

            if !self.policy.allows_retry(attempts) {
                tracing::warn!("Page {}: {} after {} attempts, giving up", id, kind, attempts);
                return FetchResult::Failure {
                    kind,
                    retryable: true,
                    attempts,
                };
            }

            let delay = match requested_delay {
                Some(requested) => self.policy.cap(requested),
                None => self.policy.delay(attempts - 1),
            };
            tracing::warn!(
                "Page {}: {} on attempt {}, retrying in {:?}",
                id,
                kind,
                attempts,
                delay
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    return FetchResult::Failure {
                        kind: FailureKind::Cancelled,
                        retryable: false,
                        attempts,
                    };
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
