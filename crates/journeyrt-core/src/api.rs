//! API client: operation invocation with retry, idempotency, and the
//! fixed status-to-error-code mapping.
//!
//! Each call resolves an operation through the OpenAPI resolver, issues
//! the HTTP request with a fresh `traceparent`, and retries transient
//! statuses (408, 429, 5xx) up to three total attempts with exponential
//! backoff or a server-provided `Retry-After`. Transport-level failures
//! exit immediately without consuming retry attempts.
//!
//! Certificate pinning is a configuration knob carried through from the
//! manifest; trust evaluation currently falls back to the platform store,
//! and a certificate failure observed while pinning is enabled maps to
//! `PINNING_FAIL`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::error::ErrorCode;
use crate::events;
use crate::openapi::{OpenApiError, OpenApiResolver};

/// Total attempts per invocation, including the first.
pub const MAX_ATTEMPTS: u32 = 3;

/// Header carrying the per-step idempotency key.
pub const IDEMPOTENCY_HEADER: &str = "X-Idempotency-Key";

/// Errors surfaced by [`ApiClient::call`].
#[derive(Debug, Error)]
pub enum ApiClientError {
    /// The request could not be built.
    #[error("request build failed: {0}")]
    RequestBuild(#[from] OpenApiError),

    /// Transport-level failure (DNS, connect, reset, timeout).
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),

    /// Non-retriable HTTP failure, or a pinning rejection (`status: -1`).
    #[error("HTTP {status} ({code})")]
    Http {
        /// HTTP status, or `-1` for a pinning rejection.
        status: i32,
        /// Mapped error code.
        code: ErrorCode,
    },

    /// A retriable status persisted through every attempt.
    #[error("retry limit exceeded: HTTP {status} ({code}) after {MAX_ATTEMPTS} attempts")]
    RetryLimitExceeded {
        /// The status of the final attempt.
        status: u16,
        /// Mapped error code of the final attempt.
        code: ErrorCode,
    },
}

impl ApiClientError {
    /// The taxonomy code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::RequestBuild(_) | Self::Transport(_) => ErrorCode::Unknown,
            Self::Http { code, .. } | Self::RetryLimitExceeded { code, .. } => *code,
        }
    }

    /// Whether the caller may retry the journey after this error.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        self.code().is_recoverable()
    }
}

/// A successful API response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// HTTP status code (2xx).
    pub status: u16,
    /// Response headers.
    pub headers: BTreeMap<String, String>,
    /// Raw response body.
    pub body: Vec<u8>,
}

/// Maps an HTTP status onto the fixed error-code taxonomy.
#[must_use]
pub const fn map_status(status: u16, has_idempotency_key: bool) -> ErrorCode {
    match status {
        401 | 403 => ErrorCode::AuthExpired,
        408 => ErrorCode::NetTimeout,
        409 if has_idempotency_key => ErrorCode::IdempotentReplay,
        400 | 422 => ErrorCode::ValidationFail,
        429 => ErrorCode::RateLimited,
        _ => ErrorCode::Unknown,
    }
}

const fn is_retriable(status: u16) -> bool {
    matches!(status, 408 | 429) || (status >= 500 && status < 600)
}

/// Stateful wrapper over the HTTP transport for one journey.
pub struct ApiClient {
    resolver: Arc<OpenApiResolver>,
    base_url: Url,
    default_headers: BTreeMap<String, String>,
    pinning: bool,
    http: reqwest::Client,
}

impl ApiClient {
    /// Creates a client bound to a base URL and the manifest's default
    /// headers.
    ///
    /// # Errors
    ///
    /// Returns [`ApiClientError::Transport`] if the HTTP client cannot be
    /// constructed.
    pub fn new(
        resolver: Arc<OpenApiResolver>,
        base_url: Url,
        default_headers: BTreeMap<String, String>,
        pinning: bool,
    ) -> Result<Self, ApiClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(ApiClientError::Transport)?;
        Ok(Self {
            resolver,
            base_url,
            default_headers,
            pinning,
            http,
        })
    }

    /// Invokes an operation resolved from the bundle.
    ///
    /// Builds the request, injects a fresh `traceparent` (and the
    /// idempotency key when present), then issues it with the retry
    /// policy described in the module docs.
    ///
    /// # Errors
    ///
    /// - [`ApiClientError::RequestBuild`] for unknown operations or body
    ///   serialization failures
    /// - [`ApiClientError::Transport`] for transport failures
    /// - [`ApiClientError::Http`] for non-retriable statuses
    /// - [`ApiClientError::RetryLimitExceeded`] when retries are exhausted
    #[instrument(skip(self, body, headers), fields(operation = operation_id))]
    pub async fn call(
        &self,
        operation_id: &str,
        body: Option<&Value>,
        headers: &BTreeMap<String, String>,
        idempotency_key: Option<&str>,
    ) -> Result<ApiResponse, ApiClientError> {
        let operation = self.resolver.operation(operation_id).ok_or_else(|| {
            OpenApiError::InvalidDocument(format!("unknown operationId {operation_id}"))
        })?;

        let mut merged = self.default_headers.clone();
        for (name, value) in headers {
            merged.insert(name.clone(), value.clone());
        }
        let spec = OpenApiResolver::build_request(&self.base_url, operation, body, &merged)?;
        let method = reqwest::Method::from_bytes(spec.method.as_bytes())
            .map_err(|err| OpenApiError::RequestBuildFailed(err.to_string()))?;
        let idempotency_key = idempotency_key.filter(|key| !key.is_empty());

        let mut attempt = 0;
        loop {
            let mut request = self.http.request(method.clone(), spec.url.clone());
            for (name, value) in &spec.headers {
                request = request.header(name, value);
            }
            request = request.header("traceparent", events::new_traceparent());
            if let Some(key) = idempotency_key {
                request = request.header(IDEMPOTENCY_HEADER, key);
            }
            if let Some(body) = &spec.body {
                request = request.body(body.clone());
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(err) => return Err(self.classify_transport(err)),
            };

            let status = response.status().as_u16();
            if (200..300).contains(&status) {
                let headers = response
                    .headers()
                    .iter()
                    .filter_map(|(name, value)| {
                        value
                            .to_str()
                            .ok()
                            .map(|v| (name.to_string(), v.to_string()))
                    })
                    .collect();
                let body = response
                    .bytes()
                    .await
                    .map_err(ApiClientError::Transport)?
                    .to_vec();
                debug!(status, attempt, "api call succeeded");
                return Ok(ApiResponse {
                    status,
                    headers,
                    body,
                });
            }

            let code = map_status(status, idempotency_key.is_some());
            if !is_retriable(status) {
                return Err(ApiClientError::Http {
                    status: i32::from(status),
                    code,
                });
            }
            if attempt + 1 >= MAX_ATTEMPTS {
                warn!(status, "retry limit exceeded");
                return Err(ApiClientError::RetryLimitExceeded { status, code });
            }

            let delay = retry_delay(
                response
                    .headers()
                    .get("Retry-After")
                    .and_then(|value| value.to_str().ok()),
                attempt,
            );
            debug!(status, attempt, delay_ms = delay.as_millis() as u64, "retrying");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    fn classify_transport(&self, err: reqwest::Error) -> ApiClientError {
        if self.pinning && mentions_certificate(&err) {
            return ApiClientError::Http {
                status: -1,
                code: ErrorCode::PinningFail,
            };
        }
        ApiClientError::Transport(err)
    }
}

/// Delay before the next attempt: a parsable `Retry-After` (seconds) wins;
/// otherwise `0.5 * 2^attempt` plus up to 250ms of jitter.
fn retry_delay(retry_after: Option<&str>, attempt: u32) -> Duration {
    if let Some(seconds) = retry_after.and_then(|raw| raw.trim().parse::<f64>().ok()) {
        return Duration::from_secs_f64(seconds.max(0.0));
    }
    let base = 0.5 * f64::from(1u32 << attempt.min(16));
    let jitter: f64 = rand::thread_rng().gen_range(0.0..0.25);
    Duration::from_secs_f64(base + jitter)
}

fn mentions_certificate(err: &reqwest::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(current) = source {
        if current.to_string().to_ascii_lowercase().contains("certificate") {
            return true;
        }
        source = current.source();
    }
    false
}
