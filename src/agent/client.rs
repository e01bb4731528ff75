//! HTTP client for the node agent
//!
//! Issues authenticated requests against an ordered list of controller
//! endpoints. Connection-level failures rotate to the next endpoint for
//! subsequent calls; retryable HTTP statuses are retried in-request with
//! exponential backoff; timeouts and other HTTP errors surface directly.
//! Every fault crosses this boundary as a [`TransportError`] - callers
//! never see raw network error types.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::commands::{CommandBrief, StatusReport};
use crate::config::AgentConfig;
use crate::db::{NodeRegistration, TelemetrySample};
use crate::{Error, Result};

/// HTTP statuses worth retrying in-request
const DEFAULT_RETRYABLE_STATUSES: [u16; 4] = [500, 502, 503, 504];

/// Explicit retry policy threaded through every request
///
/// A plain value so tests can exercise the arithmetic without a network.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Additional attempts after the first (0 disables retries)
    pub max_retries: u32,
    /// Base delay; attempt `n` waits `base * 2^n`
    pub backoff_base: Duration,
    /// Statuses that trigger an in-request retry
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.to_vec(),
        }
    }
}

impl RetryPolicy {
    /// Whether an HTTP status warrants another attempt
    #[must_use]
    pub fn is_retryable(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }

    /// Delay before retry number `attempt` (0-based)
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// What went wrong, for logging; callers treat all kinds the same way
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Could not reach the endpoint at all
    Connect,
    /// The request timed out
    Timeout,
    /// The controller answered with a non-success status
    Status(u16),
    /// The response could not be understood
    Protocol,
}

/// Uniform failure signal for all transport faults
#[derive(Debug, Clone)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            TransportErrorKind::Connect => write!(f, "connection failed: {}", self.message),
            TransportErrorKind::Timeout => write!(f, "request timed out: {}", self.message),
            TransportErrorKind::Status(code) => write!(f, "http {code}: {}", self.message),
            TransportErrorKind::Protocol => write!(f, "protocol error: {}", self.message),
        }
    }
}

impl std::error::Error for TransportError {}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    auth_token: String,
    #[allow(dead_code)]
    node_id: String,
}

#[derive(Debug, Deserialize)]
struct HeartbeatResponse {
    #[allow(dead_code)]
    acknowledged: bool,
    #[serde(default)]
    pending_commands: Vec<CommandBrief>,
}

#[derive(Debug, Serialize)]
struct HeartbeatBody<'a> {
    node_id: &'a str,
    #[serde(flatten)]
    sample: &'a TelemetrySample,
}

#[derive(Debug, Deserialize)]
struct ReportResponse {
    #[allow(dead_code)]
    id: String,
}

/// HTTP client for communicating with the controller
pub struct ControllerClient {
    endpoints: Vec<String>,
    current: usize,
    client: reqwest::Client,
    auth_token: Option<String>,
    retry: RetryPolicy,
}

impl ControllerClient {
    /// Build a client from the agent configuration
    ///
    /// # Errors
    ///
    /// Returns error if the underlying HTTP client cannot be constructed
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.controller.timeout_seconds))
            .danger_accept_invalid_certs(!config.controller.verify_tls)
            .build()
            .map_err(Error::Http)?;

        Ok(Self {
            endpoints: config.endpoints(),
            current: 0,
            client,
            auth_token: None,
            retry: RetryPolicy {
                max_retries: config.max_retries,
                backoff_base: Duration::from_millis(config.retry_backoff_base_ms),
                retryable_statuses: DEFAULT_RETRYABLE_STATUSES.to_vec(),
            },
        })
    }

    /// Endpoint the next request will use
    #[must_use]
    pub fn current_endpoint(&self) -> &str {
        &self.endpoints[self.current]
    }

    /// Set the bearer token (after registration, or loaded from disk)
    pub fn set_token(&mut self, token: Option<String>) {
        self.auth_token = token;
    }

    /// Current bearer token, if any
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    fn switch_endpoint(&mut self) {
        if self.endpoints.len() > 1 {
            self.current = (self.current + 1) % self.endpoints.len();
            tracing::warn!(endpoint = %self.current_endpoint(), "switching controller endpoint");
        }
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &mut self,
        path: &str,
        body: &B,
    ) -> std::result::Result<T, TransportError> {
        let url = format!("{}{path}", self.current_endpoint().trim_end_matches('/'));

        for attempt in 0..=self.retry.max_retries {
            let mut request = self.client.post(&url).json(body);
            if let Some(token) = &self.auth_token {
                request = request.bearer_auth(token);
            }

            let response = match request.send().await {
                Ok(resp) => resp,
                Err(e) if e.is_timeout() => {
                    // per-request fault, not an endpoint-health signal
                    return Err(TransportError::new(TransportErrorKind::Timeout, e.to_string()));
                }
                Err(e) if e.is_connect() => {
                    self.switch_endpoint();
                    return Err(TransportError::new(TransportErrorKind::Connect, e.to_string()));
                }
                Err(e) => {
                    return Err(TransportError::new(TransportErrorKind::Protocol, e.to_string()));
                }
            };

            let status = response.status();
            if status.is_success() {
                return response
                    .json::<T>()
                    .await
                    .map_err(|e| TransportError::new(TransportErrorKind::Protocol, e.to_string()));
            }

            let code = status.as_u16();
            if self.retry.is_retryable(code) && attempt < self.retry.max_retries {
                let delay = self.retry.backoff(attempt);
                tracing::debug!(%url, code, ?delay, "retryable status, backing off");
                tokio::time::sleep(delay).await;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::new(TransportErrorKind::Status(code), body));
        }

        // the loop always returns; retries are bounded by max_retries
        unreachable!()
    }

    /// Register this node, storing and returning the issued bearer token
    ///
    /// # Errors
    ///
    /// Returns a uniform transport failure; the caller retries with backoff
    pub async fn register(
        &mut self,
        registration: &NodeRegistration,
    ) -> std::result::Result<String, TransportError> {
        tracing::info!(node_id = %registration.node_id, "registering with controller");

        let response: RegisterResponse = self.post("/api/v1/nodes/register", registration).await?;
        self.auth_token = Some(response.auth_token.clone());
        Ok(response.auth_token)
    }

    /// Send a heartbeat, returning commands due for this node
    ///
    /// # Errors
    ///
    /// Returns a uniform transport failure; the caller counts it toward
    /// the re-registration threshold
    pub async fn heartbeat(
        &mut self,
        node_id: &str,
        sample: &TelemetrySample,
    ) -> std::result::Result<Vec<CommandBrief>, TransportError> {
        let body = HeartbeatBody { node_id, sample };
        let response: HeartbeatResponse = self.post("/api/v1/nodes/heartbeat", &body).await?;
        Ok(response.pending_commands)
    }

    /// Report a command status; returns whether the controller accepted it
    pub async fn report_result(&mut self, command_id: &str, report: &StatusReport) -> bool {
        let path = format!("/api/v1/commands/{command_id}/result");
        match self.post::<_, ReportResponse>(&path, report).await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(command_id, error = %e, "failed to report command result");
                false
            }
        }
    }
}
