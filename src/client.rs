//! Authenticated, retrying GET client for the metering API
//!
//! Two independent policies wrap every request:
//!
//! - re-authentication: a 401 triggers exactly one fresh login and one more
//!   pass; a 401 in that second pass is [`HelmiError::AuthFailed`]
//! - transport backoff: network errors, 429 and 5xx are retried up to
//!   `max_attempts` times with exponentially growing delays
//!
//! Each pass gets its own backoff budget. Other non-2xx statuses and
//! undecodable bodies fail immediately.

use crate::auth::AuthSession;
use crate::config::{Config, RetryConfig};
use crate::error::{HelmiError, Result, is_retryable_status};
use crate::http::{HttpTransport, error_summary};
use crate::logging::{StructuredLogger, get_logger};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Exponential backoff parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based): `base * 2^retry`
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(retry.min(16)))
    }
}

/// Why a single pass gave up
enum PassFailure {
    Unauthorized,
    Failed(HelmiError),
}

/// Metering API client holding the login session
pub struct RetryingHttpClient {
    transport: Arc<dyn HttpTransport>,
    session: AuthSession,
    base_url: String,
    retry: RetryPolicy,
    logger: StructuredLogger,
}

impl RetryingHttpClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        session: AuthSession,
        base_url: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            session,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry,
            logger: get_logger("client"),
        }
    }

    /// Client and session wired from configuration, sharing one transport
    pub fn from_config(transport: Arc<dyn HttpTransport>, config: &Config) -> Self {
        let session = AuthSession::from_config(Arc::clone(&transport), config);
        Self::new(
            transport,
            session,
            config.api.base_url.clone(),
            RetryPolicy::from(&config.retry),
        )
    }

    pub fn session(&self) -> &AuthSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut AuthSession {
        &mut self.session
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// GET `path` with query `params` and decode the JSON body
    pub async fn get(&mut self, path: &str, params: &[(&str, &str)]) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);

        let token = self.session.current_token().await?;
        match self.pass(&url, params, &token).await {
            Ok(value) => return Ok(value),
            Err(PassFailure::Failed(e)) => return Err(e),
            Err(PassFailure::Unauthorized) => {}
        }

        self.logger
            .info(&format!("Access token rejected for {path}, logging in again"));
        let token = self.session.login().await?.access_token.clone();
        match self.pass(&url, params, &token).await {
            Ok(value) => Ok(value),
            Err(PassFailure::Failed(e)) => Err(e),
            Err(PassFailure::Unauthorized) => Err(HelmiError::auth(format!(
                "{path} still unauthorized after re-login"
            ))),
        }
    }

    /// One authenticated pass with transport backoff
    async fn pass(
        &self,
        url: &str,
        params: &[(&str, &str)],
        token: &str,
    ) -> std::result::Result<Value, PassFailure> {
        let bearer = format!("Bearer {token}");
        let headers = [("Accept", "application/json"), ("Authorization", bearer.as_str())];

        let mut last_error = HelmiError::request("no attempt made");
        for attempt in 0..self.retry.max_attempts {
            if attempt > 0 {
                let delay = self.retry.delay_for(attempt - 1);
                self.logger.debug(&format!(
                    "Retrying in {}ms (attempt {}/{}): {}",
                    delay.as_millis(),
                    attempt + 1,
                    self.retry.max_attempts,
                    last_error
                ));
                tokio::time::sleep(delay).await;
            }

            let response = match self.transport.get(url, params, &headers).await {
                Ok(response) => response,
                Err(e) => {
                    self.logger.warn(&format!("Transport error: {e}"));
                    last_error = e;
                    continue;
                }
            };

            match response.status {
                200..=299 => {
                    return response.json().map_err(|e| {
                        PassFailure::Failed(HelmiError::request_status(
                            response.status,
                            format!("Malformed JSON body: {e}"),
                        ))
                    });
                }
                401 => return Err(PassFailure::Unauthorized),
                status if is_retryable_status(status) => {
                    self.logger
                        .warn(&format!("Transient status {status} from {url}"));
                    last_error = HelmiError::request_status(status, error_summary(&response));
                }
                status => {
                    return Err(PassFailure::Failed(HelmiError::request_status(
                        status,
                        error_summary(&response),
                    )));
                }
            }
        }

        let status = match &last_error {
            HelmiError::RequestFailed { status, .. } => *status,
            _ => None,
        };
        Err(PassFailure::Failed(HelmiError::RequestFailed {
            message: format!(
                "gave up after {} attempts: {}",
                self.retry.max_attempts, last_error
            ),
            status,
        }))
    }
}

impl std::fmt::Debug for RetryingHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingHttpClient")
            .field("base_url", &self.base_url)
            .field("retry", &self.retry)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}
