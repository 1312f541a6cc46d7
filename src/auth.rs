//! Cognito password login and token lifetime
//!
//! The session starts logged out and logs in lazily on the first token
//! request. Token expiry is never checked ahead of time: the client reacts
//! to a 401 by calling [`AuthSession::login`] again.

use crate::config::Config;
use crate::error::{HelmiError, Result};
use crate::http::{HttpTransport, error_summary};
use crate::logging::{StructuredLogger, get_logger};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

const AMZ_JSON: &str = "application/x-amz-json-1.1";
const TARGET_INITIATE_AUTH: &str = "AWSCognitoIdentityProviderService.InitiateAuth";
const TARGET_GET_USER: &str = "AWSCognitoIdentityProviderService.GetUser";

/// Tokens issued by a successful login
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthTokens {
    pub access_token: String,
    pub id_token: Option<String>,
    pub refresh_token: Option<String>,
    /// Lifetime in seconds as reported at login; informational only
    pub expires_in: u64,
}

#[derive(Debug, Clone, Default)]
enum SessionState {
    #[default]
    LoggedOut,
    LoggedIn(AuthTokens),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InitiateAuthResponse {
    authentication_result: Option<AuthenticationResult>,
    challenge_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AuthenticationResult {
    access_token: Option<String>,
    id_token: Option<String>,
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetUserResponse {
    #[serde(default)]
    user_attributes: Vec<UserAttribute>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UserAttribute {
    name: String,
    value: Option<String>,
}

/// Login state for one account
pub struct AuthSession {
    transport: Arc<dyn HttpTransport>,
    endpoint: String,
    client_id: String,
    email: String,
    password: String,
    state: SessionState,
    logger: StructuredLogger,
}

impl AuthSession {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        endpoint: impl Into<String>,
        client_id: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            endpoint: endpoint.into(),
            client_id: client_id.into(),
            email: email.into(),
            password: password.into(),
            state: SessionState::LoggedOut,
            logger: get_logger("auth"),
        }
    }

    pub fn from_config(transport: Arc<dyn HttpTransport>, config: &Config) -> Self {
        Self::new(
            transport,
            config.api.identity_endpoint.clone(),
            config.api.identity_client_id.clone(),
            config.account.email.clone(),
            config.account.password.clone(),
        )
    }

    pub fn is_logged_in(&self) -> bool {
        matches!(self.state, SessionState::LoggedIn(_))
    }

    /// Tokens from the last successful login
    pub fn tokens(&self) -> Option<&AuthTokens> {
        match &self.state {
            SessionState::LoggedIn(tokens) => Some(tokens),
            SessionState::LoggedOut => None,
        }
    }

    /// Exchange the credentials for fresh tokens, replacing any held ones.
    ///
    /// On failure the session is left logged out.
    pub async fn login(&mut self) -> Result<&AuthTokens> {
        self.state = SessionState::LoggedOut;
        self.logger.debug("Logging in with password auth");

        let payload = json!({
            "AuthFlow": "USER_PASSWORD_AUTH",
            "ClientId": self.client_id,
            "AuthParameters": {
                "USERNAME": self.email,
                "PASSWORD": self.password,
            },
        });
        let response: InitiateAuthResponse =
            serde_json::from_value(self.cognito_call(TARGET_INITIATE_AUTH, payload).await?)
                .map_err(|e| HelmiError::auth(format!("Unexpected login response: {e}")))?;

        let result = match (response.authentication_result, response.challenge_name) {
            (Some(result), _) => result,
            (None, Some(challenge)) => {
                return Err(HelmiError::auth(format!(
                    "Login requires unsupported challenge {challenge}"
                )));
            }
            (None, None) => {
                return Err(HelmiError::auth("Login returned no AuthenticationResult"));
            }
        };
        let access_token = result
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| HelmiError::auth("Login returned no AccessToken"))?;

        self.logger.info(&format!(
            "Logged in, token valid for {}s",
            result.expires_in
        ));
        self.state = SessionState::LoggedIn(AuthTokens {
            access_token,
            id_token: result.id_token,
            refresh_token: result.refresh_token,
            expires_in: result.expires_in,
        });
        self.tokens()
            .ok_or_else(|| HelmiError::auth("Session lost its tokens"))
    }

    /// Access token, logging in first if needed
    pub async fn current_token(&mut self) -> Result<String> {
        if let SessionState::LoggedIn(tokens) = &self.state {
            return Ok(tokens.access_token.clone());
        }
        Ok(self.login().await?.access_token.clone())
    }

    /// Stable account subject (`sub` attribute) for the logged-in user
    pub async fn user_sub(&mut self) -> Result<String> {
        let access_token = self.current_token().await?;
        let response: GetUserResponse = serde_json::from_value(
            self.cognito_call(TARGET_GET_USER, json!({ "AccessToken": access_token }))
                .await?,
        )
        .map_err(|e| HelmiError::auth(format!("Unexpected user response: {e}")))?;

        response
            .user_attributes
            .into_iter()
            .find(|attr| attr.name == "sub")
            .and_then(|attr| attr.value)
            .filter(|sub| !sub.is_empty())
            .ok_or_else(|| HelmiError::auth("Could not resolve user sub"))
    }

    async fn cognito_call(
        &self,
        target: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let headers = [("Content-Type", AMZ_JSON), ("X-Amz-Target", target)];
        let response = self
            .transport
            .post(&self.endpoint, &headers, payload.to_string())
            .await?;

        if !response.is_success() {
            let summary = error_summary(&response);
            self.logger.warn(&format!("Identity call rejected: {summary}"));
            // Throttling and outages are transient; anything else is a credential problem
            if crate::error::is_retryable_status(response.status) {
                return Err(HelmiError::request_status(response.status, summary));
            }
            return Err(HelmiError::auth(summary));
        }

        response
            .json()
            .map_err(|e| HelmiError::auth(format!("Malformed identity response: {e}")))
    }
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("endpoint", &self.endpoint)
            .field("email", &self.email)
            .field("logged_in", &self.is_logged_in())
            .finish_non_exhaustive()
    }
}
