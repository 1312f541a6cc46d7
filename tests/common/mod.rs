#![allow(dead_code)]

use helmi::http::{HttpResponse, HttpTransport};
use helmi::{AuthSession, HelmiError, Result, RetryPolicy, RetryingHttpClient};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

pub const IDENTITY_URL: &str = "https://identity.test/";
pub const API_BASE: &str = "https://api.test";

pub enum Reply {
    Status(u16, String),
    NetworkError,
}

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: &'static str,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub at: Instant,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Replays queued replies: POSTs from the identity queue, GETs from the
/// API queue. Running out of replies panics the test.
#[derive(Default)]
pub struct ScriptedTransport {
    identity: Mutex<VecDeque<Reply>>,
    api: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<Recorded>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_identity(&self, status: u16, body: impl Into<String>) {
        self.identity
            .lock()
            .unwrap()
            .push_back(Reply::Status(status, body.into()));
    }

    pub fn push_login(&self, access_token: &str) {
        self.push_identity(
            200,
            json!({
                "AuthenticationResult": {
                    "AccessToken": access_token,
                    "IdToken": "id-token",
                    "RefreshToken": "refresh-token",
                    "ExpiresIn": 3600,
                    "TokenType": "Bearer"
                },
                "ChallengeParameters": {}
            })
            .to_string(),
        );
    }

    pub fn push_user(&self, sub: &str) {
        self.push_identity(
            200,
            json!({
                "Username": sub,
                "UserAttributes": [
                    {"Name": "email", "Value": "user@example.com"},
                    {"Name": "sub", "Value": sub}
                ]
            })
            .to_string(),
        );
    }

    pub fn push_api(&self, status: u16, body: impl Into<String>) {
        self.api
            .lock()
            .unwrap()
            .push_back(Reply::Status(status, body.into()));
    }

    pub fn push_api_network_error(&self) {
        self.api.lock().unwrap().push_back(Reply::NetworkError);
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn api_requests(&self) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == "GET")
            .collect()
    }

    pub fn logins(&self) -> usize {
        self.requests()
            .iter()
            .filter(|r| {
                r.header("X-Amz-Target") == Some("AWSCognitoIdentityProviderService.InitiateAuth")
            })
            .count()
    }

    fn record(
        &self,
        method: &'static str,
        url: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
        body: String,
    ) {
        let owned = |pairs: &[(&str, &str)]| -> Vec<(String, String)> {
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect()
        };
        self.requests.lock().unwrap().push(Recorded {
            method,
            url: url.to_string(),
            query: owned(query),
            headers: owned(headers),
            body,
            at: Instant::now(),
        });
    }

    fn answer(queue: &Mutex<VecDeque<Reply>>, method: &str, url: &str) -> Result<HttpResponse> {
        let reply = queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected {method} {url}"));
        match reply {
            Reply::Status(status, body) => Ok(HttpResponse::new(status, body)),
            Reply::NetworkError => Err(HelmiError::request("connection reset by peer")),
        }
    }
}

#[async_trait::async_trait]
impl HttpTransport for ScriptedTransport {
    async fn get(
        &self,
        url: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse> {
        self.record("GET", url, query, headers, String::new());
        Self::answer(&self.api, "GET", url)
    }

    async fn post(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: String,
    ) -> Result<HttpResponse> {
        self.record("POST", url, &[], headers, body);
        Self::answer(&self.identity, "POST", url)
    }
}

pub fn client(transport: &Arc<ScriptedTransport>) -> RetryingHttpClient {
    let transport: Arc<dyn HttpTransport> = transport.clone();
    let session = AuthSession::new(
        Arc::clone(&transport),
        IDENTITY_URL,
        "test-client",
        "user@example.com",
        "pw",
    );
    RetryingHttpClient::new(
        transport,
        session,
        API_BASE,
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        },
    )
}

/// Consumption payload with one series of kWh points
pub fn consumption_body(points: &[(&str, Option<f64>)]) -> String {
    let data: Vec<_> = points
        .iter()
        .map(|(start, value)| {
            json!({
                "startTime": start,
                "value": value,
                "type": "kWh",
                "status": 150
            })
        })
        .collect();
    json!({"data": {"productSeries": [{"typeId": "KWH Usage", "data": data}]}}).to_string()
}
