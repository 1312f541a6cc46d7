//! HTTP transport abstraction
//!
//! The identity and metering clients talk to the network only through
//! [`HttpTransport`], so retry and re-authentication policy can be driven by
//! a scripted transport in tests.

use crate::error::Result;
use serde_json::Value;
use std::time::Duration;

/// Raw HTTP response: status code and undecoded body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new<S: Into<String>>(status: u16, body: S) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body as JSON
    pub fn json(&self) -> Result<Value> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Minimal HTTP surface used by the clients.
///
/// Implementations return `Err` only for transport-level failures (timeout,
/// connection reset, TLS); any received response, whatever its status, is `Ok`.
#[async_trait::async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(
        &self,
        url: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse>;

    async fn post(&self, url: &str, headers: &[(&str, &str)], body: String)
    -> Result<HttpResponse>;
}

/// Production transport backed by `reqwest`
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("helmi/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(
        &self,
        url: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse> {
        let mut request = self.client.get(url).query(query);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpResponse { status, body })
    }

    async fn post(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: String,
    ) -> Result<HttpResponse> {
        let mut request = self.client.post(url).body(body);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpResponse { status, body })
    }
}

impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestTransport").finish_non_exhaustive()
    }
}

/// Pull a readable message out of an error body, falling back to the status
pub(crate) fn error_summary(response: &HttpResponse) -> String {
    let detail = serde_json::from_str::<Value>(&response.body).ok().and_then(|v| {
        v.get("message")
            .or_else(|| v.get("Message"))
            .or_else(|| v.get("__type"))
            .and_then(Value::as_str)
            .map(str::to_string)
    });
    match detail {
        Some(detail) => format!("HTTP {}: {}", response.status, detail),
        None => format!("HTTP {}", response.status),
    }
}
