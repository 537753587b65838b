//! HTTP transport used by every fetcher.
//!
//! [`HttpTransport`] is the seam between the pipeline and the network. The
//! production implementation wraps a single `reqwest::Client`; tests script
//! responses with `FakeTransport`.

use crate::error::{IngestError, Result};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// Browser-like User-Agent; several news sites reject unknown agents.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Timeout for feed and article page requests.
pub const PAGE_TIMEOUT: Duration = Duration::from_secs(20);

/// Timeout for search and LLM API requests.
pub const API_TIMEOUT: Duration = Duration::from_secs(30);

/// A fully read HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Turn a non-2xx response into a [`IngestError::Fetch`].
    pub fn error_for_status(self, url: &str) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(IngestError::Fetch(format!("HTTP {} from {url}", self.status)))
        }
    }
}

/// Blocking-in-spirit request/response transport.
///
/// Redirects are followed and certificates verified by implementations.
/// Transport-level failures are reported as [`IngestError::Fetch`]; non-2xx
/// statuses are returned as responses so callers can decide.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<HttpResponse>;

    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
        headers: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<HttpResponse>;
}

/// [`HttpTransport`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let mut default_headers = reqwest::header::HeaderMap::new();
        default_headers.insert(
            reqwest::header::CONNECTION,
            reqwest::header::HeaderValue::from_static("keep-alive"),
        );
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(default_headers)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self { client })
    }

    async fn read(response: reqwest::Response) -> Result<HttpResponse> {
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    String::from_utf8_lossy(v.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response.text().await?;
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    #[instrument(level = "debug", skip_all, fields(%url))]
    async fn get(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<HttpResponse> {
        let t0 = Instant::now();
        let mut request = self.client.get(url).timeout(timeout);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = request.send().await.map_err(|e| {
            warn!(elapsed_ms = t0.elapsed().as_millis() as u64, error = %e, "GET failed");
            IngestError::Fetch(format!("GET {url}: {e}"))
        })?;
        let response = Self::read(response).await?;
        debug!(
            status = response.status,
            bytes = response.body.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "GET completed"
        );
        Ok(response)
    }

    #[instrument(level = "debug", skip_all, fields(%url))]
    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
        headers: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<HttpResponse> {
        let t0 = Instant::now();
        let mut request = self
            .client
            .post(url)
            .timeout(timeout)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_string(body)?);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = request.send().await.map_err(|e| {
            warn!(elapsed_ms = t0.elapsed().as_millis() as u64, error = %e, "POST failed");
            IngestError::Fetch(format!("POST {url}: {e}"))
        })?;
        let response = Self::read(response).await?;
        debug!(
            status = response.status,
            bytes = response.body.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "POST completed"
        );
        Ok(response)
    }
}
