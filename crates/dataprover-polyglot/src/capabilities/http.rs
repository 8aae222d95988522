//! `httpClient`: outbound HTTP for guest code.
//!
//! `options` may carry `headers` (string map), `timeout` in milliseconds and,
//! for `post`/`put`, a `body` that is sent verbatim when it is a string and
//! as JSON otherwise.

use std::time::Duration;

use dataprover_codec::HostValue;
use reqwest::Method;
use reqwest::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use tokio::runtime::Handle;

use super::Args;
use crate::error::{PolyglotError, Result};

/// Request timeout when the caller gives none.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared HTTP client for one execution context.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    allow_network: bool,
}

impl HttpClient {
    pub fn new(allow_network: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("dataprover/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| PolyglotError::capability("httpClient", e))?;
        Ok(Self {
            client,
            allow_network,
        })
    }

    pub(super) fn call(&self, handle: &Handle, method: &str, args: &Args) -> Result<HostValue> {
        let method = match method {
            "get" => Method::GET,
            "post" => Method::POST,
            "put" => Method::PUT,
            _ => Method::DELETE,
        };
        let url = args.text(0)?;
        let options = args.get(1);
        handle.block_on(self.request(method, url, options))
    }

    /// Perform one request and decode the response body.
    ///
    /// Status codes of 400 and above are errors. Bodies that look like JSON
    /// are parsed, an empty body is null, anything else is text.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        options: Option<&HostValue>,
    ) -> Result<HostValue> {
        if !self.allow_network {
            return Err(PolyglotError::SecurityViolation(format!(
                "network access is disabled for this provider ({method} {url})"
            )));
        }
        let parsed = url::Url::parse(url)
            .map_err(|e| PolyglotError::capability("httpClient", format!("invalid URL `{url}`: {e}")))?;

        let timeout = options
            .and_then(|o| o.get("timeout"))
            .and_then(HostValue::as_i64)
            .and_then(|ms| u64::try_from(ms).ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TIMEOUT);

        let mut request = self.client.request(method.clone(), parsed).timeout(timeout);

        if method == Method::POST || method == Method::PUT {
            request = request.header(CONTENT_TYPE, "application/json");
            let body = match options.and_then(|o| o.get("body")) {
                None | Some(HostValue::Null) => String::new(),
                Some(HostValue::Text(s)) => s.clone(),
                Some(other) => other.to_json().to_string(),
            };
            request = request.body(body);
        }

        if let Some(headers) = options.and_then(|o| o.get("headers")).and_then(HostValue::as_map) {
            for (key, value) in headers {
                let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                    PolyglotError::capability("httpClient", format!("invalid header name `{key}`: {e}"))
                })?;
                let text = match value {
                    HostValue::Text(s) => s.clone(),
                    other => other.to_json().to_string(),
                };
                let value = HeaderValue::from_str(&text).map_err(|e| {
                    PolyglotError::capability(
                        "httpClient",
                        format!("invalid header value for `{key}`: {e}"),
                    )
                })?;
                request = request.header(name, value);
            }
        }

        tracing::debug!(%method, url, timeout_ms = timeout.as_millis() as u64, "http request");

        let response = request.send().await.map_err(|e| {
            let reason = if e.is_timeout() {
                format!("{method} {url} timed out after {}ms", timeout.as_millis())
            } else {
                format!("{method} {url} failed: {e}")
            };
            PolyglotError::capability("httpClient", reason)
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PolyglotError::capability("httpClient", format!("reading body: {e}")))?;

        if status.as_u16() >= 400 {
            return Err(PolyglotError::capability(
                "httpClient",
                format!("HTTP error {}: {body}", status.as_u16()),
            ));
        }
        Ok(decode_body(&body))
    }
}

fn decode_body(body: &str) -> HostValue {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return HostValue::Null;
    }
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
            return HostValue::from(json);
        }
    }
    HostValue::Text(body.to_owned())
}
