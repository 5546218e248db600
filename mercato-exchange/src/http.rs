use std::time::Duration;

use mercato_core::{PluginError, RetryPolicy, retry_transient};
use serde_json::Value;

/// Thin wrapper over a pooled `reqwest` client with uniform error mapping.
///
/// One instance per plugin; the underlying connection pool is reused across
/// calls. Authentication failures (401/403), rate limiting (418/429), and
/// transport errors map onto the shared taxonomy so callers can apply the
/// uniform retry policy.
pub(crate) struct RestClient {
    http: reqwest::Client,
    provider: String,
    retry: RetryPolicy,
}

pub(crate) enum Method {
    Get,
    Post,
    Delete,
}

impl RestClient {
    pub(crate) fn new(provider: &str, timeout: Duration) -> Result<Self, PluginError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PluginError::venue_with(provider, "failed to build http client", e))?;
        Ok(Self {
            http,
            provider: provider.to_string(),
            retry: RetryPolicy::default(),
        })
    }

    /// GET with retries on transient failures.
    pub(crate) async fn get_json(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<Value, PluginError> {
        retry_transient(self.retry, || self.send(Method::Get, url, query, &[])).await
    }

    /// Single-shot request with extra headers; used for signed endpoints
    /// where retrying would reuse a stale timestamp.
    pub(crate) async fn send(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, String)],
        headers: &[(&str, &str)],
    ) -> Result<Value, PluginError> {
        let mut req = match method {
            Method::Get => self.http.get(url),
            Method::Post => self.http.post(url),
            Method::Delete => self.http.delete(url),
        };
        if !query.is_empty() {
            req = req.query(query);
        }
        for (name, value) in headers {
            req = req.header(*name, *value);
        }

        let response = req.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(e))?;

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(PluginError::auth(
                &self.provider,
                format!("http {status}: {}", snippet(&body)),
            ));
        }
        if status.as_u16() == 418 || status.as_u16() == 429 {
            return Err(PluginError::network(
                &self.provider,
                format!("rate limited (http {status})"),
            ));
        }
        if !status.is_success() {
            return Err(PluginError::venue(
                &self.provider,
                format!("http {status}: {}", snippet(&body)),
            ));
        }
        serde_json::from_str(&body).map_err(|e| {
            PluginError::venue_with(&self.provider, "malformed json response", e)
        })
    }

    fn transport_error(&self, err: reqwest::Error) -> PluginError {
        let what = if err.is_timeout() {
            "request timed out"
        } else if err.is_connect() {
            "connection failed"
        } else {
            "transport failure"
        };
        PluginError::network_with(&self.provider, what, err)
    }
}

/// Trim an error body for inclusion in messages.
pub(crate) fn snippet(body: &str) -> String {
    const MAX: usize = 160;
    let trimmed = body.trim();
    if trimmed.len() <= MAX {
        trimmed.to_string()
    } else {
        let mut end = MAX;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &trimmed[..end])
    }
}

/// Pull an f64 out of a JSON value that may be a number or a numeric string.
pub(crate) fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Parse venue `[["price","qty"], ...]` level arrays.
pub(crate) fn parse_levels(value: Option<&Value>) -> Vec<(f64, f64)> {
    value
        .and_then(Value::as_array)
        .map(|levels| {
            levels
                .iter()
                .filter_map(|level| {
                    let pair = level.as_array()?;
                    Some((as_f64(pair.first()?)?, as_f64(pair.get(1)?)?))
                })
                .collect()
        })
        .unwrap_or_default()
}
