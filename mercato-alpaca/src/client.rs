use std::time::Duration;

use chrono::{DateTime, Utc};
use mercato_core::plugin::Credentials;
use mercato_core::{PluginError, RetryPolicy, retry_transient};
use serde_json::Value;

/// HTTP client for the venue's data and broker APIs. Credentials ride as
/// headers on every call; the venue has no unauthenticated surface.
pub(crate) struct AlpacaClient {
    http: reqwest::Client,
    credentials: Option<Credentials>,
    retry: RetryPolicy,
    provider: String,
}

impl AlpacaClient {
    pub(crate) fn new(
        provider: &str,
        credentials: Option<Credentials>,
        timeout: Duration,
    ) -> Result<Self, PluginError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PluginError::venue_with(provider, "failed to build http client", e))?;
        Ok(Self {
            http,
            credentials,
            retry: RetryPolicy::default(),
            provider: provider.to_string(),
        })
    }

    pub(crate) fn provider(&self) -> &str {
        &self.provider
    }

    fn auth_headers(&self) -> Result<(&str, &str), PluginError> {
        self.credentials
            .as_ref()
            .map(|c| (c.api_key.as_str(), c.api_secret.as_str()))
            .ok_or_else(|| PluginError::auth(&self.provider, "credentials required"))
    }

    pub(crate) async fn get_json(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<Value, PluginError> {
        retry_transient(self.retry, || self.request(reqwest::Method::GET, url, query, None))
            .await
    }

    pub(crate) async fn post_json(&self, url: &str, body: Value) -> Result<Value, PluginError> {
        self.request(reqwest::Method::POST, url, &[], Some(body))
            .await
    }

    pub(crate) async fn delete(&self, url: &str) -> Result<(), PluginError> {
        self.request(reqwest::Method::DELETE, url, &[], None)
            .await
            .map(|_| ())
    }

    async fn request(
        &self,
        method: reqwest::Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<Value, PluginError> {
        let (key, secret) = self.auth_headers()?;
        let mut req = self
            .http
            .request(method, url)
            .header("APCA-API-KEY-ID", key)
            .header("APCA-API-SECRET-KEY", secret);
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }

        let response = req.send().await.map_err(|e| {
            let what = if e.is_timeout() {
                "request timed out"
            } else if e.is_connect() {
                "connection failed"
            } else {
                "transport failure"
            };
            PluginError::network_with(&self.provider, what, e)
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            PluginError::network_with(&self.provider, "failed reading response body", e)
        })?;

        match status.as_u16() {
            401 | 403 => Err(PluginError::auth(
                &self.provider,
                format!("http {status}: {}", truncate(&body)),
            )),
            429 => Err(PluginError::network(
                &self.provider,
                format!("rate limited (http {status})"),
            )),
            s if !status.is_success() => Err(PluginError::venue(
                &self.provider,
                format!("http {s}: {}", truncate(&body)),
            )),
            _ if body.is_empty() => Ok(Value::Null),
            _ => serde_json::from_str(&body).map_err(|e| {
                PluginError::venue_with(&self.provider, "malformed json response", e)
            }),
        }
    }
}

fn truncate(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= 160 {
        trimmed.to_string()
    } else {
        let mut end = 160;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &trimmed[..end])
    }
}

/// Millisecond epoch -> RFC 3339, the venue's timestamp format.
pub(crate) fn ms_to_rfc3339(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .unwrap_or_default()
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// RFC 3339 -> millisecond epoch.
pub(crate) fn rfc3339_to_ms(raw: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).timestamp_millis())
}

/// Pull an f64 out of a number or numeric string.
pub(crate) fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
