//! HTTP transport with per-request retries.
//!
//! Timeouts (when enabled) and responses whose status is listed in
//! `retry_codes` are retried with exponential backoff; anything else is
//! returned to the caller straight away. Non-2xx responses surviving the
//! retry budget become `TransportError::Status`.

use oagr_core::BackoffPolicy;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::HttpConfig;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request to {url} timed out after {attempts} attempt(s)")]
    Timeout { url: String, attempts: u32 },
    #[error("could not connect to {url}: {message}")]
    Connect { url: String, message: String },
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("undecodable response body: {0}")]
    Decode(String),
    #[error("request failed: {0}")]
    Request(String),
}

/// Shared reqwest client plus the retry rules applied to every request.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    config: HttpConfig,
}

impl HttpTransport {
    pub fn new(config: HttpConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.config.back_off_factor, self.config.max_back_off)
    }

    /// POST `body` as JSON and decode a JSON reply.
    pub async fn post_json<B, R>(&self, url: &str, body: &B) -> Result<R, TransportError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let mut attempt: u32 = 0;
        loop {
            let sent = self
                .client
                .post(url)
                .header(reqwest::header::ACCEPT, "application/json")
                .json(body)
                .send()
                .await;

            // Every path that does not retry returns from inside the match.
            match sent {
                Ok(resp) => {
                    let status = resp.status();
                    let retryable = self.config.retry_codes.contains(&status.as_u16());
                    if !retryable || attempt >= self.config.max_retries {
                        return decode(resp).await;
                    }
                    debug!(url, status = status.as_u16(), attempt, "retryable status");
                }
                Err(e) if e.is_timeout() => {
                    if !self.config.retry_on_timeout || attempt >= self.config.max_retries {
                        return Err(TransportError::Timeout {
                            url: url.to_string(),
                            attempts: attempt + 1,
                        });
                    }
                    debug!(url, attempt, "request timed out");
                }
                Err(e) if e.is_connect() => {
                    return Err(TransportError::Connect {
                        url: url.to_string(),
                        message: e.to_string(),
                    });
                }
                Err(e) => return Err(TransportError::Request(e.to_string())),
            }

            attempt += 1;
            let wait = self.backoff().delay(attempt);
            debug!(url, attempt, wait_secs = wait.as_secs_f64(), "backing off");
            tokio::time::sleep(wait).await;
        }
    }
}

async fn decode<R: DeserializeOwned>(resp: reqwest::Response) -> Result<R, TransportError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(TransportError::Status {
            status: status.as_u16(),
            body,
        });
    }
    resp.json::<R>()
        .await
        .map_err(|e| TransportError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn unreachable_host_is_a_connect_error() {
        let transport = HttpTransport::new(HttpConfig {
            max_retries: 0,
            timeout: Duration::from_secs(2),
            ..HttpConfig::default()
        })
        .unwrap();

        // Port 9 (discard) on loopback is closed in test environments.
        let err = transport
            .post_json::<_, serde_json::Value>("http://127.0.0.1:9/lookup", &["a"])
            .await
            .unwrap_err();
        assert!(
            matches!(err, TransportError::Connect { .. } | TransportError::Request(_)),
            "{err}"
        );
    }

    #[test]
    fn status_error_names_the_code() {
        let err = TransportError::Status {
            status: 503,
            body: "busy".into(),
        };
        assert_eq!(err.to_string(), "HTTP 503: busy");
    }
}
