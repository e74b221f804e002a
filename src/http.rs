//! Shared JSON-over-HTTP client with bounded retry.

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::HttpError;

#[derive(Debug, Clone)]
pub struct JsonClient {
    service: &'static str,
    base_url: String,
    max_attempts: u32,
    client: reqwest::Client,
}

impl JsonClient {
    pub fn new(
        service: &'static str,
        base_url: &str,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self, HttpError> {
        if base_url.trim().is_empty() {
            return Err(HttpError::Config(format!("{service}: base_url is empty")));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HttpError::Config(format!("failed to build http client: {e}")))?;
        Ok(Self {
            service,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_attempts: max_retries.max(1),
            client,
        })
    }

    pub fn join(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            self.base_url.clone()
        } else {
            format!("{}/{path}", self.base_url)
        }
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.client
    }

    pub async fn get_json<T>(&self, op: &'static str, path: &str) -> Result<T, HttpError>
    where
        T: DeserializeOwned,
    {
        let url = self.join(path);
        self.send_with_retry(op, || self.client.get(&url)).await
    }

    /// POST without retrying. For requests that must not be replayed.
    pub async fn post_json_once<T, B>(&self, op: &'static str, path: &str, body: &B) -> Result<T, HttpError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = self.join(path);
        self.send_attempts(op, 1, || self.client.post(&url).json(body))
            .await
    }

    /// Send the request built by `make_req`, retrying connect/timeout
    /// failures, 429 and 5xx responses up to the configured attempt count.
    pub async fn send_with_retry<T, F>(&self, op: &'static str, make_req: F) -> Result<T, HttpError>
    where
        T: DeserializeOwned,
        F: Fn() -> reqwest::RequestBuilder,
    {
        self.send_attempts(op, self.max_attempts, make_req).await
    }

    async fn send_attempts<T, F>(
        &self,
        op: &'static str,
        max_attempts: u32,
        make_req: F,
    ) -> Result<T, HttpError>
    where
        T: DeserializeOwned,
        F: Fn() -> reqwest::RequestBuilder,
    {
        let service = self.service;
        for attempt in 1..=max_attempts {
            debug!(service, operation = op, attempt, "sending request");
            let resp = match make_req().send().await {
                Ok(resp) => resp,
                Err(err) => {
                    warn!(service, operation = op, attempt, error = %err, "request error");
                    if attempt == max_attempts || !is_retryable(&err) {
                        return Err(map_reqwest_error(err));
                    }
                    backoff(op, attempt).await;
                    continue;
                }
            };

            match map_response(service, op, resp).await {
                Ok(parsed) => return Ok(parsed),
                Err(err) => {
                    if attempt < max_attempts && err.is_retryable() {
                        backoff(op, attempt).await;
                        continue;
                    }
                    return Err(err);
                }
            }
        }

        Err(HttpError::Config(
            "retry loop exhausted unexpectedly".to_string(),
        ))
    }
}

async fn map_response<T>(
    service: &'static str,
    op: &'static str,
    resp: reqwest::Response,
) -> Result<T, HttpError>
where
    T: DeserializeOwned,
{
    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| HttpError::Network(format!("{e}")))?;
    if !status.is_success() {
        warn!(service, operation = op, status = status.as_u16(), body = %body, "non-success status");
        return Err(HttpError::HttpStatus {
            status: status.as_u16(),
            body,
        });
    }
    serde_json::from_str(&body)
        .map_err(|e| HttpError::Decode(format!("{op}: {e}")))
        .inspect(|_parsed| {
            info!(service, operation = op, "response decoded");
        })
}

fn is_retryable(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

fn map_reqwest_error(err: reqwest::Error) -> HttpError {
    if err.is_body() || err.is_decode() {
        return HttpError::Decode(err.to_string());
    }
    HttpError::Network(err.to_string())
}

async fn backoff(op: &str, attempt: u32) {
    let delay_ms = backoff_delay_ms(attempt);
    warn!(operation = op, attempt, delay_ms, "retrying after backoff");
    sleep(Duration::from_millis(delay_ms)).await;
}

fn backoff_delay_ms(attempt: u32) -> u64 {
    // Exponential, capped at 2s, no jitter.
    let exp = attempt.saturating_sub(1);
    let base = 100u64.saturating_mul(2u64.saturating_pow(exp));
    base.min(2_000)
}
