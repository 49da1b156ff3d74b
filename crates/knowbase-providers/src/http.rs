//! Shared HTTP plumbing for the remote providers.

use knowbase_core::error::{KnowbaseError, Result};
use knowbase_core::retry::{retry, RetryPolicy};
use serde_json::Value;
use std::time::Duration;

/// Client with the configured per-request timeout.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("Knowbase/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| KnowbaseError::Config(format!("Failed to build HTTP client: {e}")))
}

fn map_send_error(what: &str, e: reqwest::Error) -> KnowbaseError {
    if e.is_builder() {
        KnowbaseError::Config(format!("{what}: invalid request: {e}"))
    } else {
        KnowbaseError::Transient(format!("{what}: {e}"))
    }
}

/// Send once. Non-2xx statuses become errors via `KnowbaseError::from_status`.
pub async fn send_once(what: &str, req: reqwest::RequestBuilder) -> Result<reqwest::Response> {
    let resp = req.send().await.map_err(|e| map_send_error(what, e))?;
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(KnowbaseError::from_status(status.as_u16(), what, &body))
}

/// Send with retry. `build` is called again for every attempt.
pub async fn send_with_retry<F>(
    policy: &RetryPolicy,
    what: &str,
    build: F,
) -> Result<reqwest::Response>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    retry(policy, what, |_| send_once(what, build())).await
}

/// Send once, handing non-retryable failure statuses (4xx other than 408
/// and 429) back to the caller instead of turning them into errors.
pub async fn send_once_lenient(what: &str, req: reqwest::RequestBuilder) -> Result<reqwest::Response> {
    let resp = req.send().await.map_err(|e| map_send_error(what, e))?;
    let status = resp.status();
    if status.is_success() || !KnowbaseError::from_status(status.as_u16(), what, "").is_retryable() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(KnowbaseError::from_status(status.as_u16(), what, &body))
}

/// `send_with_retry` that returns client-error responses as-is.
pub async fn send_lenient<F>(
    policy: &RetryPolicy,
    what: &str,
    build: F,
) -> Result<reqwest::Response>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    retry(policy, what, |_| send_once_lenient(what, build())).await
}

/// Decode a response body as JSON. An empty body decodes to `Value::Null`.
pub async fn read_json(what: &str, resp: reqwest::Response) -> Result<Value> {
    let text = resp
        .text()
        .await
        .map_err(|e| KnowbaseError::Transient(format!("{what}: failed to read body: {e}")))?;
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text)
        .map_err(|e| KnowbaseError::Data(format!("{what}: response is not JSON: {e}")))
}

/// `send_with_retry` followed by `read_json`.
pub async fn send_json<F>(policy: &RetryPolicy, what: &str, build: F) -> Result<Value>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let resp = send_with_retry(policy, what, build).await?;
    read_json(what, resp).await
}
