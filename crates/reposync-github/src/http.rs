use reposync_core::provider::{SourceError, SourceErrorKind};
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use reqwest::{RequestBuilder, Response};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;

const MAX_ATTEMPTS: u32 = 3;
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Sends the request built by `build`, retrying rate-limit and unavailable
/// responses. Non-success statuses come back as [`SourceError`].
pub(crate) async fn send_with_retry<F>(mut build: F) -> Result<Response, SourceError>
where
    F: FnMut() -> RequestBuilder,
{
    let mut attempt = 1;
    loop {
        let response = build().send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if is_retryable(status) && attempt < MAX_ATTEMPTS {
            let delay = retry_delay_from_headers(response.headers())
                .unwrap_or(Duration::from_secs(1))
                .min(MAX_RETRY_DELAY);
            warn!(status = status.as_u16(), attempt, delay_s = delay.as_secs(), "GitHub throttled request; retrying");
            let _ = response.bytes().await;
            tokio::time::sleep(delay).await;
            attempt += 1;
            continue;
        }
        let body = response.text().await.unwrap_or_default();
        return Err(status_error(status, &body));
    }
}

pub(crate) fn status_error(status: StatusCode, body: &str) -> SourceError {
    let detail = api_message(body).unwrap_or_else(|| status.to_string());
    let (kind, message) = match status {
        StatusCode::UNAUTHORIZED => (
            SourceErrorKind::Auth,
            format!("GitHub authentication failed: {detail}"),
        ),
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => (
            SourceErrorKind::RateLimited,
            format!("GitHub denied the request (rate limit or permissions): {detail}"),
        ),
        StatusCode::NOT_FOUND => (
            SourceErrorKind::NotFound,
            format!("GitHub resource not found: {detail}"),
        ),
        StatusCode::SERVICE_UNAVAILABLE => (
            SourceErrorKind::Network,
            format!("GitHub unavailable: {detail}"),
        ),
        _ => (
            SourceErrorKind::Other,
            format!("GitHub request failed: {detail}"),
        ),
    };
    SourceError::new(kind, message).with_status(status.as_u16())
}

pub(crate) fn transport_error(err: reqwest::Error) -> SourceError {
    let kind = if err.is_decode() {
        SourceErrorKind::Decode
    } else if err.is_timeout() || err.is_connect() || err.is_request() {
        SourceErrorKind::Network
    } else {
        SourceErrorKind::Other
    };
    let mut error = SourceError::new(kind, format!("GitHub request error: {err}"));
    if let Some(status) = err.status() {
        error = error.with_status(status.as_u16());
    }
    error
}

fn api_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("message")
        .and_then(|message| message.as_str())
        .map(ToString::to_string)
}

fn is_retryable(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE
    )
}

fn retry_delay_from_headers(headers: &HeaderMap) -> Option<Duration> {
    retry_after_seconds(headers)
        .or_else(|| ratelimit_reset_seconds(headers))
        .map(Duration::from_secs)
}

fn retry_after_seconds(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
}

fn ratelimit_reset_seconds(headers: &HeaderMap) -> Option<u64> {
    let reset = headers
        .get("x-ratelimit-reset")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())?;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    reset.checked_sub(now).filter(|delay| *delay > 0)
}
