use std::future::Future;
use std::time::Duration;

use crate::error::LlmError;
use crate::provider::StatusTx;

const BASE_BACKOFF_SECS: u64 = 1;
const MAX_BACKOFF_SECS: u64 = 60;

/// Seconds from a `Retry-After` header, else exponential backoff capped at one minute.
pub(crate) fn retry_delay(response: &reqwest::Response, attempt: u32) -> Duration {
    if let Some(val) = response.headers().get(reqwest::header::RETRY_AFTER)
        && let Ok(s) = val.to_str()
        && let Ok(secs) = s.trim().parse::<u64>()
    {
        return Duration::from_secs(secs.min(MAX_BACKOFF_SECS));
    }
    backoff(attempt)
}

fn backoff(attempt: u32) -> Duration {
    let secs = BASE_BACKOFF_SECS
        .checked_shl(attempt)
        .unwrap_or(MAX_BACKOFF_SECS)
        .min(MAX_BACKOFF_SECS);
    Duration::from_secs(secs)
}

/// Send an HTTP request, retrying up to `max_retries` times on 429 responses.
///
/// On each rate-limited attempt, emits a status message and waits before retrying.
/// Returns the first non-429 `Response` for the caller to inspect.
///
/// # Errors
///
/// Returns `LlmError::RateLimited` once all attempts are exhausted, `LlmError::Timeout`
/// when the request times out, or `LlmError::Http` for other transport failures.
pub(crate) async fn send_with_retry<F, Fut>(
    provider_name: &str,
    max_retries: u32,
    status_tx: Option<&StatusTx>,
    mut f: F,
) -> Result<reqwest::Response, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    for attempt in 0..=max_retries {
        let response = f().await.map_err(LlmError::from_transport)?;

        if response.status() != reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Ok(response);
        }
        if attempt == max_retries {
            break;
        }

        let delay = retry_delay(&response, attempt);
        let msg = format!(
            "{provider_name} rate limited, retrying in {}s ({}/{max_retries})",
            delay.as_secs(),
            attempt + 1,
        );
        if let Some(tx) = status_tx {
            let _ = tx.send(msg.clone());
        }
        tracing::warn!("{msg}");
        tokio::time::sleep(delay).await;
    }

    Err(LlmError::RateLimited)
}
