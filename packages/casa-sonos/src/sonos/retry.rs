//! Retry for transient SOAP errors.

use std::future::Future;
use std::time::Duration;

use super::soap::{SoapError, SoapResult};

/// Backoff before each retry.
const RETRY_DELAYS_MS: [u64; 3] = [200, 500, 1000];

/// Runs `operation`, retrying transient faults (701, 714, 716) and timeouts
/// with backoff (200ms, 500ms, 1000ms).
pub(crate) async fn with_retry<F, Fut>(action: &str, mut operation: F) -> SoapResult<String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SoapResult<String>>,
{
    let mut last_error: Option<SoapError> = None;
    for (attempt, &delay_ms) in std::iter::once(&0)
        .chain(RETRY_DELAYS_MS.iter())
        .enumerate()
    {
        if attempt > 0 {
            log::info!(
                "[SOAP] Retrying {} (attempt {}/{}) after {}ms",
                action,
                attempt + 1,
                RETRY_DELAYS_MS.len() + 1,
                delay_ms
            );
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        match operation().await {
            Ok(r) => return Ok(r),
            Err(e) if e.is_transient() => {
                log::warn!("[SOAP] {} transient error: {}", action, e);
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error.unwrap_or_else(|| SoapError::Fault(format!("{action}: retries exhausted"))))
}
