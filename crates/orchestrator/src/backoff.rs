//! Retrying backend calls and store writes with bounded exponential
//! backoff.

use std::future::Future;

use ccf_backend::BackendError;
use ccf_core::retry::RetryPolicy;

/// Run `call` until it succeeds, fails permanently, or `policy` runs out
/// of attempts.
///
/// Only [`BackendError::is_transient`] failures are retried. Returns the
/// last error together with the number of attempts made.
pub async fn retry_backend<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    job_id: &str,
    mut call: F,
) -> Result<T, (BackendError, u32)>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && policy.should_retry(attempt) => {
                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    job_id,
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Backend call failed, retrying",
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err((e, attempt)),
        }
    }
}

/// Wait out the delay after attempt `attempt` (1-based) of a
/// read-modify-write lost a version race. The final attempt does not wait.
pub(crate) async fn pause_after_conflict(policy: &RetryPolicy, attempt: u32) {
    if policy.should_retry(attempt) {
        tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
    }
}
