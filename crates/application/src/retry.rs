//! Caller-side retry for optimistic concurrency conflicts.

use std::future::Future;

use crate::error::DispatchError;

/// Runs `attempt` until it succeeds, fails with anything other than a
/// concurrency conflict, or `max_attempts` runs are used up.
///
/// The dispatcher itself never retries. Each attempt must build its command
/// again so the aggregate is reloaded at its latest version.
pub async fn retry_on_conflict<T, F, Fut>(
    max_attempts: u32,
    mut attempt: F,
) -> Result<T, DispatchError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, DispatchError>>,
{
    let max_attempts = max_attempts.max(1);
    let mut n = 1;
    loop {
        match attempt(n).await {
            Err(e) if e.is_conflict() && n < max_attempts => {
                tracing::debug!(attempt = n, error = %e, "retrying after concurrency conflict");
                n += 1;
                tokio::task::yield_now().await;
            }
            other => return other,
        }
    }
}
