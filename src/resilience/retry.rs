use std::future::Future;

use crate::config::RetryConfig;

/// Run `operation` until it succeeds or the attempt budget is spent
///
/// Delays between attempts follow the configured backoff. The last error is
/// returned when every attempt fails.
pub async fn retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = config.attempts().max(1);
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= attempts => return Err(err),
            Err(err) => {
                let delay = config.delay_for(attempt);
                tracing::debug!(
                    attempt,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying after failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
