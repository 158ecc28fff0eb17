//! Exponential backoff for courier calls that failed before reaching the provider.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 3, initial_delay: Duration::from_millis(200), max_delay: Duration::from_secs(5), multiplier: 2.0 }
    }
}

impl RetryConfig {
    pub fn with_attempts(max_attempts: u32) -> Self { Self { max_attempts: max_attempts.max(1), ..Self::default() } }

    pub fn none() -> Self { Self::with_attempts(1) }
}

/// Whether an error may be retried without risk of repeating a side effect.
pub trait IsTransient {
    fn is_transient(&self) -> bool;
}

/// Runs `operation` until it succeeds, fails permanently, or the attempt
/// budget is spent. The last error is returned.
pub async fn retry_on_transient<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display + IsTransient,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;
        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 { tracing::info!(attempt, "operation succeeded after retry"); }
                return Ok(result);
            }
            Err(error) if !error.is_transient() || attempt >= config.max_attempts => return Err(error),
            Err(error) => {
                tracing::warn!(attempt, error = %error, delay_ms = delay.as_millis() as u64, "transient failure, retrying");
                sleep(delay).await;
                delay = Duration::from_millis((delay.as_millis() as f64 * config.multiplier) as u64).min(config.max_delay);
            }
        }
    }
}
