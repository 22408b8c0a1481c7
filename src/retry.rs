//! Exponential backoff with jitter.
//!
//! [`retry_with_backoff`] drives the connect loop of
//! [`ConnectionManager`](crate::ConnectionManager), both for the initial
//! `start()` and for re-dialing after a dropped connection.
//!
//! # Retry Strategy
//!
//! - Only retries errors for which [`RpcError::is_retryable`] is true
//! - Uses exponential backoff with randomized jitter to prevent thundering herd
//! - Caps delay at `max_delay` to prevent excessive wait times
//! - Logs each retry attempt with timing information for debugging

use std::collections::hash_map::RandomState;
use std::future::Future;
use std::hash::BuildHasher;
use std::time::Duration;
use tokio::time::sleep;

use crate::{log_debug, RetryConfig, RpcError};

impl RpcError {
    /// True for failures a fresh connection attempt may cure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RpcError::Transport(_) | RpcError::ConnectionLost(_))
    }
}

/// Retry an async operation with exponential backoff.
///
/// If `retry_config` is `None`, the operation executes exactly once.
/// Non-retryable errors are returned immediately, which is how callers abort
/// a loop early (for example when the connection was stopped meanwhile).
///
/// # Backoff Algorithm
///
/// - First retry: `initial_delay` (with jitter)
/// - Subsequent retries: `min(current_delay * multiplier, max_delay)` (with jitter)
/// - Jitter: ±25% randomization to prevent synchronized retries
pub(crate) async fn retry_with_backoff<F, Fut, T>(
    retry_config: Option<&RetryConfig>,
    mut operation: F,
) -> crate::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = crate::Result<T>>,
{
    let Some(retry_config) = retry_config else {
        return operation().await;
    };

    let mut attempt = 0;
    let mut current_delay = retry_config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) if err.is_retryable() => {
                attempt += 1;

                if attempt > retry_config.max_attempts {
                    log_debug!(
                        "retry exhausted after {} attempts, last error: {}",
                        retry_config.max_attempts,
                        err
                    );
                    return Err(err);
                }

                let jittered_delay = apply_jitter(current_delay);

                log_debug!(
                    "retry attempt {}/{}, waiting {:?} before retry (error: {})",
                    attempt,
                    retry_config.max_attempts,
                    jittered_delay,
                    err
                );

                sleep(jittered_delay).await;

                let next_delay = Duration::from_secs_f64(
                    current_delay.as_secs_f64() * retry_config.multiplier as f64,
                );
                current_delay = next_delay.min(retry_config.max_delay);
            }
            Err(err) => return Err(err),
        }
    }
}

/// Apply ±25% jitter to a duration.
///
/// Uses a simple multiplicative jitter: `delay * (0.75 + random(0.0..0.5))`
fn apply_jitter(delay: Duration) -> Duration {
    // ---
    let random_state = RandomState::new();
    let hash = random_state.hash_one(std::time::SystemTime::now());

    let random_factor = (hash % 1000) as f64 / 1000.0;
    let jitter_multiplier = 0.75 + (random_factor * 0.5);

    Duration::from_secs_f64(delay.as_secs_f64() * jitter_multiplier)
}
