//! Retry with bounded exponential backoff for transient adapter errors.

use crate::error::{Error, Result};
use log::warn;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (first try included)
    pub max_attempts: u32,
    /// Base delay between attempts
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Cap on the delay between attempts
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Create a config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Fast config for tests (no real sleeping).
    pub fn fast(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::from_millis(1),
            backoff_factor: 1.0,
            max_delay: Duration::from_millis(5),
        }
    }
}

/// Execute an operation, retrying transient errors with exponential backoff.
///
/// Non-retryable errors return immediately. The cancellation flag is checked
/// before every sleep so an operator interrupt is not stuck waiting out a
/// backoff window. Returns the operation's value together with the number of
/// attempts that were made.
pub fn with_retry<T, F>(
    config: &RetryConfig,
    cancel: &AtomicBool,
    mut operation: F,
) -> Result<(T, u32)>
where
    F: FnMut() -> Result<T>,
{
    let mut last_error: Option<Error> = None;

    for attempt in 0..config.max_attempts {
        if cancel.load(Ordering::Relaxed) {
            return Err(Error::Cancelled);
        }

        match operation() {
            Ok(value) => return Ok((value, attempt + 1)),
            Err(e) => {
                if !e.is_retryable() {
                    return Err(e);
                }
                if attempt + 1 >= config.max_attempts {
                    last_error = Some(e);
                    break;
                }

                let delay = config.delay_for_attempt(attempt);
                warn!(
                    "attempt {}/{} failed: {e}; retrying in {:?}",
                    attempt + 1,
                    config.max_attempts,
                    delay
                );
                thread::sleep(delay);
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::Other("retry exhausted".to_string())))
}
