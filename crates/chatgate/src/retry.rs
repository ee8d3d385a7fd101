//! Bounded retry around a single provider call
//!
//! Every attempt runs the whole provider call again. Errors are split into retryable and
//! terminal by [`ProviderError::is_retryable`]; a terminal error ends the loop at once.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::errors::ProviderError;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Error, Debug)]
#[error("provider call failed after {attempts} attempt(s): {last_error}")]
pub struct RetryError {
    pub attempts: u32,
    #[source]
    pub last_error: ProviderError,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for each attempt after that
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Retry immediately, with no delay between attempts
    pub fn without_backoff(mut self) -> Self {
        self.initial_backoff = Duration::ZERO;
        self.max_backoff = Duration::ZERO;
        self
    }

    /// Delay to wait after the given (1-based) failed attempt
    pub fn backoff(&self, attempt: u32) -> Duration {
        if self.initial_backoff.is_zero() {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Run `operation` until it succeeds, fails terminally, or attempts run out.
    ///
    /// The closure receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let error = match operation(attempt).await {
                Ok(value) => {
                    debug!("provider call succeeded on attempt {}", attempt);
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !error.is_retryable() {
                warn!("terminal provider failure on attempt {}: {}", attempt, error);
                return Err(RetryError {
                    attempts: attempt,
                    last_error: error,
                });
            }

            if attempt >= max_attempts {
                warn!(
                    "provider call failed on final attempt {} of {}: {}",
                    attempt, max_attempts, error
                );
                return Err(RetryError {
                    attempts: attempt,
                    last_error: error,
                });
            }

            warn!(
                "provider call failed ({}), trying {} of {}",
                error,
                attempt + 1,
                max_attempts
            );
            let delay = self.backoff(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
        }
    }
}
