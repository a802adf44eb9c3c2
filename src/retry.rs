use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first one)
    pub max_attempts: u32,
    /// Initial delay before the first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 doubles the delay each time)
    pub backoff_multiplier: f64,
    /// Upper bound of the random jitter added to each delay, as a fraction of it
    pub jitter_factor: f64,
}

impl RetryConfig {
    /// Create a new retry configuration
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }

    /// Set the maximum delay between retries
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Set the backoff multiplier
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set the jitter factor (0.1 adds up to 10% of the delay)
    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor.max(0.0);
        self
    }

    /// Preset: AI translation calls (3 attempts)
    /// Delays: 1s, 2s (+ up to 10% jitter), capped at 30s
    pub fn translation() -> Self {
        Self::new(3, Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(30))
            .with_backoff_multiplier(2.0)
            .with_jitter(0.1)
    }

    /// Calculate the base delay for a given attempt number (0-indexed), without jitter
    fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let delay_ms = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi((attempt - 1) as i32);

        let delay = Duration::from_millis(delay_ms as u64);
        delay.min(self.max_delay)
    }

    /// Delay before the given attempt (0-indexed), jitter included
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for_attempt(attempt);
        if base.is_zero() || self.jitter_factor == 0.0 {
            return base;
        }
        base + base.mul_f64(rand::random::<f64>() * self.jitter_factor)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::translation()
    }
}

/// Execute an async operation with retries, using a predicate to determine if retry is appropriate
///
/// Non-retryable errors are returned immediately without consuming further attempts.
///
/// # Panics
/// Panics if `config.max_attempts` is 0
pub async fn with_retry_if<T, E, F, Fut, P>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    assert!(
        config.max_attempts >= 1,
        "RetryConfig.max_attempts must be >= 1, got {}",
        config.max_attempts
    );

    let mut last_error: Option<E> = None;
    let mut previous_delay = Duration::ZERO;

    for attempt in 0..config.max_attempts {
        // Wait before retry (except for first attempt); never shorter than the previous wait
        let delay = config.delay_for_attempt(attempt).max(previous_delay);
        if !delay.is_zero() {
            debug!(
                "{}: Retry attempt {}/{} after {:?}",
                operation_name,
                attempt + 1,
                config.max_attempts,
                delay
            );
            sleep(delay).await;
            previous_delay = delay;
        }

        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(
                        "{}: Succeeded on attempt {}/{}",
                        operation_name,
                        attempt + 1,
                        config.max_attempts
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                if !should_retry(&e) {
                    debug!(
                        "{}: Error is not retryable, failing immediately: {}",
                        operation_name, e
                    );
                    return Err(e);
                }

                let remaining = config.max_attempts - attempt - 1;
                if remaining > 0 {
                    warn!(
                        "{}: Attempt {}/{} failed ({}), {} retries remaining",
                        operation_name,
                        attempt + 1,
                        config.max_attempts,
                        e,
                        remaining
                    );
                } else {
                    warn!(
                        "{}: All {} attempts failed. Last error: {}",
                        operation_name, config.max_attempts, e
                    );
                }
                last_error = Some(e);
            }
        }
    }

    Err(last_error.expect("At least one attempt should have been made"))
}
