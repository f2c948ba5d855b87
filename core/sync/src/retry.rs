//! Caller-side retry with exponential backoff for transient failures.
//!
//! The sync core never retries on its own. Front ends wrap the calls they
//! want retried, e.g. a sync run over a flaky connection.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use cloudstorage_common::{CloudStorageError, Error};

/// Errors that can tell whether another attempt may succeed.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for Error {
    /// Transport failures, temporary server errors and rate limiting are
    /// retried. Typed failures and other rejected requests are final.
    fn is_transient(&self) -> bool {
        match self {
            Error::Network(_) | Error::Io(_) => true,
            Error::Http { status, .. } => matches!(status, 429 | 500 | 502 | 503 | 504),
            Error::CloudStorage(err) => err.is_transient(),
            _ => false,
        }
    }
}

impl Transient for CloudStorageError {
    fn is_transient(&self) -> bool {
        self.source.as_deref().is_some_and(Transient::is_transient)
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    pub max_retries: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay (cap for exponential growth).
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub jitter: bool,
}

impl RetryConfig {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `attempt` (zero based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_delay.as_millis() as f64);

        let final_delay = if self.jitter {
            // +/- 25%
            capped_delay * (0.75 + rand::random::<f64>() * 0.5)
        } else {
            capped_delay
        };

        Duration::from_millis(final_delay as u64)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Runs operations, retrying transient failures.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Execute an operation, retrying while it fails with a transient error.
    ///
    /// The error of the last attempt is returned once retries are exhausted.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient + Display,
    {
        self.execute_with_condition(operation, E::is_transient).await
    }

    /// Execute with a custom retry condition.
    pub async fn execute_with_condition<F, Fut, T, E, C>(
        &self,
        operation: F,
        should_retry: C,
    ) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        C: Fn(&E) -> bool,
    {
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        debug!("Operation succeeded after {} retries", attempt);
                    }
                    return Ok(result);
                }
                Err(err) if !should_retry(&err) => return Err(err),
                Err(err) => {
                    if attempt >= self.config.max_retries {
                        warn!("Operation failed after {} attempts: {}", attempt + 1, err);
                        return Err(err);
                    }

                    let delay = self.config.delay_for_attempt(attempt);
                    attempt += 1;
                    warn!("Attempt {} failed: {}. Retrying in {:?}...", attempt, err, delay);
                    sleep(delay).await;
                }
            }
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

/// Retry with the default configuration.
pub async fn retry<F, Fut, T, E>(operation: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient + Display,
{
    RetryExecutor::default().execute(operation).await
}
