use std::sync::Mutex;
use std::time::Duration;

use crate::error::StorageError;
use crate::queue::CancellationToken;

/// Waits between attempts of a filesystem step.
pub trait Sleeper: Send + Sync {
    /// Waits `delay`. Returns `false` when the wait was cancelled.
    fn sleep(&self, delay: Duration, token: &CancellationToken) -> bool;
}

/// Sleeps on the job's cancellation token.
#[derive(Debug, Default)]
pub struct TokenSleeper;

impl Sleeper for TokenSleeper {
    fn sleep(&self, delay: Duration, token: &CancellationToken) -> bool {
        !token.wait_timeout(delay)
    }
}

/// Returns immediately and remembers every requested delay.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, delay: Duration, token: &CancellationToken) -> bool {
        if let Ok(mut delays) = self.delays.lock() {
            delays.push(delay);
        }
        !token.is_cancelled()
    }
}

#[derive(Debug)]
pub enum RetryError {
    Cancelled,
    /// The last error seen. Non-retryable errors are returned on first sight.
    Failed(StorageError),
}

/// One attempt, then one more after each configured delay.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl RetryPolicy {
    pub fn new(delays_ms: &[u64]) -> Self {
        Self {
            delays: delays_ms.iter().map(|ms| Duration::from_millis(*ms)).collect(),
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.delays.len() + 1
    }

    pub fn run<T, F>(
        &self,
        step: &str,
        sleeper: &dyn Sleeper,
        token: &CancellationToken,
        mut op: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Result<T, StorageError>,
    {
        let mut delays = self.delays.iter();
        let mut attempt = 1;
        loop {
            if token.is_cancelled() {
                return Err(RetryError::Cancelled);
            }
            let err = match op() {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if !err.is_retryable() {
                return Err(RetryError::Failed(err));
            }
            let Some(delay) = delays.next() else {
                log::warn!("{} gave up after {} attempts: {}", step, attempt, err);
                return Err(RetryError::Failed(err));
            };
            log::debug!(
                "{} attempt {} failed ({}), retrying in {:?}",
                step,
                attempt,
                err,
                delay
            );
            if !sleeper.sleep(*delay, token) {
                return Err(RetryError::Cancelled);
            }
            attempt += 1;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&[750, 3000, 5000])
    }
}
