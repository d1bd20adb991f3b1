//! Bounded retry with backoff for transient failures.

use crate::cancel::CancelToken;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    Fatal,
    Interrupt,
}

/// Implemented by error types the retry policy can reason about.
pub trait Classify {
    fn class(&self) -> ErrorClass;
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Backoff {
    Constant,
    Exponential { factor: u32, max_delay: Duration },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential {
            factor: 2,
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Sleeps between attempts. Returns `false` when the wait was cut short by
/// cancellation.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, delay: Duration, cancel: &CancelToken) -> bool;
}

#[derive(Debug, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, delay: Duration, cancel: &CancelToken) -> bool {
        !cancel.wait_timeout(delay)
    }
}

#[derive(Debug)]
pub enum RetryError<E> {
    Fatal { attempts: u32, error: E },
    Exhausted { attempts: u32, last: E },
    Interrupted,
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Fatal { attempts, .. } | RetryError::Exhausted { attempts, .. } => {
                *attempts
            }
            RetryError::Interrupted => 0,
        }
    }

    pub fn into_error(self) -> Option<E> {
        match self {
            RetryError::Fatal { error, .. } => Some(error),
            RetryError::Exhausted { last, .. } => Some(last),
            RetryError::Interrupted => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Fatal { error, .. } => write!(f, "{error}"),
            RetryError::Exhausted { attempts, last } => {
                write!(f, "{last} (gave up after {attempts} attempts)")
            }
            RetryError::Interrupted => f.write_str("interrupted"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryError<E> {}

#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    delay: Duration,
    backoff: Backoff,
    sleeper: Arc<dyn Sleeper>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("delay", &self.delay)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, Duration::from_secs(1))
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            delay,
            backoff: Backoff::default(),
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        match self.backoff {
            Backoff::Constant => self.delay,
            Backoff::Exponential { factor, max_delay } => {
                let exp = retry.saturating_sub(1).min(16);
                let multiplier = factor.max(1).saturating_pow(exp);
                self.delay.saturating_mul(multiplier).min(max_delay)
            }
        }
    }

    /// Runs `operation` up to `max_retries + 1` times. The closure receives
    /// the 1-based attempt number. `on_retry` is called with the failed
    /// attempt, the upcoming delay and the error before each sleep.
    pub fn run<T, E, F, R>(
        &self,
        cancel: &CancelToken,
        mut operation: F,
        mut on_retry: R,
    ) -> Result<T, RetryError<E>>
    where
        E: Classify,
        F: FnMut(u32) -> Result<T, E>,
        R: FnMut(u32, Duration, &E),
    {
        let max_attempts = self.max_retries.saturating_add(1);
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Interrupted);
            }
            attempt += 1;
            let error = match operation(attempt) {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            match error.class() {
                ErrorClass::Interrupt => return Err(RetryError::Interrupted),
                ErrorClass::Fatal => {
                    return Err(RetryError::Fatal {
                        attempts: attempt,
                        error,
                    });
                }
                ErrorClass::Retryable if attempt >= max_attempts => {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: error,
                    });
                }
                ErrorClass::Retryable => {
                    let delay = self.delay_for(attempt);
                    on_retry(attempt, delay, &error);
                    if !self.sleeper.sleep(delay, cancel) {
                        return Err(RetryError::Interrupted);
                    }
                }
            }
        }
    }
}
