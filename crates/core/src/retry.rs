//! Retry with exponential backoff
//!
//! Wraps units of database work that can hit transient connectivity failures.
//! The caller supplies the predicate that separates transient errors from
//! permanent ones, so constraint violations and decode errors surface on the
//! first attempt.
//!
//! ```
//! use moovies_core::retry::{retry_with_backoff, RetryPolicy};
//!
//! # async fn example() {
//! let value = retry_with_backoff(
//!     || async { Ok::<_, std::io::Error>(42) },
//!     &RetryPolicy::default(),
//!     |err: &std::io::Error| err.kind() == std::io::ErrorKind::ConnectionRefused,
//! )
//! .await;
//! assert_eq!(value.unwrap(), 42);
//! # }
//! ```

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// How often and how patiently to retry
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first; 1 disables retrying
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Add up to 30% random jitter on top of each delay
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
            jitter: true,
        }
    }

    pub fn single_attempt() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Delays to sleep between attempts, one fewer than `max_attempts`
    pub fn backoff(&self) -> Backoff {
        Backoff {
            next: self.initial_delay.min(self.max_delay),
            max: self.max_delay,
            remaining: self.max_attempts.saturating_sub(1),
            jitter: self.jitter,
        }
    }
}

/// Doubling delay schedule capped at the policy's maximum
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
    remaining: u32,
    jitter: bool,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let base = self.next;
        self.next = base.saturating_mul(2).min(self.max);

        if self.jitter {
            let spread = base.mul_f64(0.3);
            let extra = rand::thread_rng().gen_range(Duration::ZERO..=spread);
            Some(base + extra)
        } else {
            Some(base)
        }
    }
}

/// Run `operation` until it succeeds, fails permanently or runs out of attempts
///
/// The last error is returned when `is_transient` rejects it or the backoff
/// schedule is exhausted.
pub async fn retry_with_backoff<F, Fut, T, E, P>(
    mut operation: F,
    policy: &RetryPolicy,
    is_transient: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut delays = policy.backoff();
    let mut attempt = 1u32;

    loop {
        let error = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        if !is_transient(&error) {
            return Err(error);
        }

        match delays.next() {
            Some(delay) => {
                debug!(attempt, delay_ms = delay.as_millis() as u64, "Transient failure, backing off");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            None => {
                warn!(attempts = attempt, "Giving up after transient failures");
                return Err(error);
            }
        }
    }
}
