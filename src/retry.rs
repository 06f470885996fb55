use std::{future::Future, num::NonZeroU32, time::Duration};

use crate::config::EngineConfig;

/// How many times, and how far apart, a failing attempt is repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: NonZeroU32,
    initial_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    /// Creates a new `RetryPolicy`.
    ///
    /// # Arguments
    /// * `max_attempts` - Total attempts, the first one included.
    /// * `initial_delay` - Wait before the second attempt, doubled after each failure.
    /// * `max_delay` - Upper bound for the wait between attempts.
    pub fn new(max_attempts: NonZeroU32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.max_retries,
            config.retry_delay,
            config.max_retry_delay,
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.get()
    }

    /// The wait that follows `current`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_delay)
    }
}

/// The final outcome of a retried operation.
#[derive(Debug)]
pub struct Attempted<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

/// Runs `attempt` until it succeeds or the policy's attempts are exhausted.
///
/// Every attempt is a full call of `attempt`, nothing of a failed attempt is
/// reused by the next one.
///
/// # Arguments
/// * `policy` - The retry bounds.
/// * `attempt` - Builds one attempt given its 1-based number.
///
/// # Returns
/// The first success, or the last failure, along with the attempts made.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, mut attempt: F) -> Attempted<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut delay = policy.initial_delay;
    let mut n = 1;

    loop {
        match attempt(n).await {
            Ok(value) => {
                return Attempted {
                    result: Ok(value),
                    attempts: n,
                };
            }
            Err(e) if n >= policy.max_attempts() => {
                return Attempted {
                    result: Err(e),
                    attempts: n,
                };
            }
            Err(_) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                delay = policy.next_delay(delay);
                n += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            NonZeroU32::new(max_attempts).unwrap(),
            Duration::ZERO,
            Duration::ZERO,
        )
    }

    #[tokio::test]
    async fn always_failing_runs_exactly_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let out = retry(&policy(3), |_| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>("down")
        })
        .await;

        assert_eq!(out.result, Err("down"));
        assert_eq!(out.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn first_try_success_runs_once() {
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let out = retry(&policy(5), |_| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ()>(7)
        })
        .await;

        assert_eq!(out.result, Ok(7));
        assert_eq!(out.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let out = retry(&policy(4), |n| async move {
            if n < 3 { Err(n) } else { Ok(n) }
        })
        .await;

        assert_eq!(out.result, Ok(3));
        assert_eq!(out.attempts, 3);
    }

    #[test]
    fn delay_doubles_up_to_the_cap() {
        let policy = RetryPolicy::new(
            NonZeroU32::new(3).unwrap(),
            Duration::from_millis(100),
            Duration::from_millis(300),
        );

        assert_eq!(policy.next_delay(Duration::from_millis(100)), Duration::from_millis(200));
        assert_eq!(policy.next_delay(Duration::from_millis(200)), Duration::from_millis(300));
    }

    #[test]
    fn blocking_callers_can_drive_it() {
        let out = tokio_test::block_on(retry(&policy(2), |_| async { Err::<(), _>(()) }));
        assert_eq!(out.attempts, 2);
    }
}
