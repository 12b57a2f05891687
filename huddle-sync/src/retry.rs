//! Bounded fixed-delay retry for lossy channel sends.
//!
//! Broadcast sends are not durable, so every send that matters is wrapped
//! in a bounded retry. The delay is deliberately fixed rather than
//! exponential: the channel's failure mode is a brief blip (peer roster
//! settling, transport hiccup), not sustained unavailability, and a flat
//! 500ms keeps worst-case latency predictable. Past the bound the failure
//! is logged and swallowed — a missed delta is healed by the periodic
//! full-state resync, never by blocking the caller.

use std::time::Duration;
use tokio::time::sleep;

/// Retry bound and pacing. Shared by both engines.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Fixed wait between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// Run `op` until it succeeds or the bound is exhausted.
    ///
    /// Returns `Some(value)` on eventual success, `None` after giving up.
    /// Never propagates the underlying error: callers of the feature must
    /// not see a failed send as anything but a log line.
    ///
    /// A retry scheduled before teardown may still fire after it; the op
    /// is expected to no-op gracefully in that case.
    pub async fn run<T, E, F>(&self, what: &str, mut op: F) -> Option<T>
    where
        F: FnMut() -> Result<T, E>,
        E: std::fmt::Display,
    {
        for attempt in 1..=self.attempts {
            match op() {
                Ok(value) => {
                    if attempt > 1 {
                        log::debug!("{what}: succeeded on attempt {attempt}");
                    }
                    return Some(value);
                }
                Err(e) => {
                    log::debug!("{what}: attempt {attempt}/{} failed: {e}", self.attempts);
                    if attempt < self.attempts {
                        sleep(self.delay).await;
                    }
                }
            }
        }
        log::warn!("{what}: giving up after {} attempts", self.attempts);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_attempt_success_does_not_sleep() {
        let policy = RetryPolicy::default();
        let result = policy.run("op", || Ok::<_, String>(42)).await;
        assert_eq!(result, Some(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let policy = RetryPolicy::new(5, Duration::from_millis(500));
        let mut calls = 0;
        let result = policy
            .run("op", || {
                calls += 1;
                if calls < 3 {
                    Err("blip".to_string())
                } else {
                    Ok(calls)
                }
            })
            .await;
        assert_eq!(result, Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_bound() {
        let policy = RetryPolicy::new(5, Duration::from_millis(500));
        let mut calls = 0;
        let result: Option<()> = policy
            .run("op", || {
                calls += 1;
                Err::<(), _>("down".to_string())
            })
            .await;
        assert_eq!(result, None);
        assert_eq!(calls, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_is_fixed_not_exponential() {
        let policy = RetryPolicy::new(3, Duration::from_millis(500));
        let start = tokio::time::Instant::now();
        let _: Option<()> = policy.run("op", || Err::<(), _>("down".to_string())).await;
        // 3 attempts, 2 waits: exactly 1s of pacing, not 0.5 + 1 + 2...
        assert_eq!(start.elapsed(), Duration::from_millis(1000));
    }
}
