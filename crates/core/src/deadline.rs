use std::{future::Future, time::Duration};

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
#[error("deadline exceeded")]
pub struct DeadlineExceeded;

/// Absolute point in time by which a request must finish.
///
/// Passed explicitly to every blocking stage. Futures run under it are dropped
/// once it passes, which kills subprocesses spawned with `kill_on_drop`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn after(timeout: Duration) -> Self { Self(Instant::now() + timeout) }

    pub fn at(instant: Instant) -> Self { Self(instant) }

    pub fn remaining(&self) -> Duration { self.0.saturating_duration_since(Instant::now()) }

    pub fn is_expired(&self) -> bool { self.remaining().is_zero() }

    /// The earlier of this deadline and `timeout` from now.
    pub fn bounded(&self, timeout: Duration) -> Self { Self(self.0.min(Instant::now() + timeout)) }

    /// Run `fut` to completion unless the deadline passes first. An already expired
    /// deadline fails without polling `fut` at all.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, DeadlineExceeded> {
        if self.is_expired() {
            return Err(DeadlineExceeded);
        }
        tokio::time::timeout_at(self.0, fut).await.map_err(|_| DeadlineExceeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_run_within_deadline() {
        let deadline = Deadline::after(Duration::from_secs(5));
        let value = deadline.run(async { 42 }).await;
        assert_eq!(value, Ok(42));
        assert!(!deadline.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_past_deadline() {
        let deadline = Deadline::after(Duration::from_millis(100));
        let result = deadline.run(tokio::time::sleep(Duration::from_secs(60))).await;
        assert_eq!(result, Err(DeadlineExceeded));
        assert!(deadline.is_expired());

        let polled = std::cell::Cell::new(false);
        let result = deadline.run(async { polled.set(true) }).await;
        assert_eq!(result, Err(DeadlineExceeded));
        assert!(!polled.get());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_picks_earlier() {
        let deadline = Deadline::after(Duration::from_secs(900));
        assert_eq!(deadline.bounded(Duration::from_secs(30)).remaining(), Duration::from_secs(30));
        let short = Deadline::after(Duration::from_secs(1));
        assert_eq!(short.bounded(Duration::from_secs(30)), short);
    }
}
