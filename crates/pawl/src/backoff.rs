//! Backoff timers for the lock protocol.
//!
//! Two delay sources, both applying full jitter over a bounded growth
//! sequence (see the AWS architecture blog's "Exponential Backoff and
//! Jitter"):
//!
//! - [`Linear`] grows by 50 ms per attempt. Used while we hold the lock,
//!   keeping the latency of our own operations low.
//! - [`Exponential`] grows by a factor of 1.5 per attempt. Used while
//!   contending, keeping load on the store low.
//!
//! Both are clamped to \[50 ms, 30 s\] and reset at the start of each
//! public operation. Waits observe the caller's cancellation token.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

const BACKOFF_MIN: Duration = Duration::from_millis(50);
const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Linear growth: +50 ms per attempt.
#[derive(Debug, Default)]
pub(crate) struct Linear {
    current: Duration,
}

/// Exponential growth: x1.5 per attempt.
#[derive(Debug, Default)]
pub(crate) struct Exponential {
    current: Duration,
}

impl Linear {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Advances the sequence and sleeps a jittered delay, or returns
    /// [`Error::Cancelled`] if the token fires first.
    pub(crate) async fn wait(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.current = clamp(self.current + BACKOFF_MIN);
        sleep_jittered(cancel, self.current).await
    }
}

impl Exponential {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Advances the sequence and sleeps a jittered delay, or returns
    /// [`Error::Cancelled`] if the token fires first.
    pub(crate) async fn wait(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.current = clamp(self.current + self.current / 2);
        sleep_jittered(cancel, self.current).await
    }
}

fn clamp(d: Duration) -> Duration {
    d.clamp(BACKOFF_MIN, BACKOFF_MAX)
}

/// Full jitter: the actual delay is uniform over `[0, cap)`.
async fn sleep_jittered(cancel: &CancellationToken, cap: Duration) -> Result<()> {
    let nanos = u64::try_from(cap.as_nanos()).unwrap_or(u64::MAX).max(1);
    let delay = Duration::from_nanos(next_rand() % nanos);
    tokio::select! {
        () = tokio::time::sleep(delay) => Ok(()),
        () = cancel.cancelled() => Err(Error::Cancelled),
    }
}

// Process-wide xorshift state, seeded from the clock on first use.
// Lost updates under contention only perturb the jitter sequence.
static RNG_STATE: AtomicU64 = AtomicU64::new(0);

fn next_rand() -> u64 {
    let mut s = RNG_STATE.load(Ordering::Relaxed);
    if s == 0 {
        s = u64::from(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .subsec_nanos(),
        ) | 1;
    }
    s ^= s << 13;
    s ^= s >> 7;
    s ^= s << 17;
    RNG_STATE.store(s, Ordering::Relaxed);
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn linear_sequence_grows_by_fifty_millis() {
        let mut b = Linear::new();
        b.current = clamp(b.current + BACKOFF_MIN);
        assert_eq!(b.current, Duration::from_millis(50));
        b.current = clamp(b.current + BACKOFF_MIN);
        assert_eq!(b.current, Duration::from_millis(100));
    }

    #[test]
    fn exponential_sequence_grows_by_half() {
        let mut b = Exponential::new();
        b.current = clamp(b.current + b.current / 2);
        assert_eq!(b.current, Duration::from_millis(50));
        b.current = clamp(b.current + b.current / 2);
        assert_eq!(b.current, Duration::from_millis(75));
        b.current = clamp(b.current + b.current / 2);
        assert_eq!(b.current, Duration::from_micros(112_500));
    }

    #[test]
    fn sequences_are_clamped_to_thirty_seconds() {
        assert_eq!(clamp(Duration::from_secs(600)), BACKOFF_MAX);
        assert_eq!(clamp(Duration::ZERO), BACKOFF_MIN);
    }

    #[test]
    fn rand_is_nonzero_and_varies() {
        let a = next_rand();
        let b = next_rand();
        assert_ne!(a, 0);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn wait_returns_cancelled_when_token_fires() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut b = Exponential::new();
        // Force a long cap so only cancellation can end the wait quickly.
        b.current = BACKOFF_MAX;
        let started = Instant::now();
        let err = b.wait(&cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn wait_completes_without_cancellation() {
        let cancel = CancellationToken::new();
        let mut b = Linear::new();
        b.wait(&cancel).await.expect("wait");
        // One linear step: the jittered delay is below the 50 ms cap.
        assert_eq!(b.current, Duration::from_millis(50));
    }
}
