//! Operation-granular rate limiting.
//!
//! A token bucket with a one-op budget: `throttle` cooperatively waits until
//! at least `1 / target` seconds have elapsed since the previous release.
//! Targets of zero or below disable limiting entirely.

use std::time::Duration;
use tokio::time::Instant;

/// Paces a loop to a target operation rate.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Option<Duration>,
    next_release: Option<Instant>,
}

impl RateLimiter {
    /// A limiter targeting `ops_per_sec`; disabled when the target is ≤ 0.
    pub fn new(ops_per_sec: f64) -> Self {
        RateLimiter {
            interval: (ops_per_sec > 0.0).then(|| Duration::from_secs_f64(1.0 / ops_per_sec)),
            next_release: None,
        }
    }

    /// Whether throttling is active.
    pub fn is_enabled(&self) -> bool {
        self.interval.is_some()
    }

    /// Waits for the next release slot. The first call returns immediately.
    pub async fn throttle(&mut self) {
        let Some(interval) = self.interval else { return };
        let now = Instant::now();
        let release = self.next_release.unwrap_or(now);
        if release > now {
            tokio::time::sleep_until(release).await;
        }
        // Schedule from the release slot so jitter does not accumulate, but
        // never from the past: a loop that fell behind must not burst.
        self.next_release = Some(release.max(now) + interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn paces_to_the_target_rate() {
        let mut limiter = RateLimiter::new(100.0);
        let started = Instant::now();
        for _ in 0..21 {
            limiter.throttle().await;
        }
        // 21 ops at 100 ops/s take at least 20 intervals.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(200), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(250), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_limiter_never_sleeps() {
        let mut limiter = RateLimiter::new(0.0);
        assert!(!limiter.is_enabled());
        let started = Instant::now();
        for _ in 0..1000 {
            limiter.throttle().await;
        }
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn first_release_is_immediate() {
        let mut limiter = RateLimiter::new(1.0);
        let started = Instant::now();
        limiter.throttle().await;
        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}
