//! Sliding-window rate limiting for login attempts
//!
//! Each source key (usually the client IP) owns a log of attempt timestamps.
//! An attempt is admitted when fewer than `max_attempts` timestamps fall inside
//! the trailing window. Pruning, checking and recording happen while holding
//! the key's map entry, so concurrent bursts from one source cannot undercount.
//!
//! # Usage Example
//!
//! ```rust
//! use authgate::core::auth::rate_limiter::SlidingWindowLimiter;
//! use std::time::Duration;
//!
//! let limiter = SlidingWindowLimiter::new(2, Duration::from_secs(60));
//!
//! assert!(limiter.check_and_record("10.0.0.1").is_ok());
//! assert!(limiter.check_and_record("10.0.0.1").is_ok());
//! assert!(limiter.check_and_record("10.0.0.1").is_err());
//! assert!(limiter.check_and_record("10.0.0.2").is_ok());
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Default number of login attempts per window
pub const DEFAULT_MAX_ATTEMPTS: usize = 5;

/// Default window length (15 minutes)
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(15 * 60);

/// Returned when a source has exhausted its window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimited {
    /// Time until the oldest recorded attempt leaves the window
    pub retry_after: Duration,
}

/// Thread-safe sliding-window counter store keyed by source
#[derive(Debug, Clone)]
pub struct SlidingWindowLimiter {
    attempts: Arc<DashMap<String, VecDeque<Instant>>>,
    max_attempts: usize,
    window: Duration,
}

impl Default for SlidingWindowLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_WINDOW)
    }
}

impl SlidingWindowLimiter {
    /// Create a limiter admitting `max_attempts` per `window` for each key
    pub fn new(max_attempts: usize, window: Duration) -> Self {
        Self {
            attempts: Arc::new(DashMap::new()),
            max_attempts,
            window,
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Admit and record an attempt for `key`, or report when to retry
    pub fn check_and_record(&self, key: &str) -> Result<(), RateLimited> {
        self.check_and_record_at(key, Instant::now())
    }

    /// Same as [`check_and_record`](Self::check_and_record) with an explicit clock reading
    pub fn check_and_record_at(&self, key: &str, now: Instant) -> Result<(), RateLimited> {
        let mut log = self.attempts.entry(key.to_owned()).or_default();
        self.prune_log(&mut log, now);

        if log.len() >= self.max_attempts {
            let retry_after = log
                .front()
                .and_then(|oldest| oldest.checked_add(self.window))
                .map(|reopens| reopens.saturating_duration_since(now))
                .unwrap_or(self.window);
            return Err(RateLimited { retry_after });
        }

        log.push_back(now);
        Ok(())
    }

    /// Attempts currently counted against `key`
    pub fn attempts(&self, key: &str) -> usize {
        self.attempts_at(key, Instant::now())
    }

    pub fn attempts_at(&self, key: &str, now: Instant) -> usize {
        self.attempts
            .get(key)
            .map(|log| log.iter().filter(|t| now.duration_since(**t) < self.window).count())
            .unwrap_or(0)
    }

    /// Forget every attempt recorded for `key`
    pub fn reset(&self, key: &str) {
        self.attempts.remove(key);
    }

    /// Drop expired timestamps and remove keys with nothing left
    pub fn prune(&self) {
        self.prune_at(Instant::now());
    }

    pub fn prune_at(&self, now: Instant) {
        self.attempts.retain(|_, log| {
            self.prune_log(log, now);
            !log.is_empty()
        });
    }

    /// Number of tracked sources
    pub fn tracked_sources(&self) -> usize {
        self.attempts.len()
    }

    fn prune_log(&self, log: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = log.front() {
            if now.duration_since(*oldest) >= self.window {
                log.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const KEY: &str = "192.0.2.1";

    #[test]
    fn test_admits_up_to_max_attempts() {
        let limiter = SlidingWindowLimiter::new(5, DEFAULT_WINDOW);
        let now = Instant::now();

        for _ in 0..5 {
            assert!(limiter.check_and_record_at(KEY, now).is_ok());
        }
        assert!(limiter.check_and_record_at(KEY, now).is_err());
        assert_eq!(limiter.attempts_at(KEY, now), 5);
    }

    #[test]
    fn test_huge_window_does_not_overflow() {
        let limiter = SlidingWindowLimiter::new(1, Duration::MAX);
        let now = Instant::now();

        assert!(limiter.check_and_record_at(KEY, now).is_ok());
        let limited = limiter.check_and_record_at(KEY, now).unwrap_err();
        assert_eq!(limited.retry_after, Duration::MAX);
    }

    #[test]
    fn test_rejected_attempts_are_not_recorded() {
        let limiter = SlidingWindowLimiter::new(1, Duration::from_secs(60));
        let start = Instant::now();

        assert!(limiter.check_and_record_at(KEY, start).is_ok());
        for i in 1..10 {
            assert!(
                limiter
                    .check_and_record_at(KEY, start + Duration::from_secs(i))
                    .is_err()
            );
        }

        // Only the admitted attempt counts, so the window reopens 60s after it
        assert!(
            limiter
                .check_and_record_at(KEY, start + Duration::from_secs(60))
                .is_ok()
        );
    }

    #[test]
    fn test_window_slides() {
        let limiter = SlidingWindowLimiter::new(2, Duration::from_secs(100));
        let start = Instant::now();

        assert!(limiter.check_and_record_at(KEY, start).is_ok());
        assert!(
            limiter
                .check_and_record_at(KEY, start + Duration::from_secs(50))
                .is_ok()
        );
        assert!(
            limiter
                .check_and_record_at(KEY, start + Duration::from_secs(99))
                .is_err()
        );
        // First attempt has left the window, second has not
        assert!(
            limiter
                .check_and_record_at(KEY, start + Duration::from_secs(100))
                .is_ok()
        );
        assert!(
            limiter
                .check_and_record_at(KEY, start + Duration::from_secs(120))
                .is_err()
        );
    }

    #[test]
    fn test_retry_after_counts_down_to_oldest_expiry() {
        let limiter = SlidingWindowLimiter::new(1, Duration::from_secs(900));
        let start = Instant::now();

        limiter.check_and_record_at(KEY, start).unwrap();
        let err = limiter
            .check_and_record_at(KEY, start + Duration::from_secs(300))
            .unwrap_err();

        assert_eq!(err.retry_after, Duration::from_secs(600));
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = SlidingWindowLimiter::new(1, DEFAULT_WINDOW);
        let now = Instant::now();

        assert!(limiter.check_and_record_at("a", now).is_ok());
        assert!(limiter.check_and_record_at("a", now).is_err());
        assert!(limiter.check_and_record_at("b", now).is_ok());
    }

    #[test]
    fn test_reset_clears_key() {
        let limiter = SlidingWindowLimiter::new(1, DEFAULT_WINDOW);

        limiter.check_and_record(KEY).unwrap();
        assert!(limiter.check_and_record(KEY).is_err());

        limiter.reset(KEY);
        assert!(limiter.check_and_record(KEY).is_ok());
    }

    #[test]
    fn test_prune_removes_idle_sources() {
        let limiter = SlidingWindowLimiter::new(3, Duration::from_secs(10));
        let start = Instant::now();

        limiter.check_and_record_at("old", start).unwrap();
        limiter
            .check_and_record_at("fresh", start + Duration::from_secs(9))
            .unwrap();
        assert_eq!(limiter.tracked_sources(), 2);

        limiter.prune_at(start + Duration::from_secs(15));
        assert_eq!(limiter.tracked_sources(), 1);
        assert_eq!(limiter.attempts_at("fresh", start + Duration::from_secs(15)), 1);
    }

    #[test]
    fn test_concurrent_burst_never_exceeds_limit() {
        let limiter = SlidingWindowLimiter::new(5, DEFAULT_WINDOW);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let limiter = limiter.clone();
                thread::spawn(move || {
                    (0..10)
                        .filter(|_| limiter.check_and_record(KEY).is_ok())
                        .count()
                })
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 5);
        assert_eq!(limiter.attempts(KEY), 5);
    }

    #[test]
    fn test_default_limits() {
        let limiter = SlidingWindowLimiter::default();
        assert_eq!(limiter.max_attempts(), 5);
        assert_eq!(limiter.window(), Duration::from_secs(900));
    }
}
