//! Per-host rate limiting
//!
//! Each host gets a token bucket, expressed in its GCRA form: a theoretical
//! arrival time (TAT) advanced by one emission interval per reservation, with a
//! tolerance of `interval * (burst - 1)` allowing short bursts. Reservations
//! never block; they report when the action is permitted so callers can
//! schedule instead of sleeping.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Supplies `(interval, burst)` for a host the limiter has not seen yet
pub type Policy = dyn Fn(&str) -> (Duration, u32) + Send + Sync;

#[derive(Debug)]
struct Bucket {
    interval: Duration,
    burst: u32,

    /// Theoretical arrival time of the next conforming reservation
    tat: Option<Instant>,

    /// Reservations since the policy was last queried
    reservations: u32,
}

impl Bucket {
    fn tolerance(&self) -> Duration {
        self.interval * self.burst.saturating_sub(1)
    }
}

/// Per-host token bucket limiter
pub struct RateLimiter {
    policy: Box<Policy>,

    /// Re-query the policy after this many reservations of a host
    refresh_every: Option<u32>,

    buckets: Mutex<HashMap<String, Bucket>>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("refresh_every", &self.refresh_every)
            .field("hosts", &self.hosts())
            .finish()
    }
}

impl RateLimiter {
    /// Creates a limiter that asks `policy` once per host
    pub fn new<F>(policy: F) -> Self
    where
        F: Fn(&str) -> (Duration, u32) + Send + Sync + 'static,
    {
        Self {
            policy: Box::new(policy),
            refresh_every: None,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a limiter that re-queries the interval every `every` reservations
    ///
    /// Only the interval is refreshed; the burst chosen for a host is kept.
    pub fn refreshable<F>(policy: F, every: u32) -> Self
    where
        F: Fn(&str) -> (Duration, u32) + Send + Sync + 'static,
    {
        Self {
            policy: Box::new(policy),
            refresh_every: Some(every.max(1)),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Bucket>> {
        self.buckets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reserves a slot for an action on `host` wanted at `at`
    ///
    /// # Arguments
    ///
    /// * `host` - Rate limiting key, usually `host[:port]`
    /// * `at` - Earliest time the caller wants to act
    ///
    /// # Returns
    ///
    /// The instant, never earlier than `at`, from which the action is permitted.
    pub fn reserve_at(&self, host: &str, at: Instant) -> Instant {
        let mut buckets = self.lock();

        let bucket = buckets.entry(host.to_string()).or_insert_with(|| {
            let (interval, burst) = (self.policy)(host);
            Bucket {
                interval,
                burst: burst.max(1),
                tat: None,
                reservations: 0,
            }
        });

        if let Some(every) = self.refresh_every {
            bucket.reservations += 1;
            if bucket.reservations >= every {
                bucket.reservations = 0;
                let (interval, _) = (self.policy)(host);
                bucket.interval = interval;
            }
        }

        let tat = bucket.tat.map_or(at, |tat| tat.max(at));
        let allowed = tat
            .checked_sub(bucket.tolerance())
            .map_or(at, |earliest| earliest.max(at));
        bucket.tat = Some(tat + bucket.interval);

        allowed
    }

    /// Reserves a slot for an action on `host` now
    ///
    /// # Returns
    ///
    /// How long the caller must wait before acting; zero if it may act at once.
    pub fn reserve(&self, host: &str) -> Duration {
        let now = Instant::now();
        self.reserve_at(host, now).saturating_duration_since(now)
    }

    /// Number of hosts with a bucket
    pub fn hosts(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{QueueItem, WaitQueue};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_first_reservation_is_immediate() {
        let limiter = RateLimiter::new(|_| (ms(100), 1));
        assert_eq!(limiter.reserve("a.com"), Duration::ZERO);
    }

    #[test]
    fn test_spacing_without_burst() {
        let limiter = RateLimiter::new(|_| (ms(100), 1));
        let t0 = Instant::now();
        assert_eq!(limiter.reserve_at("a.com", t0), t0);
        assert_eq!(limiter.reserve_at("a.com", t0), t0 + ms(100));
        assert_eq!(limiter.reserve_at("a.com", t0), t0 + ms(200));
        // Other hosts are independent
        assert_eq!(limiter.reserve_at("b.com", t0), t0);
        assert_eq!(limiter.hosts(), 2);
    }

    #[test]
    fn test_burst_allows_immediate_actions() {
        let limiter = RateLimiter::new(|_| (ms(100), 3));
        let t0 = Instant::now();
        assert_eq!(limiter.reserve_at("a.com", t0), t0);
        assert_eq!(limiter.reserve_at("a.com", t0), t0);
        assert_eq!(limiter.reserve_at("a.com", t0), t0);
        assert_eq!(limiter.reserve_at("a.com", t0), t0 + ms(100));
    }

    #[test]
    fn test_idle_host_recovers() {
        let limiter = RateLimiter::new(|_| (ms(100), 1));
        let t0 = Instant::now();
        limiter.reserve_at("a.com", t0);
        assert_eq!(limiter.reserve_at("a.com", t0 + ms(500)), t0 + ms(500));
    }

    #[test]
    fn test_zero_interval_never_delays() {
        let limiter = RateLimiter::new(|_| (Duration::ZERO, 1));
        let t0 = Instant::now();
        for _ in 0..5 {
            assert_eq!(limiter.reserve_at("a.com", t0), t0);
        }
    }

    #[test]
    fn test_policy_called_once_per_host() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let limiter = RateLimiter::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            (ms(10), 1)
        });
        for _ in 0..10 {
            limiter.reserve("a.com");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_refreshable_updates_interval() {
        let interval = Arc::new(AtomicU32::new(100));
        let current = Arc::clone(&interval);
        let limiter = RateLimiter::refreshable(
            move |_| (ms(current.load(Ordering::SeqCst) as u64), 1),
            2,
        );
        let t0 = Instant::now();

        assert_eq!(limiter.reserve_at("a.com", t0), t0);
        interval.store(10, Ordering::SeqCst);
        // Second reservation refreshes before reserving
        assert_eq!(limiter.reserve_at("a.com", t0), t0 + ms(100));
        assert_eq!(limiter.reserve_at("a.com", t0), t0 + ms(110));
    }

    #[tokio::test]
    async fn test_limited_tickets_pop_in_permitted_order() {
        let limiter = RateLimiter::new(|host| match host {
            "a" => (ms(50), 1),
            _ => (ms(25), 1),
        });
        let queue = WaitQueue::new(16);
        let start = Instant::now();

        let tickets = [
            ("a", "/25", 25),
            ("a", "/50", 50),
            ("b", "/60", 60),
            ("b", "/100", 100),
        ];
        for (host, path, offset) in tickets {
            let next = limiter.reserve_at(host, start + ms(offset));
            queue.push(QueueItem::new(path, 0, next)).await.unwrap();
        }

        let mut order = Vec::new();
        for _ in 0..4 {
            order.push(queue.pop().await.unwrap().url);
        }
        assert_eq!(order, vec!["/25", "/60", "/50", "/100"]);
        assert!(start.elapsed() >= ms(100));
    }
}
