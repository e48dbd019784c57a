//! Per-tenant token-bucket rate limiting.
//!
//! One bucket per `(tenant, operation)` pair, refilled continuously at a
//! fixed rate. Checks against the same bucket serialize on a per-key mutex
//! so two concurrent requests can never both spend the last token; checks
//! against different buckets run fully in parallel.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, RwLock};

use crate::time::Clock;

/// Token-bucket parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitConfig {
    /// Maximum tokens a bucket holds.
    pub capacity: u32,
    /// Tokens restored per second.
    pub refill_per_sec: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { capacity: 5, refill_per_sec: 1.0 }
    }
}

/// Outcome of a rate-limit check, with the metadata the ingress needs for
/// `x-ratelimit-*` response headers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateDecision {
    /// Whether the request is admitted.
    pub allowed: bool,
    /// Tokens remaining after this check.
    pub remaining: u32,
    /// Bucket capacity, echoed for the limit header.
    pub limit: u32,
    /// When the bucket next gains a token.
    pub reset_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    updated_at: DateTime<Utc>,
}

/// Keyed token-bucket rate limiter.
///
/// Buckets are created lazily on first check and never explicitly removed;
/// an idle bucket refills to capacity and costs one map entry.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: RwLock<HashMap<String, Arc<Mutex<Bucket>>>>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Creates a limiter with the given bucket parameters.
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, buckets: RwLock::new(HashMap::new()), clock }
    }

    /// Builds the bucket key for a tenant operation.
    pub fn bucket_key(tenant: &crate::models::TenantId, operation: &str) -> String {
        format!("{tenant}:{operation}")
    }

    /// Checks and, when admitted, spends one token from the bucket.
    ///
    /// Rejections still persist the refill-advanced observation so later
    /// refills compute from the latest state rather than replaying elapsed
    /// time.
    pub async fn check(&self, bucket_key: &str) -> RateDecision {
        let bucket = self.bucket(bucket_key).await;
        let mut state = bucket.lock().await;
        let now = self.clock.now();

        let elapsed_secs = (now - state.updated_at).num_milliseconds() as f64 / 1000.0;
        let refill = (elapsed_secs * self.config.refill_per_sec).floor();
        let refilled = (state.tokens + refill).min(f64::from(self.config.capacity));

        let seconds_per_token = 1.0 / self.config.refill_per_sec;

        if refilled < 1.0 {
            state.tokens = refilled;
            state.updated_at = now;
            return RateDecision {
                allowed: false,
                remaining: 0,
                limit: self.config.capacity,
                reset_at: now + Duration::milliseconds((seconds_per_token * 1000.0) as i64),
            };
        }

        let remaining = refilled - 1.0;
        state.tokens = remaining;
        state.updated_at = now;

        RateDecision {
            allowed: true,
            remaining: remaining as u32,
            limit: self.config.capacity,
            reset_at: now + Duration::milliseconds((seconds_per_token * 1000.0) as i64),
        }
    }

    async fn bucket(&self, key: &str) -> Arc<Mutex<Bucket>> {
        if let Some(bucket) = self.buckets.read().await.get(key) {
            return bucket.clone();
        }

        let mut buckets = self.buckets.write().await;
        buckets
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(Bucket {
                    tokens: f64::from(self.config.capacity),
                    updated_at: self.clock.now(),
                }))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use super::*;
    use crate::time::TestClock;

    fn limiter(capacity: u32, refill_per_sec: f64) -> (Arc<TestClock>, RateLimiter) {
        let clock = Arc::new(TestClock::new());
        let limiter =
            RateLimiter::new(RateLimitConfig { capacity, refill_per_sec }, clock.clone());
        (clock, limiter)
    }

    #[tokio::test]
    async fn admits_until_capacity_exhausted() {
        // Capacity 2, 1 token/s, three checks spaced inside the refill
        // period: admitted, admitted, rejected with remaining 1, 0, 0.
        let (clock, limiter) = limiter(2, 1.0);

        let first = limiter.check("t1:post").await;
        assert!(first.allowed);
        assert_eq!(first.remaining, 1);

        clock.advance(StdDuration::from_millis(900));
        let second = limiter.check("t1:post").await;
        assert!(second.allowed);
        assert_eq!(second.remaining, 0);

        clock.advance(StdDuration::from_millis(900));
        let third = limiter.check("t1:post").await;
        assert!(!third.allowed);
        assert_eq!(third.remaining, 0);
    }

    #[tokio::test]
    async fn whole_elapsed_periods_refill_one_token_each() {
        let (clock, limiter) = limiter(2, 1.0);

        limiter.check("t1:post").await;
        clock.advance(StdDuration::from_secs(1));

        // One token refilled over the full second, one spent here.
        let decision = limiter.check("t1:post").await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1);
    }

    #[tokio::test]
    async fn exhausted_bucket_recovers_after_refill() {
        let (clock, limiter) = limiter(2, 1.0);

        limiter.check("t1:post").await;
        limiter.check("t1:post").await;
        let rejected = limiter.check("t1:post").await;
        assert!(!rejected.allowed);

        clock.advance(StdDuration::from_secs(7));

        let recovered = limiter.check("t1:post").await;
        assert!(recovered.allowed);
    }

    #[tokio::test]
    async fn refill_never_exceeds_capacity() {
        let (clock, limiter) = limiter(5, 1.0);

        clock.advance(StdDuration::from_secs(3600));

        let decision = limiter.check("t1:post").await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 4);
    }

    #[tokio::test]
    async fn partial_seconds_do_not_refill() {
        let (clock, limiter) = limiter(1, 1.0);

        let first = limiter.check("t1:post").await;
        assert!(first.allowed);

        clock.advance(StdDuration::from_millis(900));
        let second = limiter.check("t1:post").await;
        assert!(!second.allowed, "a fractional token must not admit");
    }

    #[tokio::test]
    async fn rejection_persists_refill_observation() {
        let (clock, limiter) = limiter(1, 1.0);

        limiter.check("t1:post").await;

        // Two rejected checks 600 ms apart. If rejection failed to persist
        // the advanced observation, the second would see 1.2 s of elapsed
        // time and wrongly admit; correct behavior floors each window.
        clock.advance(StdDuration::from_millis(600));
        assert!(!limiter.check("t1:post").await.allowed);
        clock.advance(StdDuration::from_millis(600));
        assert!(!limiter.check("t1:post").await.allowed);

        clock.advance(StdDuration::from_secs(1));
        assert!(limiter.check("t1:post").await.allowed);
    }

    #[tokio::test]
    async fn buckets_are_independent_per_key() {
        let (_clock, limiter) = limiter(1, 1.0);

        assert!(limiter.check("t1:post").await.allowed);
        assert!(!limiter.check("t1:post").await.allowed);

        // Different tenant and different operation both start fresh.
        assert!(limiter.check("t2:post").await.allowed);
        assert!(limiter.check("t1:vote").await.allowed);
    }

    #[tokio::test]
    async fn concurrent_checks_never_overspend() {
        let (_clock, limiter) = limiter(5, 1.0);
        let limiter = Arc::new(limiter);

        let mut handles = Vec::new();
        for _ in 0..20 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move { limiter.check("t1:post").await.allowed }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 5, "exactly capacity admissions under contention");
    }
}
