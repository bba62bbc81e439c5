//! Rate Limiter
//!
//! Token bucket limiter shared by the mutating RPC methods. Read-only
//! methods (status, stats) are not limited.

use std::time::Instant;
use tokio::sync::Mutex;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket rate limiter
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    max_burst: f64,
    rate_per_sec: f64,
}

impl RateLimiter {
    pub fn new(max_burst: u32, rate_per_sec: u32) -> Self {
        Self {
            bucket: Mutex::new(Bucket {
                tokens: max_burst as f64,
                last_refill: Instant::now(),
            }),
            max_burst: max_burst as f64,
            rate_per_sec: rate_per_sec as f64,
        }
    }

    /// Take one token. Returns false when the bucket is empty.
    pub async fn check(&self) -> bool {
        let mut bucket = self.bucket.lock().await;

        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate_per_sec).min(self.max_burst);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_burst_is_bounded() {
        let limiter = RateLimiter::new(3, 1);
        assert!(limiter.check().await);
        assert!(limiter.check().await);
        assert!(limiter.check().await);
        assert!(!limiter.check().await);
    }

    #[tokio::test]
    async fn test_tokens_refill_over_time() {
        let limiter = RateLimiter::new(1, 1000);
        assert!(limiter.check().await);
        assert!(!limiter.check().await);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(limiter.check().await);
    }
}
