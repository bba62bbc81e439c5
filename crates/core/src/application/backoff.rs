// Backoff Policy
//
// Exponential backoff with deterministic jitter. The jitter is derived
// from the key (transaction or branch id) so retry timing is
// reproducible in tests while still de-synchronizing independent
// transactions.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base_delay_ms: u64,
    pub factor: f64,
}

impl BackoffPolicy {
    pub fn new(base_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            factor: 2.0,
        }
    }

    /// Delay before retry `attempt` (1-based: attempt 1 waits the base
    /// delay, attempt 2 waits base * factor, and so on), jittered by
    /// +/- 10% from the key.
    pub fn delay_for(&self, key: &str, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        let raw = self.base_delay_ms as f64 * self.factor.powi(exp as i32);

        let seed: u32 = key.chars().map(|c| c as u32).sum();
        let jitter_factor = 0.9 + ((seed % 21) as f64 / 100.0);

        Duration::from_millis((raw * jitter_factor) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_grows_exponentially() {
        let policy = BackoffPolicy::new(100);
        let d1 = policy.delay_for("tx-a", 1);
        let d2 = policy.delay_for("tx-a", 2);
        let d3 = policy.delay_for("tx-a", 3);

        assert!(d2 >= d1 * 2 - Duration::from_millis(1));
        assert!(d3 >= d2 * 2 - Duration::from_millis(1));
    }

    #[test]
    fn test_jitter_is_deterministic_per_key() {
        let policy = BackoffPolicy::new(100);
        assert_eq!(policy.delay_for("tx-a", 2), policy.delay_for("tx-a", 2));
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let policy = BackoffPolicy::new(1000);
        for key in ["tx-1", "tx-2", "branch-xyz", ""] {
            let d = policy.delay_for(key, 1).as_millis() as f64;
            assert!((900.0..=1100.0).contains(&d), "delay {} out of range", d);
        }
    }
}
