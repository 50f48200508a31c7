// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Persisted per-item backoff for the sync queue.
//!
//! After the `n`th failed attempt an item is gated for
//! `min(base * 2^n, max) + jitter`, where jitter is drawn uniformly from
//! `[0, jitter_ratio * min(base * 2^n, max)]`.
//!
//! ```
//! use sync_queue::BackoffPolicy;
//! use std::time::Duration;
//!
//! let policy = BackoffPolicy::default();
//! assert_eq!(policy.max_retries, 5);
//! assert_eq!(policy.capped_delay(1), Duration::from_secs(2));
//! assert_eq!(policy.capped_delay(30), policy.max_delay);
//! ```

use std::time::Duration;

use rand::Rng;

/// Retry budget and delay curve for queue items.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the random extra delay, as a fraction of the capped delay
    pub jitter_ratio: f64,
    /// An item is exhausted once its `retries` reaches this value
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            jitter_ratio: 0.3,
            max_retries: 5,
        }
    }
}

impl BackoffPolicy {
    /// `min(base * 2^retries, max)` without jitter.
    #[must_use]
    pub fn capped_delay(&self, retries: u32) -> Duration {
        // 2^31 * 1ms already exceeds any sane cap; avoid overflowing the shift
        let exp = retries.min(31);
        let factor = 1u64 << exp;
        let base_ms = self.base_delay.as_millis() as u64;
        let raw = base_ms.saturating_mul(factor);
        Duration::from_millis(raw).min(self.max_delay)
    }

    /// Capped delay plus uniform jitter.
    pub fn delay_for<R: Rng + ?Sized>(&self, retries: u32, rng: &mut R) -> Duration {
        let capped = self.capped_delay(retries);
        let ratio = self.jitter_ratio.max(0.0);
        if ratio == 0.0 || capped.is_zero() {
            return capped;
        }
        let jitter = capped.mul_f64(rng.gen_range(0.0..=ratio));
        capped + jitter
    }

    #[must_use]
    pub fn is_exhausted(&self, retries: u32) -> bool {
        retries >= self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_capped_delay_doubles() {
        let policy = BackoffPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            ..Default::default()
        };

        assert_eq!(policy.capped_delay(0), Duration::from_millis(100));
        assert_eq!(policy.capped_delay(1), Duration::from_millis(200));
        assert_eq!(policy.capped_delay(2), Duration::from_millis(400));
        assert_eq!(policy.capped_delay(6), Duration::from_millis(6400));
        assert_eq!(policy.capped_delay(7), Duration::from_secs(10));
    }

    #[test]
    fn test_capped_delay_huge_retry_count() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.capped_delay(u32::MAX), policy.max_delay);
    }

    #[test]
    fn test_jitter_within_bounds() {
        let policy = BackoffPolicy::default();
        let mut rng = StdRng::seed_from_u64(7);

        for retries in 0..12 {
            let capped = policy.capped_delay(retries);
            for _ in 0..50 {
                let d = policy.delay_for(retries, &mut rng);
                assert!(d >= capped, "{d:?} < {capped:?}");
                // 1ms of slack for float rounding in mul_f64
                assert!(d <= capped.mul_f64(1.3) + Duration::from_millis(1), "{d:?} > 1.3 * {capped:?}");
            }
        }
    }

    #[test]
    fn test_zero_jitter_is_exact() {
        let policy = BackoffPolicy {
            jitter_ratio: 0.0,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(policy.delay_for(3, &mut rng), Duration::from_secs(8));
    }

    #[test]
    fn test_is_exhausted() {
        let policy = BackoffPolicy::default();
        assert!(!policy.is_exhausted(4));
        assert!(policy.is_exhausted(5));
        assert!(policy.is_exhausted(6));
    }
}
