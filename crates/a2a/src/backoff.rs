//! Exponential backoff with full jitter.

use std::time::Duration;

use am_domain::config::AgentClientConfig;

/// Retry timing: `base × 2^attempt`, capped, with full jitter.
#[derive(Debug, Clone)]
pub struct RetryBackoff {
    pub base: Duration,
    pub cap: Duration,
    pub max_retries: u32,
}

impl RetryBackoff {
    pub fn from_config(cfg: &AgentClientConfig) -> Self {
        Self {
            base: Duration::from_millis(cfg.backoff_base_ms),
            cap: Duration::from_millis(cfg.backoff_cap_ms),
            max_retries: cfg.max_retries,
        }
    }

    /// Delay before retry number `attempt` (0-indexed). Full jitter: a
    /// uniform fraction of the capped exponential ceiling, so retry storms
    /// from many clients spread out instead of synchronizing.
    pub fn delay_for_attempt(&self, attempt: u32, nonce: u32) -> Duration {
        let base_ms = self.base.as_millis() as f64;
        let ceiling_ms = (base_ms * 2f64.powi(attempt.min(16) as i32))
            .min(self.cap.as_millis() as f64);
        let jittered = ceiling_ms * pseudo_random_fraction(attempt.wrapping_add(nonce));
        Duration::from_millis(jittered as u64)
    }
}

/// Cheap deterministic "random" fraction [0, 1) from a seed.
/// Not cryptographically secure — just enough to spread retries.
fn pseudo_random_fraction(seed: u32) -> f64 {
    let hash = seed.wrapping_mul(2654435761); // Knuth multiplicative hash
    (hash as f64) / (u32::MAX as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryBackoff {
        RetryBackoff::from_config(&AgentClientConfig::default())
    }

    #[test]
    fn defaults_from_config() {
        let p = policy();
        assert_eq!(p.base, Duration::from_millis(250));
        assert_eq!(p.cap, Duration::from_millis(4000));
        assert_eq!(p.max_retries, 3);
    }

    #[test]
    fn delay_never_exceeds_cap() {
        let p = policy();
        for attempt in 0..20 {
            for nonce in [0, 7, 99, 4096] {
                assert!(p.delay_for_attempt(attempt, nonce) <= p.cap);
            }
        }
    }

    #[test]
    fn delay_is_within_full_jitter_ceiling() {
        let p = policy();
        // Attempt 1 ceiling: 250 * 2 = 500 ms.
        for nonce in 0..50 {
            assert!(p.delay_for_attempt(1, nonce) <= Duration::from_millis(500));
        }
    }

    #[test]
    fn delay_is_deterministic_per_seed() {
        let p = policy();
        assert_eq!(p.delay_for_attempt(2, 42), p.delay_for_attempt(2, 42));
    }

    #[test]
    fn fraction_is_in_unit_interval() {
        for seed in [0u32, 1, 17, 123_456, u32::MAX] {
            let f = pseudo_random_fraction(seed);
            assert!((0.0..1.0).contains(&f), "fraction out of range: {f}");
        }
    }
}
