//! Token-bucket spam guard.
//!
//! Governor-based rate limiting keyed per author: `max_messages` tokens
//! replenished over `window_ms`. A second guard instance with its own
//! configuration serves call sessions.

use crate::config::SpamConfig;
use dashmap::DashMap;
use governor::{Quota, RateLimiter as GovRateLimiter};
use nonzero_ext::nonzero;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::debug;

/// Type alias for governor's direct rate limiter.
type DirectRateLimiter = governor::DefaultDirectRateLimiter;

/// Thread-safe spam guard using governor.
pub struct SpamGuard {
    limiters: DashMap<String, DirectRateLimiter>,
    quota: Quota,
}

impl SpamGuard {
    /// Create a guard from config.
    pub fn new(config: &SpamConfig) -> Self {
        let burst = NonZeroU32::new(config.max_messages).unwrap_or(nonzero!(5u32));
        // Spread replenishment across the window so a full burst becomes
        // available again one window after it was spent.
        let period = Duration::from_millis((config.window_ms / u64::from(burst.get())).max(1));
        let quota = Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(nonzero!(1u32)))
            .allow_burst(burst);

        Self {
            limiters: DashMap::new(),
            quota,
        }
    }

    /// Check whether the key may send another message.
    ///
    /// Returns `true` if allowed, `false` if rate limited.
    pub fn check(&self, key: &str) -> bool {
        let limiter = self
            .limiters
            .entry(key.to_string())
            .or_insert_with(|| GovRateLimiter::direct(self.quota));

        let allowed = limiter.check().is_ok();
        if !allowed {
            debug!(key = %key, "spam rate limit exceeded");
        }
        allowed
    }

    /// Drop accumulated limiter state.
    ///
    /// Buckets refill within one window, so discarding state is harmless;
    /// the map would otherwise grow with every author ever seen.
    pub fn cleanup(&self, max_entries: usize) {
        if self.limiters.len() > max_entries {
            self.limiters.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard(max: u32, window_ms: u64) -> SpamGuard {
        SpamGuard::new(&SpamConfig {
            window_ms,
            max_messages: max,
        })
    }

    #[test]
    fn allows_burst_then_limits() {
        let guard = guard(3, 60_000);
        assert!(guard.check("u1"));
        assert!(guard.check("u1"));
        assert!(guard.check("u1"));
        assert!(!guard.check("u1"));
    }

    #[test]
    fn keys_are_independent() {
        let guard = guard(1, 60_000);
        assert!(guard.check("u1"));
        assert!(!guard.check("u1"));
        assert!(guard.check("u2"));
    }

    #[test]
    fn cleanup_bounds_the_map() {
        let guard = guard(1, 60_000);
        for i in 0..10 {
            guard.check(&format!("u{i}"));
        }
        guard.cleanup(5);
        assert_eq!(guard.limiters.len(), 0);
        // A cleared bucket starts full again.
        assert!(guard.check("u1"));
    }
}
