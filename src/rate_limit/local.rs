use super::types::{LimitPolicy, RateLimitResult};
use super::window::WindowCounter;
use dashmap::DashMap;
use std::time::Instant;
use tracing::{debug, trace};

/// Local (in-memory) fixed-window limiter applying one policy to many keys
#[derive(Debug)]
pub struct KeyedLimiter {
    /// Window counters per key
    counters: DashMap<String, WindowCounter>,
    /// Policy shared by every key
    policy: LimitPolicy,
}

impl KeyedLimiter {
    /// Create a new keyed limiter
    pub fn new(policy: LimitPolicy) -> Self {
        Self {
            counters: DashMap::new(),
            policy,
        }
    }

    /// Check whether one more request for `key` fits at `now`
    pub fn admit(&self, key: &str, now: Instant) -> bool {
        self.check(key, now).allowed
    }

    /// Check and record a request for `key` at `now`.
    ///
    /// Both paths hold the key's shard write lock across lookup and increment:
    /// `get_mut` for an existing counter, `entry` for get-or-insert of a new
    /// one. Concurrent callers for one key are therefore serialized.
    pub fn check(&self, key: &str, now: Instant) -> RateLimitResult {
        let result = match self.counters.get_mut(key) {
            Some(mut counter) => counter.consume(&self.policy, now),
            None => {
                let mut counter = self.counters.entry(key.to_string()).or_insert_with(|| {
                    debug!(key = %key, "Creating window counter");
                    WindowCounter::new(now)
                });
                counter.consume(&self.policy, now)
            }
        };

        trace!(
            key = %key,
            allowed = result.allowed,
            remaining = result.remaining,
            "Window counter consulted"
        );

        result
    }

    /// Drop counters whose window has elapsed at `now`, returning how many went.
    ///
    /// A dropped counter behaves exactly like an expired one on the next
    /// request: it restarts with a fresh window.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut removed = 0;
        self.counters.retain(|_, counter| {
            let keep = !counter.is_expired(&self.policy, now);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    /// The policy this limiter enforces
    pub fn policy(&self) -> &LimitPolicy {
        &self.policy
    }

    /// Get the number of tracked keys (for testing/monitoring)
    pub fn active_keys(&self) -> usize {
        self.counters.len()
    }
}
