use super::types::{ceil_secs, LimitPolicy, RateLimitResult};
use std::time::Instant;

/// Request count for one key inside its current fixed window.
///
/// A counter carries no lock of its own; callers mutate it only while holding
/// exclusive access to the map slot it lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCounter {
    window_start: Instant,
    count: u32,
}

impl WindowCounter {
    /// Open an empty window at `now`
    pub fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            count: 0,
        }
    }

    /// Try to record one more request at `now`
    pub fn try_consume(&mut self, policy: &LimitPolicy, now: Instant) -> bool {
        self.consume(policy, now).allowed
    }

    /// Record one more request at `now` if it fits, reporting the outcome.
    ///
    /// An elapsed window is re-armed with this request as its first.
    /// A rejected request leaves the count untouched.
    pub fn consume(&mut self, policy: &LimitPolicy, now: Instant) -> RateLimitResult {
        if self.is_expired(policy, now) {
            self.window_start = now;
            self.count = 1;
        } else if self.count < policy.max_requests() {
            self.count += 1;
        } else {
            return RateLimitResult::denied(policy.max_requests(), self.reset_after(policy, now));
        }

        RateLimitResult::allowed(
            policy.max_requests() - self.count,
            policy.max_requests(),
            self.reset_after(policy, now),
        )
    }

    /// Whether the window containing this counter has elapsed at `now`
    pub fn is_expired(&self, policy: &LimitPolicy, now: Instant) -> bool {
        now.saturating_duration_since(self.window_start) >= policy.window()
    }

    /// Requests recorded in the current window
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn window_start(&self) -> Instant {
        self.window_start
    }

    fn reset_after(&self, policy: &LimitPolicy, now: Instant) -> u64 {
        let window_end = self.window_start + policy.window();
        ceil_secs(window_end.saturating_duration_since(now))
    }
}
