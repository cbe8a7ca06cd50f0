use crate::error::{LimiterError, Result};
use std::time::Duration;

/// Composite key separator between client identity and command
const KEY_SEPARATOR: char = '|';

/// Immutable limit applied by one keyed limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitPolicy {
    max_requests: u32,
    window: Duration,
}

impl LimitPolicy {
    /// Create a policy, rejecting a zero limit or a zero window.
    ///
    /// `command` is only used to name the offending entry in the error.
    pub fn new(command: &str, max_requests: u32, window: Duration) -> Result<Self> {
        if max_requests == 0 {
            return Err(LimiterError::invalid_policy(
                command,
                "max requests must be > 0",
            ));
        }
        if window.is_zero() {
            return Err(LimiterError::invalid_policy(command, "window must be > 0"));
        }

        Ok(Self {
            max_requests,
            window,
        })
    }

    /// Maximum number of requests admitted per window
    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Length of one window
    pub fn window(&self) -> Duration {
        self.window
    }
}

/// Rate limit result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitResult {
    /// Whether the request is allowed
    pub allowed: bool,
    /// Remaining requests in the current window
    pub remaining: u32,
    /// Total limit
    pub limit: u32,
    /// When the limit resets (seconds from now, rounded up)
    pub reset_after: u64,
    /// Retry after duration (for 429 responses)
    pub retry_after: Option<u64>,
}

impl RateLimitResult {
    /// Create an allowed result
    pub fn allowed(remaining: u32, limit: u32, reset_after: u64) -> Self {
        Self {
            allowed: true,
            remaining,
            limit,
            reset_after,
            retry_after: None,
        }
    }

    /// Create a denied result
    pub fn denied(limit: u32, retry_after: u64) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            limit,
            reset_after: retry_after,
            retry_after: Some(retry_after),
        }
    }
}

/// Build the counter key for a client issuing a command
pub fn composite_key(client_key: &str, command: &str) -> String {
    let mut key = String::with_capacity(client_key.len() + command.len() + 1);
    key.push_str(client_key);
    key.push(KEY_SEPARATOR);
    key.push_str(command);
    key
}

/// Whole seconds needed to cover `duration`, rounded up
pub(crate) fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}
