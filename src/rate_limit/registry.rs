use super::local::KeyedLimiter;
use super::types::{composite_key, LimitPolicy, RateLimitResult};
use crate::config::RateLimitSettings;
use crate::error::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Name under which the fallback policy is reported in errors and logs
pub const FALLBACK_COMMAND: &str = "default";

/// Maps command names to their limiters, with one fallback for everything else.
///
/// Built once at startup; the map itself is never mutated afterwards, only
/// the counters inside each limiter.
#[derive(Debug)]
pub struct CommandLimiterRegistry {
    limiters: HashMap<String, Arc<KeyedLimiter>>,
    fallback: Arc<KeyedLimiter>,
}

impl CommandLimiterRegistry {
    /// Build a registry from per-command limits and a fallback limit.
    ///
    /// Every command shares `window`. Fails without building anything if any
    /// limit is zero, naming the command at fault.
    pub fn build(limits: HashMap<String, u32>, fallback_max: u32, window: Duration) -> Result<Self> {
        let fallback = LimitPolicy::new(FALLBACK_COMMAND, fallback_max, window)?;

        let mut commands: Vec<(String, u32)> = limits.into_iter().collect();
        commands.sort();

        let limiters = commands
            .into_iter()
            .map(|(command, max)| -> Result<(String, Arc<KeyedLimiter>)> {
                let policy = LimitPolicy::new(&command, max, window)?;
                Ok((command, Arc::new(KeyedLimiter::new(policy))))
            })
            .collect::<Result<HashMap<_, _>>>()?;

        info!(
            commands = limiters.len(),
            fallback_max,
            window_secs = window.as_secs_f64(),
            "Command rate limiters initialized"
        );

        Ok(Self {
            limiters,
            fallback: Arc::new(KeyedLimiter::new(fallback)),
        })
    }

    /// Build a registry from the rate limiting section of the config
    pub fn from_config(settings: &RateLimitSettings) -> Result<Self> {
        Self::build(
            settings.commands.clone(),
            settings.default,
            settings.window(),
        )
    }

    /// The limiter for `command`, or the fallback when none is registered
    pub fn resolve(&self, command: &str) -> &Arc<KeyedLimiter> {
        match self.limiters.get(command) {
            Some(limiter) => limiter,
            None => {
                debug!(command = %command, "No limiter for command, using fallback");
                &self.fallback
            }
        }
    }

    /// Name of the policy that applies to `command`
    pub fn policy_name<'a>(&'a self, command: &'a str) -> &'a str {
        if self.limiters.contains_key(command) {
            command
        } else {
            FALLBACK_COMMAND
        }
    }

    /// Check and record a request by `client_key` for `command` at `now`.
    ///
    /// Counters are keyed by client and command, so commands sharing the
    /// fallback limiter still count independently.
    pub fn check(&self, command: &str, client_key: &str, now: Instant) -> RateLimitResult {
        self.resolve(command)
            .check(&composite_key(client_key, command), now)
    }

    /// Drop expired counters from every limiter, returning how many went
    pub fn sweep(&self, now: Instant) -> usize {
        self.limiters
            .values()
            .chain(std::iter::once(&self.fallback))
            .map(|limiter| limiter.sweep(now))
            .sum()
    }

    /// The fallback limiter
    pub fn fallback(&self) -> &Arc<KeyedLimiter> {
        &self.fallback
    }

    /// Names of all commands with their own limiter
    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.limiters.keys().map(String::as_str)
    }
}
