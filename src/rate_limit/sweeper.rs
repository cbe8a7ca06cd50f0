use super::clock::Clock;
use super::local::KeyedLimiter;
use super::registry::CommandLimiterRegistry;
use crate::metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Periodically reclaims expired window counters from every limiter
pub struct Sweeper {
    registry: Arc<CommandLimiterRegistry>,
    /// Limiters living outside the registry (global and per-route)
    extra: Vec<Arc<KeyedLimiter>>,
    clock: Arc<dyn Clock>,
    period: Duration,
}

impl Sweeper {
    pub fn new(registry: Arc<CommandLimiterRegistry>, clock: Arc<dyn Clock>, period: Duration) -> Self {
        Self {
            registry,
            extra: Vec::new(),
            clock,
            period,
        }
    }

    /// Also sweep `limiter`
    pub fn with_limiter(mut self, limiter: Arc<KeyedLimiter>) -> Self {
        self.extra.push(limiter);
        self
    }

    /// Run one sweep now, returning how many counters were removed
    pub fn sweep_once(&self) -> usize {
        let now = self.clock.now();
        let removed = self.registry.sweep(now)
            + self.extra.iter().map(|limiter| limiter.sweep(now)).sum::<usize>();
        if removed > 0 {
            debug!(removed, "Swept expired window counters");
            metrics::record_swept(removed);
        }
        removed
    }

    /// Spawn the sweep loop on the current runtime.
    ///
    /// The task runs until aborted through the returned handle.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;

            info!(
                interval_secs = self.period.as_secs_f64(),
                "Started window counter sweeper"
            );

            loop {
                ticker.tick().await;
                self.sweep_once();
            }
        })
    }
}
