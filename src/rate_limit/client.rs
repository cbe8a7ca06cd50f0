use super::client_ip::ClientIpResolver;
use super::clock::{Clock, SystemClock};
use super::local::KeyedLimiter;
use super::middleware::{
    add_rate_limit_headers, connect_addr, create_rate_limit_response, resolve_client,
    DEFAULT_LIMIT_MESSAGE,
};
use super::types::{LimitPolicy, RateLimitResult};
use crate::config::{RateLimitSettings, RequestLimitConfig};
use crate::error::Result;
use crate::metrics;
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::{self as axum_middleware, Next},
    response::Response,
    routing::MethodRouter,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Policy name of the limiter applied to every proxied request
pub const GLOBAL_POLICY: &str = "global";

/// Limits every request of a client regardless of its command.
///
/// Installed either in front of all proxied routes (the `global` limit) or on
/// a single route with [`attach_limit`]. Each instance owns its counters, so
/// two attached routes never share a budget.
#[derive(Clone)]
pub struct ClientRateLimiter {
    name: Arc<str>,
    limiter: Arc<KeyedLimiter>,
    ip_resolver: Arc<ClientIpResolver>,
    clock: Arc<dyn Clock>,
    message: Arc<str>,
}

impl ClientRateLimiter {
    /// Create a limiter reported as `name`, with default lookups and the system clock
    pub fn new(name: &str, policy: LimitPolicy) -> Self {
        Self {
            name: Arc::from(name),
            limiter: Arc::new(KeyedLimiter::new(policy)),
            ip_resolver: Arc::new(ClientIpResolver::default()),
            clock: Arc::new(SystemClock),
            message: Arc::from(DEFAULT_LIMIT_MESSAGE),
        }
    }

    /// Create a limiter from a request limit, sharing client lookups and the
    /// rejection message with the rest of the rate limiting section
    pub fn from_config(
        name: &str,
        limit: &RequestLimitConfig,
        settings: &RateLimitSettings,
    ) -> Result<Self> {
        Ok(Self::new(name, limit.policy(name)?)
            .with_ip_resolver(ClientIpResolver::new(
                settings.ip_lookups.clone(),
                settings.forwarded_for_index,
            ))
            .with_message(settings.message.as_str()))
    }

    pub fn with_ip_resolver(mut self, resolver: ClientIpResolver) -> Self {
        self.ip_resolver = Arc::new(resolver);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_message(mut self, message: &str) -> Self {
        self.message = Arc::from(message);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Counters behind this limiter, for sweeping
    pub fn limiter(&self) -> &Arc<KeyedLimiter> {
        &self.limiter
    }

    /// Decide whether a request may proceed; `Err` carries the 429 response
    pub fn apply(
        &self,
        headers: &HeaderMap,
        remote_addr: Option<SocketAddr>,
    ) -> std::result::Result<RateLimitResult, Response> {
        let client_key = resolve_client(&self.ip_resolver, headers, remote_addr);
        let result = self.limiter.check(&client_key, self.clock.now());

        metrics::record_decision(&self.name, result.allowed);

        if !result.allowed {
            warn!(
                client = %client_key,
                policy = %self.name,
                limit = result.limit,
                "Client rate limit exceeded"
            );
            return Err(create_rate_limit_response(&self.message, &result));
        }

        debug!(
            client = %client_key,
            policy = %self.name,
            remaining = result.remaining,
            "Client rate limit check passed"
        );

        Ok(result)
    }
}

/// Axum middleware function limiting every request per client.
///
/// Install with `axum::middleware::from_fn_with_state(limiter, client_rate_limit_middleware)`.
pub async fn client_rate_limit_middleware(
    State(limiter): State<ClientRateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    let remote_addr = connect_addr(&request);

    match limiter.apply(request.headers(), remote_addr) {
        Ok(result) => add_rate_limit_headers(next.run(request).await, &result),
        Err(response) => response,
    }
}

/// Wrap a single route's handlers with their own client limiter
pub fn attach_limit<S>(route: MethodRouter<S>, limiter: ClientRateLimiter) -> MethodRouter<S>
where
    S: Clone + Send + Sync + 'static,
{
    route.route_layer(axum_middleware::from_fn_with_state(
        limiter,
        client_rate_limit_middleware,
    ))
}
