use super::client_ip::ClientIpResolver;
use super::clock::{Clock, SystemClock};
use super::command::CommandSource;
use super::registry::CommandLimiterRegistry;
use super::types::{composite_key, RateLimitResult};
use crate::config::RateLimitSettings;
use crate::error::{write_error, ErrorResponse};
use crate::metrics;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Message written in the body of every 429 response unless configured otherwise
pub const DEFAULT_LIMIT_MESSAGE: &str = "You have reached maximum request limit.";

/// Client key used when no lookup yields an address
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Rate limiting middleware state
#[derive(Clone)]
pub struct RateLimitMiddleware {
    registry: Arc<CommandLimiterRegistry>,
    ip_resolver: Arc<ClientIpResolver>,
    command_source: Arc<CommandSource>,
    clock: Arc<dyn Clock>,
    message: Arc<str>,
}

impl RateLimitMiddleware {
    /// Create a middleware with default lookups, path-based commands and the system clock
    pub fn new(registry: Arc<CommandLimiterRegistry>) -> Self {
        Self {
            registry,
            ip_resolver: Arc::new(ClientIpResolver::default()),
            command_source: Arc::new(CommandSource::default()),
            clock: Arc::new(SystemClock),
            message: Arc::from(DEFAULT_LIMIT_MESSAGE),
        }
    }

    /// Create a middleware configured from the rate limiting section
    pub fn from_config(registry: Arc<CommandLimiterRegistry>, settings: &RateLimitSettings) -> Self {
        Self::new(registry)
            .with_ip_resolver(ClientIpResolver::new(
                settings.ip_lookups.clone(),
                settings.forwarded_for_index,
            ))
            .with_command_source(settings.command_source.clone())
            .with_message(settings.message.as_str())
    }

    pub fn with_ip_resolver(mut self, resolver: ClientIpResolver) -> Self {
        self.ip_resolver = Arc::new(resolver);
        self
    }

    pub fn with_command_source(mut self, source: CommandSource) -> Self {
        self.command_source = Arc::new(source);
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

    pub fn registry(&self) -> &Arc<CommandLimiterRegistry> {
        &self.registry
    }

    /// Decide whether a request may proceed.
    ///
    /// `Err` carries the finished 429 response; the caller must not forward
    /// the request in that case.
    pub fn apply(
        &self,
        headers: &HeaderMap,
        uri: &axum::http::Uri,
        remote_addr: Option<SocketAddr>,
    ) -> Result<RateLimitResult, Response> {
        let client_key = resolve_client(&self.ip_resolver, headers, remote_addr);
        let command = self.command_source.extract(uri, headers);

        let limiter = self.registry.resolve(&command);
        let result = limiter.check(&composite_key(&client_key, &command), self.clock.now());
        let policy = self.registry.policy_name(&command);

        metrics::record_decision(policy, result.allowed);

        if !result.allowed {
            warn!(
                client = %client_key,
                command = %command,
                policy = %policy,
                limit = result.limit,
                "Rate limit exceeded"
            );
            return Err(create_rate_limit_response(&self.message, &result));
        }

        debug!(
            client = %client_key,
            command = %command,
            remaining = result.remaining,
            "Rate limit check passed"
        );

        Ok(result)
    }
}

/// Marks a response whose rate limit headers were set by an inner limiter
#[derive(Debug, Clone, Copy)]
struct RateLimitHeadersSet;

/// Client key for a request, or the shared [`UNKNOWN_CLIENT`] bucket
pub(crate) fn resolve_client(
    resolver: &ClientIpResolver,
    headers: &HeaderMap,
    remote_addr: Option<SocketAddr>,
) -> String {
    resolver.resolve(headers, remote_addr).unwrap_or_else(|| {
        debug!("No client address resolved, using shared bucket");
        UNKNOWN_CLIENT.to_string()
    })
}

/// Peer address recorded by `into_make_service_with_connect_info`
pub(crate) fn connect_addr(request: &Request) -> Option<SocketAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0)
}

/// Build the 429 response for a rejected request
pub(crate) fn create_rate_limit_response(message: &str, result: &RateLimitResult) -> Response {
    let mut response = write_error(StatusCode::TOO_MANY_REQUESTS, ErrorResponse::new(message));
    insert_rate_limit_headers(response.headers_mut(), result);
    response.extensions_mut().insert(RateLimitHeadersSet);

    if let Some(retry) = result.retry_after {
        response
            .headers_mut()
            .insert("Retry-After", HeaderValue::from(retry));
    }

    response
}

/// Axum middleware function for rate limiting.
///
/// Install with `axum::middleware::from_fn_with_state(state, rate_limit_middleware)`
/// ahead of any handler with side effects.
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimitMiddleware>,
    request: Request,
    next: Next,
) -> Response {
    let remote_addr = connect_addr(&request);

    match limiter.apply(request.headers(), request.uri(), remote_addr) {
        Ok(result) => add_rate_limit_headers(next.run(request).await, &result),
        Err(response) => response,
    }
}

/// Add rate limit headers to successful responses.
///
/// When limiters are stacked the innermost one reports: a response already
/// carrying headers from an inner limiter is left as is.
pub fn add_rate_limit_headers(mut response: Response, result: &RateLimitResult) -> Response {
    if response.extensions().get::<RateLimitHeadersSet>().is_none() {
        insert_rate_limit_headers(response.headers_mut(), result);
        response.extensions_mut().insert(RateLimitHeadersSet);
    }
    response
}

fn insert_rate_limit_headers(headers: &mut HeaderMap, result: &RateLimitResult) {
    headers.insert("X-RateLimit-Limit", HeaderValue::from(result.limit));
    headers.insert("X-RateLimit-Remaining", HeaderValue::from(result.remaining));
    headers.insert("X-RateLimit-Reset", HeaderValue::from(result.reset_after));
}
