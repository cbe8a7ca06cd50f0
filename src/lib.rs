pub mod config;
pub mod error;
pub mod metrics;
pub mod proxy;
pub mod rate_limit;

use crate::config::{GatewayConfig, RateLimitSettings};
use crate::error::{LimiterError, Result};
use crate::metrics::{metrics_handler, MetricsService};
use crate::proxy::{proxy_handler, ProxyState};
use crate::rate_limit::{
    attach_limit, client_rate_limit_middleware, rate_limit_middleware, ClientRateLimiter,
    CommandLimiterRegistry, KeyedLimiter, RateLimitMiddleware, Sweeper, SystemClock,
    GLOBAL_POLICY,
};
use axum::{middleware, routing::any, routing::get, Router as AxumRouter};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Limiters installed in front of the proxied routes.
///
/// A request passes the global limit first, then its command limit, then the
/// limit attached to its route, if any.
#[derive(Clone)]
pub struct GatewayLimiters {
    pub commands: RateLimitMiddleware,
    pub global: Option<ClientRateLimiter>,
    /// Exact paths with their own client limiter
    pub routes: Vec<(String, ClientRateLimiter)>,
}

impl GatewayLimiters {
    /// Build every limiter of the rate limiting section around `registry`
    pub fn from_config(
        registry: Arc<CommandLimiterRegistry>,
        settings: &RateLimitSettings,
    ) -> Result<Self> {
        let global = settings
            .global
            .as_ref()
            .map(|limit| ClientRateLimiter::from_config(GLOBAL_POLICY, limit, settings))
            .transpose()?;

        let mut paths: Vec<_> = settings.routes.iter().collect();
        paths.sort_by(|a, b| a.0.cmp(b.0));
        let routes = paths
            .into_iter()
            .map(|(path, limit)| -> Result<(String, ClientRateLimiter)> {
                Ok((path.clone(), ClientRateLimiter::from_config(path, limit, settings)?))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            commands: RateLimitMiddleware::from_config(registry, settings),
            global,
            routes,
        })
    }

    /// Limiters outside the command registry, for sweeping
    pub fn client_limiters(&self) -> impl Iterator<Item = &Arc<KeyedLimiter>> {
        self.global
            .iter()
            .chain(self.routes.iter().map(|(_, limiter)| limiter))
            .map(ClientRateLimiter::limiter)
    }
}

impl From<RateLimitMiddleware> for GatewayLimiters {
    fn from(commands: RateLimitMiddleware) -> Self {
        Self {
            commands,
            global: None,
            routes: Vec::new(),
        }
    }
}

/// Build the HTTP application.
///
/// Every proxied route sits behind the rate limiting middleware; the metrics
/// endpoint, when present, does not.
pub fn build_router(
    proxy_state: ProxyState,
    limiters: impl Into<GatewayLimiters>,
    metrics: Option<(&str, MetricsService)>,
) -> AxumRouter {
    let limiters = limiters.into();

    let mut proxy: AxumRouter<ProxyState> = AxumRouter::new();
    for (path, limiter) in &limiters.routes {
        proxy = proxy.route(path, attach_limit(any(proxy_handler), limiter.clone()));
    }
    if !limiters.routes.iter().any(|(path, _)| path == "/") {
        proxy = proxy.route("/", any(proxy_handler));
    }

    let mut proxy = proxy.route("/*path", any(proxy_handler)).route_layer(
        middleware::from_fn_with_state(limiters.commands, rate_limit_middleware),
    );
    if let Some(global) = limiters.global {
        proxy = proxy.route_layer(middleware::from_fn_with_state(
            global,
            client_rate_limit_middleware,
        ));
    }

    let mut app = proxy.with_state(proxy_state);

    if let Some((path, service)) = metrics {
        app = app.merge(
            AxumRouter::new()
                .route(path, get(metrics_handler))
                .with_state(service),
        );
    }

    app.layer(TraceLayer::new_for_http())
}

/// Initialize the gateway server
pub async fn init_gateway(config: GatewayConfig) -> Result<()> {
    config.validate()?;

    info!("Starting command rate limiting gateway");

    // Invalid limits abort startup here, before any request is served
    let registry = Arc::new(CommandLimiterRegistry::from_config(&config.rate_limiting)?);
    info!(
        commands = registry.commands().count(),
        fallback = registry.fallback().policy().max_requests(),
        "Loaded command limits"
    );

    let limiters = GatewayLimiters::from_config(registry.clone(), &config.rate_limiting)?;
    for (path, limiter) in &limiters.routes {
        info!(
            path = %path,
            policy = %limiter.name(),
            max_requests = limiter.limiter().policy().max_requests(),
            "Attached route limit"
        );
    }
    if let Some(global) = &limiters.global {
        info!(
            max_requests = global.limiter().policy().max_requests(),
            window_secs = global.limiter().policy().window().as_secs_f64(),
            "Global client limit enabled"
        );
    }

    let sweeper = config.rate_limiting.sweep_interval().map(|period| {
        limiters
            .client_limiters()
            .fold(
                Sweeper::new(registry.clone(), Arc::new(SystemClock), period),
                |sweeper, limiter| sweeper.with_limiter(limiter.clone()),
            )
            .spawn()
    });
    let proxy_state = ProxyState::new(
        &config.upstream.url,
        Duration::from_secs(config.server.timeout_secs),
    )?;

    let metrics = if config.metrics.enabled {
        Some((config.metrics.path.as_str(), MetricsService::new()?))
    } else {
        None
    };

    let app = build_router(proxy_state, limiters, metrics);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(LimiterError::Io)?;

    info!(addr = %addr, upstream = %config.upstream.url, "Gateway ready to accept connections");

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| LimiterError::Internal(format!("Server error: {}", e)));

    if let Some(handle) = sweeper {
        handle.abort();
    }

    served
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            warn!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}

/// Initialize tracing/logging
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cmdgate=debug,tower_http=debug".into()),
        )
        .with_target(false)
        .compact()
        .init();
}
