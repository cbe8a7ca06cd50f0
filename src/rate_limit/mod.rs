//! Per-command rate limiting
//!
//! Requests are counted per client and per command inside fixed windows:
//!
//! - **WindowCounter**: count and window start for one key
//! - **KeyedLimiter**: one policy applied to any number of keys
//! - **CommandLimiterRegistry**: command name to limiter, with a fallback
//! - **Middleware**: resolves client and command, then forwards or answers 429
//! - **ClientRateLimiter**: one budget per client for every request, either
//!   in front of all routes or attached to a single route
//!
//! # Example
//!
//! ```rust,no_run
//! use cmdgate::rate_limit::{CommandLimiterRegistry, RateLimitMiddleware, rate_limit_middleware};
//! use axum::{middleware, routing::get, Router};
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let limits = HashMap::from([("search".to_string(), 2)]);
//! let registry = CommandLimiterRegistry::build(limits, 5, Duration::from_secs(60)).unwrap();
//! let limiter = RateLimitMiddleware::new(Arc::new(registry));
//!
//! let app: Router = Router::new()
//!     .route("/api/:command", get(|| async { "ok" }))
//!     .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));
//! ```

pub mod client;
pub mod client_ip;
pub mod clock;
pub mod command;
pub mod local;
pub mod middleware;
pub mod registry;
pub mod sweeper;
pub mod types;
pub mod window;

// Re-export commonly used types
pub use client::{attach_limit, client_rate_limit_middleware, ClientRateLimiter, GLOBAL_POLICY};
pub use client_ip::{ClientIpResolver, IpLookup};
pub use clock::{Clock, ManualClock, SystemClock};
pub use command::CommandSource;
pub use local::KeyedLimiter;
pub use middleware::{add_rate_limit_headers, rate_limit_middleware, RateLimitMiddleware};
pub use registry::CommandLimiterRegistry;
pub use sweeper::Sweeper;
pub use types::{LimitPolicy, RateLimitResult};
pub use window::WindowCounter;
