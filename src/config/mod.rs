use crate::error::{LimiterError, Result};
use crate::rate_limit::client::GLOBAL_POLICY;
use crate::rate_limit::client_ip::{default_ip_lookups, IpLookup};
use crate::rate_limit::command::CommandSource;
use crate::rate_limit::middleware::DEFAULT_LIMIT_MESSAGE;
use crate::rate_limit::registry::FALLBACK_COMMAND;
use crate::rate_limit::types::LimitPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Main gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Service that admitted requests are forwarded to
    pub upstream: UpstreamConfig,
    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitSettings,
    /// Prometheus metrics endpoint
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upstream request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Upstream configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the upstream service
    pub url: String,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Requests per window for commands without their own limit
    #[serde(default = "default_max_requests")]
    pub default: u32,
    /// Window length in seconds, shared by every command
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Requests per window by command name
    #[serde(default)]
    pub commands: HashMap<String, u32>,
    /// Ordered lookups used to identify the client
    #[serde(default = "default_ip_lookups")]
    pub ip_lookups: Vec<IpLookup>,
    /// Entry of `X-Forwarded-For` to use, counted from the right
    #[serde(default)]
    pub forwarded_for_index: usize,
    /// Where the command name is read from
    #[serde(default)]
    pub command_source: CommandSource,
    /// Seconds between sweeps of expired counters (0 disables sweeping)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Message returned in the body of 429 responses
    #[serde(default = "default_message")]
    pub message: String,
    /// Per-client limit on every proxied request, checked before the command limit
    #[serde(default)]
    pub global: Option<RequestLimitConfig>,
    /// Per-client limits attached to single routes, by exact path
    #[serde(default)]
    pub routes: HashMap<String, RequestLimitConfig>,
}

/// Per-client limit that does not depend on the command
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestLimitConfig {
    /// Requests per window
    pub max_requests: u32,
    /// Window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl RequestLimitConfig {
    /// Validated policy, with errors reported against `name`
    pub fn policy(&self, name: &str) -> Result<LimitPolicy> {
        LimitPolicy::new(name, self.max_requests, Duration::from_secs(self.window_secs))
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout() -> u64 {
    30
}

fn default_max_requests() -> u32 {
    60
}

fn default_window_secs() -> u64 {
    60
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_message() -> String {
    DEFAULT_LIMIT_MESSAGE.to_string()
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_secs: default_timeout(),
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            default: default_max_requests(),
            window_secs: default_window_secs(),
            commands: HashMap::new(),
            ip_lookups: default_ip_lookups(),
            forwarded_for_index: 0,
            command_source: CommandSource::default(),
            sweep_interval_secs: default_sweep_interval(),
            message: default_message(),
            global: None,
            routes: HashMap::new(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_metrics_path(),
        }
    }
}

impl RateLimitSettings {
    /// Get the window as a Duration
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Sweep period, or `None` when sweeping is disabled
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }

    /// Validate limits, window and request extraction settings.
    ///
    /// Limits are checked in the order the registry builds them, so the
    /// reported entry matches what startup would fail on.
    pub fn validate(&self) -> Result<()> {
        LimitPolicy::new(FALLBACK_COMMAND, self.default, self.window())?;

        let mut commands: Vec<_> = self.commands.iter().collect();
        commands.sort();
        for (command, max) in commands {
            LimitPolicy::new(command, *max, self.window())?;
        }

        if let Some(global) = &self.global {
            global.policy(GLOBAL_POLICY)?;
        }

        let mut routes: Vec<_> = self.routes.iter().collect();
        routes.sort_by(|a, b| a.0.cmp(b.0));
        for (path, limit) in routes {
            if !path.starts_with('/') || path.contains([':', '*']) {
                return Err(LimiterError::Config(format!(
                    "Route limit path must be an exact path starting with '/': {}",
                    path
                )));
            }
            limit.policy(path)?;
        }

        if self.ip_lookups.is_empty() {
            return Err(LimiterError::Config(
                "At least one IP lookup must be configured".to_string(),
            ));
        }
        if self
            .ip_lookups
            .iter()
            .any(|lookup| matches!(lookup, IpLookup::Header(name) if name.trim().is_empty()))
        {
            return Err(LimiterError::Config(
                "IP lookup header name cannot be empty".to_string(),
            ));
        }

        match &self.command_source {
            CommandSource::Header { name } | CommandSource::Query { name }
                if name.trim().is_empty() =>
            {
                Err(LimiterError::Config(
                    "Command source name cannot be empty".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| LimiterError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| LimiterError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.upstream.url.is_empty() {
            return Err(LimiterError::Config(
                "Upstream URL cannot be empty".to_string(),
            ));
        }

        if !self.upstream.url.starts_with("http://") && !self.upstream.url.starts_with("https://") {
            return Err(LimiterError::Config(format!(
                "Upstream URL must start with http:// or https://: {}",
                self.upstream.url
            )));
        }

        if !self.metrics.path.starts_with('/') {
            return Err(LimiterError::Config(format!(
                "Metrics path must start with '/': {}",
                self.metrics.path
            )));
        }

        self.rate_limiting.validate()
    }
}
