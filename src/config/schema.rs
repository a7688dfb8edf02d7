//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from TOML files.
//!
//! ```toml
//! [[routes]]
//! id = "get"
//! uri = "http://httpbin.org"
//! predicates = [{ type = "path", patterns = ["/get"] }]
//! filters = [{ type = "add_request_header", name = "Hello", value = "World" }]
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::resilience::RetryPolicy;
use crate::upstream::PoolSettings;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, body limits).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Upstream connection pool.
    pub pool: PoolConfig,

    /// Route definitions, in registration order.
    pub routes: Vec<RouteConfig>,

    /// Filters applied to every route.
    pub default_filters: Vec<FilterConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Hard cap on inbound request bodies, in bytes.
    pub max_body_bytes: usize,

    /// Cap on request bodies buffered for replay, in bytes.
    pub body_cache_limit_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_body_bytes: 10 * 1024 * 1024,
            body_cache_limit_bytes: 1024 * 1024,
        }
    }
}

/// Timeout configuration for upstream operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Default time allowed until upstream response headers, in seconds.
    /// Routes may override it with `timeout_ms`.
    pub request_secs: u64,

    /// Idle pooled connection timeout in seconds.
    pub idle_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
            idle_secs: 60,
        }
    }
}

impl TimeoutConfig {
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum concurrent connections per upstream host:port.
    pub max_connections_per_host: usize,

    /// Maximum idle connections kept per upstream host:port.
    pub max_idle_per_host: usize,

    /// How often expired idle connections are swept, in seconds.
    pub reaper_interval_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections_per_host: 64,
            max_idle_per_host: 16,
            reaper_interval_secs: 30,
        }
    }
}

impl GatewayConfig {
    /// Pool settings assembled from the pool and timeout sections.
    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            max_connections_per_host: self.pool.max_connections_per_host,
            max_idle_per_host: self.pool.max_idle_per_host,
            idle_timeout: Duration::from_secs(self.timeouts.idle_secs),
            connect_timeout: Duration::from_secs(self.timeouts.connect_secs),
        }
    }
}

/// Route configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Unique route identifier, used in logs and metrics.
    pub id: String,

    /// Upstream base URI (`http://host[:port][/base]`).
    pub uri: String,

    /// Lower value is evaluated first.
    #[serde(default)]
    pub priority: i32,

    /// All predicates must match. No predicates matches everything.
    #[serde(default)]
    pub predicates: Vec<PredicateConfig>,

    #[serde(default)]
    pub filters: Vec<FilterConfig>,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    /// Overrides `timeouts.request_secs` for this route.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    #[serde(default)]
    pub retry: RetryPolicy,
}

/// Predicate definitions.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PredicateConfig {
    Path { patterns: Vec<String> },
    Method { methods: Vec<String> },
    Host { pattern: String },
    Header {
        name: String,
        #[serde(default)]
        value: Option<String>,
    },
    Query {
        name: String,
        #[serde(default)]
        value: Option<String>,
    },
    /// Matches when any nested predicate matches.
    Any { predicates: Vec<PredicateConfig> },
    Not { predicate: Box<PredicateConfig> },
    /// Share of traffic within `group`. Only valid at the top level of a
    /// route's predicates.
    Weight { group: String, weight: u32 },
}

/// A filter and an optional explicit order in the user range.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FilterConfig {
    #[serde(flatten)]
    pub kind: FilterKind,

    #[serde(default)]
    pub order: Option<i32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterKind {
    AddRequestHeader { name: String, value: String },
    SetRequestHeader { name: String, value: String },
    RemoveRequestHeader { name: String },
    AddResponseHeader { name: String, value: String },
    RemoveResponseHeader { name: String },
    StripPrefix { parts: usize },
    PrefixPath { prefix: String },
    SetPath { template: String },
    SetStatus { status: u16 },
    RequireHeader {
        name: String,
        #[serde(default = "default_reject_status")]
        status: u16,
    },
}

fn default_reject_status() -> u16 {
    400
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
