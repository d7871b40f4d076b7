//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::route::LoadBalance;

/// Root configuration for the router.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Self-identifier stamped into trace responses.
    pub ip: String,

    /// Shared secret enabling diagnostic response headers; requests whose
    /// `X-Vcap-Trace` header equals this key get `X-Vcap-Router` and
    /// `X-Vcap-Backend` on the response. Empty disables the feature.
    pub trace_key: String,

    /// Force the `Secure` attribute on emitted sticky cookies.
    pub secure_cookies: bool,

    /// Extra request headers the access logger captures.
    pub trace_headers_to_log: Vec<String>,

    /// `User-Agent` value that identifies the platform health checker.
    pub health_check_user_agent: String,

    /// Always advertise `X-Forwarded-Proto: https` to backends.
    pub force_forwarded_proto_https: bool,

    /// Emit Zipkin B3 trace headers.
    pub enable_zipkin: bool,

    /// Default endpoint selection strategy.
    pub load_balance: LoadBalance,

    /// Backend I/O budget per attempt, in seconds. 0 disables it.
    pub endpoint_timeout_secs: u64,

    /// Cooldown before a failed endpoint is preferred again, in seconds.
    pub retry_after_failure_secs: u64,

    /// Interval between route-stats captures, in seconds.
    pub route_stats_interval_secs: u64,

    /// Outbound transport tuning.
    pub transport: TransportConfig,

    /// Route service signature policy.
    pub route_services: RouteServiceSettings,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin endpoint settings.
    pub admin: AdminConfig,

    /// Routes registered at startup, ahead of any control plane traffic.
    pub static_routes: Vec<StaticRoute>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self { bind_address: "0.0.0.0:8080".to_string() }
    }
}

/// Outbound transport tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Disable idle connection reuse to backends.
    pub disable_keep_alives: bool,

    /// Cap on idle connections across all backends.
    pub max_idle_conns: usize,

    /// Cap on idle connections per backend.
    pub max_idle_conns_per_host: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            disable_keep_alives: false,
            max_idle_conns: 100,
            max_idle_conns_per_host: 2,
        }
    }
}

/// Route service signature policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RouteServiceSettings {
    /// How long a forwarded-request signature stays valid, in seconds.
    pub signature_lifetime_secs: u64,
}

impl Default for RouteServiceSettings {
    fn default() -> Self {
        Self { signature_lifetime_secs: 60 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Exporter bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin JSON endpoints.
    pub enabled: bool,

    /// Admin bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// A route registered at startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StaticRoute {
    /// Route URI: host with optional path prefix, e.g. "app.example.com/api".
    pub uri: String,

    /// Backend addresses, "host:port".
    pub backends: Vec<String>,

    /// Application identifier recorded on the endpoints.
    #[serde(default)]
    pub application_id: String,

    /// Route service protecting this route, if any.
    #[serde(default)]
    pub route_service_url: Option<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            ip: "127.0.0.1".to_string(),
            trace_key: String::new(),
            secure_cookies: false,
            trace_headers_to_log: Vec::new(),
            health_check_user_agent: "HTTP-Monitor/1.1".to_string(),
            force_forwarded_proto_https: false,
            enable_zipkin: false,
            load_balance: LoadBalance::RoundRobin,
            endpoint_timeout_secs: 60,
            retry_after_failure_secs: 30,
            route_stats_interval_secs: 30,
            transport: TransportConfig::default(),
            route_services: RouteServiceSettings::default(),
            observability: ObservabilityConfig::default(),
            admin: AdminConfig::default(),
            static_routes: Vec::new(),
        }
    }
}
