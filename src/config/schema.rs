//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration for the CORS proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Origin-based access policy.
    pub policy: PolicyConfig,

    /// Outbound header rewriting.
    pub headers: HeaderConfig,

    /// Per-origin rate limiting.
    pub rate_limit: RateLimitConfig,

    /// Outbound transport settings.
    pub upstream: UpstreamConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// `Access-Control-Max-Age` value for preflight responses, in seconds.
    pub cors_max_age: Option<u32>,

    /// Text file served when a request names no target. A built-in usage
    /// text is served when unset.
    pub help_file: Option<PathBuf>,
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
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Origin-based access policy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct PolicyConfig {
    /// Origins denied outright (exact match, checked before the whitelist).
    pub origin_blacklist: Vec<String>,

    /// When non-empty, only these origins may proxy. Requests without an
    /// Origin header are denied too.
    pub origin_whitelist: Vec<String>,

    /// Header names of which at least one must be present on every request.
    /// Empty disables the check.
    pub require_header: Vec<String>,

    /// Answer same-origin requests with a redirect straight to the target
    /// instead of proxying them.
    pub redirect_same_origin: bool,
}

/// Outbound header rewriting.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct HeaderConfig {
    /// Header names dropped from the outbound request.
    pub remove: Vec<String>,

    /// Headers set on the outbound request, overriding any inbound value.
    pub set: BTreeMap<String, String>,
}

/// Per-origin rate limiting. Disabled while either field is zero.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Maximum requests per origin host per window.
    pub max_requests_per_period: u32,

    /// Window length in minutes.
    pub period_minutes: u32,

    /// Hosts exempt from the limit: literal names or `/regex/` patterns
    /// matching the whole host.
    pub unlimited_hosts: Vec<String>,
}

impl RateLimitConfig {
    pub fn enabled(&self) -> bool {
        self.max_requests_per_period > 0 && self.period_minutes > 0
    }
}

/// Outbound transport settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Append X-Forwarded-For/Port/Proto to outbound requests.
    pub xfwd: bool,

    /// Validate upstream TLS certificates.
    pub verify_tls: bool,

    /// Optional forward proxy for all outbound requests.
    pub outbound_proxy: Option<String>,

    /// Redirects followed per request before aborting the chase.
    pub max_redirects: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            xfwd: true,
            verify_tls: true,
            outbound_proxy: None,
            max_redirects: 5,
        }
    }
}

/// Timeout configuration for outbound requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Request timeout (total time for request/response headers) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
