//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges and cross-field constraints
//! - Reject malformed origins, header overrides, and limiter patterns
//!   before the server starts
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Validation is a pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before the config is accepted into the system

use std::net::SocketAddr;

use axum::http::{HeaderName, HeaderValue};
use thiserror::Error;
use url::Url;

use crate::config::schema::ProxyConfig;
use crate::security::rate_limit::build_unlimited_pattern;

/// A single semantic problem in a configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("listener.bind_address {0:?} is not a valid socket address")]
    BindAddress(String),
    #[error("observability.metrics_address {0:?} is not a valid socket address")]
    MetricsAddress(String),
    #[error("rate_limit.max_requests_per_period is set but period_minutes is zero")]
    RateLimitPeriod,
    #[error("rate_limit.unlimited_hosts: {0}")]
    RateLimitPattern(String),
    #[error("{list} entry {origin:?} is not an absolute URL")]
    Origin { list: &'static str, origin: String },
    #[error("headers.set name {0:?} is not a valid header name")]
    HeaderName(String),
    #[error("headers.set value for {0:?} is not a valid header value")]
    HeaderValue(String),
    #[error("upstream.outbound_proxy {0:?} is not a valid URL")]
    OutboundProxy(String),
    #[error("timeouts.{0} must be greater than zero")]
    Timeout(&'static str),
}

/// Check a parsed configuration for semantic problems, collecting every
/// error rather than stopping at the first.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(
            config.listener.bind_address.clone(),
        ));
    }
    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if config.rate_limit.max_requests_per_period > 0 && config.rate_limit.period_minutes == 0 {
        errors.push(ValidationError::RateLimitPeriod);
    }
    if let Err(err) = build_unlimited_pattern(&config.rate_limit.unlimited_hosts) {
        errors.push(ValidationError::RateLimitPattern(err.to_string()));
    }

    for (list, origins) in [
        ("policy.origin_blacklist", &config.policy.origin_blacklist),
        ("policy.origin_whitelist", &config.policy.origin_whitelist),
    ] {
        for origin in origins {
            if Url::parse(origin).is_err() {
                errors.push(ValidationError::Origin {
                    list,
                    origin: origin.clone(),
                });
            }
        }
    }

    for (name, value) in &config.headers.set {
        if HeaderName::from_bytes(name.as_bytes()).is_err() {
            errors.push(ValidationError::HeaderName(name.clone()));
        }
        if HeaderValue::from_str(value).is_err() {
            errors.push(ValidationError::HeaderValue(name.clone()));
        }
    }

    if let Some(proxy) = &config.upstream.outbound_proxy {
        if Url::parse(proxy).is_err() {
            errors.push(ValidationError::OutboundProxy(proxy.clone()));
        }
    }

    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::Timeout("connect_secs"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::Timeout("request_secs"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
