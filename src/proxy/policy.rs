//! Origin-based access policy.
//!
//! # Responsibilities
//! - Run the ordered gate checks: pre-request hook, required header,
//!   deny/allow lists, rate limit, same-origin shortcut
//! - Produce exactly one `PolicyDecision` per request; the first failing
//!   check wins
//! - Define the pluggable strategy traits (`RequestHook`,
//!   `RateLimitPolicy`) the gate consults
//!
//! # Design Decisions
//! - Strategies return named outcomes (`HookOutcome`, `RateLimitDecision`)
//!   instead of relying on truthiness, so they compose and test in isolation
//! - The gate is synchronous and allocation-light; the only state it reads
//!   is the immutable config snapshot and the rate-limiter collaborator

use axum::body::Body;
use axum::http::header::ORIGIN;
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;

use crate::proxy::target::TargetLocation;

/// What a pre-request hook did with the request.
pub enum HookOutcome {
    /// The hook produced the complete response; the pipeline stops here.
    Handled(Response<Body>),
    /// Proceed with the pipeline.
    Continue,
}

/// Pluggable first gate check. Runs after target resolution but before any
/// policy check, and may either take over the request entirely or annotate
/// extra headers onto whatever response the pipeline eventually produces.
pub trait RequestHook: Send + Sync {
    fn on_request(
        &self,
        parts: &Parts,
        target: Option<&TargetLocation>,
        annotations: &mut HeaderMap,
    ) -> HookOutcome;
}

/// Verdict from the rate-limiting collaborator.
pub enum RateLimitDecision {
    Allow,
    /// Denial message appended to the client-visible 429 body.
    Deny(String),
}

/// Pluggable rate limiter. Receives the declared Origin (or `None`) and owns
/// its own counters and reset clock; the gate only consumes the decision.
pub trait RateLimitPolicy: Send + Sync {
    fn check(&self, origin: Option<&str>) -> RateLimitDecision;
}

/// Terminal verdict of the policy gate.
#[derive(Debug, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Deny { status: StatusCode, body: String },
    /// Same-origin shortcut: send the caller straight to the target.
    RedirectToTarget { location: String },
}

/// The ordered checks of the access policy, borrowed from the config
/// snapshot for one request.
pub struct PolicyGate<'a> {
    /// Lowercased names; at least one must be present when non-empty.
    pub require_header: &'a [String],
    pub origin_blacklist: &'a [String],
    pub origin_whitelist: &'a [String],
    pub redirect_same_origin: bool,
    pub rate_limiter: Option<&'a dyn RateLimitPolicy>,
}

impl PolicyGate<'_> {
    pub fn evaluate(&self, headers: &HeaderMap, target: &TargetLocation) -> PolicyDecision {
        if !self.require_header.is_empty()
            && !self
                .require_header
                .iter()
                .any(|name| headers.contains_key(name.as_str()))
        {
            return PolicyDecision::Deny {
                status: StatusCode::BAD_REQUEST,
                body: format!(
                    "Missing required request header. Must specify one of: {}",
                    self.require_header.join(",")
                ),
            };
        }

        let origin = headers.get(ORIGIN).and_then(|v| v.to_str().ok());

        if let Some(origin) = origin {
            if self.origin_blacklist.iter().any(|o| o == origin) {
                return PolicyDecision::Deny {
                    status: StatusCode::FORBIDDEN,
                    body: String::new(),
                };
            }
        }

        if !self.origin_whitelist.is_empty() {
            let declared = origin.unwrap_or("");
            if !self.origin_whitelist.iter().any(|o| o == declared) {
                return PolicyDecision::Deny {
                    status: StatusCode::FORBIDDEN,
                    body: String::new(),
                };
            }
        }

        if let Some(limiter) = self.rate_limiter {
            if let RateLimitDecision::Deny(message) = limiter.check(origin) {
                return PolicyDecision::Deny {
                    status: StatusCode::TOO_MANY_REQUESTS,
                    body: format!(
                        "The origin \"{}\" has sent too many requests.\n{}",
                        origin.unwrap_or("undefined"),
                        message
                    ),
                };
            }
        }

        if self.redirect_same_origin {
            if let Some(origin) = origin {
                if is_same_origin(origin, target) {
                    return PolicyDecision::RedirectToTarget {
                        location: target.url(),
                    };
                }
            }
        }

        PolicyDecision::Allow
    }
}

/// The declared Origin matches the target's scheme+host+port exactly. The
/// prefix form keeps default-port subtleties identical on both sides: an
/// origin spelling out `:80` never matches a target that omits it.
fn is_same_origin(origin: &str, target: &TargetLocation) -> bool {
    if origin.is_empty() {
        return false;
    }
    let href = target.url();
    href.starts_with(origin) && href.as_bytes().get(origin.len()) == Some(&b'/')
}
