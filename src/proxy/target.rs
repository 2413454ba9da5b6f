//! Target URL resolution.
//!
//! # Responsibilities
//! - Parse the inbound path (everything after the mount point) into a
//!   `TargetLocation`
//! - Detect the optional explicit `http://`/`https://` prefix (default: http)
//! - Reject oversized ports and single-slash scheme prefixes before any
//!   network activity
//! - Distinguish "no target, serve help" from "invalid host"
//!
//! # Design Decisions
//! - Parsing is pure and synchronous; every outcome is a value, never a panic
//! - The help-vs-invalid-host heuristic lives in `is_proxyable_host` so the
//!   rule is documented and testable in one place

use std::fmt;

use axum::http::StatusCode;
use thiserror::Error;

/// Outbound scheme of a proxied request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully resolved proxy target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetLocation {
    pub scheme: Scheme,
    /// Lowercased hostname without port.
    pub host: String,
    /// Explicit port, if one was given. `None` means the scheme default.
    pub port: Option<u16>,
    /// Path plus query as received; may be empty.
    pub path: String,
}

impl TargetLocation {
    /// The absolute URL of this target. An empty path renders as `/`.
    pub fn url(&self) -> String {
        let path = if self.path.is_empty() { "/" } else { &self.path };
        format!("{}{}", self.origin(), path)
    }

    /// `scheme://host[:port]`, the target's origin serialization.
    pub fn origin(&self) -> String {
        match self.port {
            Some(port) => format!("{}://{}:{}", self.scheme, self.host, port),
            None => format!("{}://{}", self.scheme, self.host),
        }
    }

    /// The `Host` header value the upstream should observe.
    pub fn host_header(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }

    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.scheme.default_port())
    }
}

/// What the resolver made of the inbound path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A proxyable target was found.
    Target(TargetLocation),
    /// The pseudo-host consumers use to probe whether they need the proxy
    /// at all. Answered directly, without CORS headers.
    Probe,
    /// Nothing to proxy (empty path or unparseable URL); serve the help text.
    NoTarget,
}

/// Terminal resolver failures, mapped onto client-visible statuses.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TargetError {
    #[error("The URL is invalid: two slashes are needed after the http(s):.")]
    MissingSlash,
    #[error("Port number too large: {0}")]
    PortTooLarge(String),
    #[error("Invalid host: {0}")]
    InvalidHost(String),
}

impl TargetError {
    pub fn status(&self) -> StatusCode {
        match self {
            TargetError::MissingSlash | TargetError::PortTooLarge(_) => StatusCode::BAD_REQUEST,
            TargetError::InvalidHost(_) => StatusCode::NOT_FOUND,
        }
    }
}

/// Hostnames a scheme-less request is allowed to reach.
///
/// A bare single-label name (`favicon.ico` without the `.ico`, `localhost`,
/// an intranet host) is almost always a stray browser request rather than a
/// proxy target, so scheme-less paths require a dot in the hostname. An
/// explicit `http://`/`https://` prefix always wins and skips this check.
/// Bare IPv6 literals are not covered by this rule; they too need an
/// explicit scheme prefix.
pub fn is_proxyable_host(host: &str) -> bool {
    host.contains('.')
}

const PROBE_HOST: &str = "iscorsneeded";

/// Resolve the raw path-plus-query (leading slash already stripped) into a
/// target or a terminal outcome.
pub fn resolve(raw: &str) -> Result<Resolution, TargetError> {
    if has_single_slash_scheme(raw) {
        return Err(TargetError::MissingSlash);
    }

    let (scheme, explicit, rest) = split_scheme(raw);

    // Host part runs until the first path or query delimiter.
    let (host_part, path) = match rest.find(['/', '?']) {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    };
    if host_part.is_empty() {
        return Ok(Resolution::NoTarget);
    }

    let (host, port) = split_port(host_part)?;
    if host.is_empty() {
        return Ok(Resolution::NoTarget);
    }
    let host = host.to_ascii_lowercase();

    if host == PROBE_HOST {
        return Ok(Resolution::Probe);
    }
    if !explicit && !is_proxyable_host(&host) {
        return Err(TargetError::InvalidHost(host));
    }

    Ok(Resolution::Target(TargetLocation {
        scheme,
        host,
        port,
        path: path.to_string(),
    }))
}

/// `http:/host` (one slash after the colon) is a mangled absolute URL, not a
/// relative path worth guessing about.
fn has_single_slash_scheme(raw: &str) -> bool {
    for prefix in ["http:/", "https:/"] {
        if raw.len() > prefix.len()
            && raw[..prefix.len()].eq_ignore_ascii_case(prefix)
            && !raw[prefix.len()..].starts_with('/')
        {
            return true;
        }
    }
    false
}

/// Split off an explicit scheme prefix. A bare leading `//` keeps the
/// default scheme with the slashes dropped.
fn split_scheme(raw: &str) -> (Scheme, bool, &str) {
    for (prefix, scheme) in [("https://", Scheme::Https), ("http://", Scheme::Http)] {
        if raw.len() >= prefix.len() && raw[..prefix.len()].eq_ignore_ascii_case(prefix) {
            return (scheme, true, &raw[prefix.len()..]);
        }
    }
    if let Some(rest) = raw.strip_prefix("//") {
        return (Scheme::Http, false, rest);
    }
    (Scheme::Http, false, raw)
}

/// Split a trailing `:<digits>` port off the host part. Only suffixes of one
/// to five digits parse as ports, so `Port number too large` reports values
/// up to 99999 verbatim; longer digit runs stay part of the hostname.
fn split_port(host_part: &str) -> Result<(&str, Option<u16>), TargetError> {
    if let Some(idx) = host_part.rfind(':') {
        let suffix = &host_part[idx + 1..];
        if !suffix.is_empty()
            && suffix.len() <= 5
            && suffix.bytes().all(|b| b.is_ascii_digit())
        {
            // Five digits at most, so the only parse failure is overflow
            // past 65535.
            return match suffix.parse::<u16>() {
                Ok(port) => Ok((&host_part[..idx], Some(port))),
                Err(_) => Err(TargetError::PortTooLarge(suffix.to_string())),
            };
        }
        if suffix.is_empty() {
            // "host:" — dangling colon, ignore it.
            return Ok((&host_part[..idx], None));
        }
    }
    Ok((host_part, None))
}
