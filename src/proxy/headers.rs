//! Header rewriting for both legs of a proxied request.
//!
//! # Responsibilities
//! - Build the outbound request headers (drops, forwarding metadata,
//!   operator overrides)
//! - Stamp the CORS headers every response must carry
//! - Compute `Access-Control-Expose-Headers` so scripts can read the
//!   diagnostic headers
//! - Centralize header-name normalization shared by the policy gate
//!
//! # Design Decisions
//! - Overrides are applied last and win over both original values and drops
//! - `Access-Control-Request-*` is echoed into the response and never
//!   forwarded upstream

use std::net::IpAddr;

use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_EXPOSE_HEADERS, ACCESS_CONTROL_MAX_AGE, ACCESS_CONTROL_REQUEST_HEADERS,
    ACCESS_CONTROL_REQUEST_METHOD,
};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};

use crate::config::HeaderConfig;

/// Diagnostic header carrying the first URL the proxy contacted.
pub const X_REQUEST_URL: &str = "x-request-url";
/// Diagnostic header carrying the URL the final response came from.
pub const X_FINAL_URL: &str = "x-final-url";
/// Prefix of the per-hop redirect diagnostic headers.
pub const X_CORS_REDIRECT_PREFIX: &str = "x-cors-redirect-";

/// Headers that never travel upstream: connection management is per hop and
/// `Host` comes from the target. `Content-Length` is forwarded as-is so the
/// upstream sees the framing the client declared.
const DROP_OUTBOUND: &[&str] = &[
    "host",
    "connection",
    "proxy-connection",
    "keep-alive",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
];

/// Where the request entered the proxy; used for the X-Forwarded-* trio.
#[derive(Debug, Clone, Copy)]
pub struct ForwardContext {
    pub client_ip: IpAddr,
    /// The proxy's own listening port, not the upstream's.
    pub local_port: u16,
    /// The scheme the client used to reach the proxy.
    pub local_proto: &'static str,
}

/// Lowercase and trim a configured list of header names.
pub fn normalize_names(names: &[String]) -> Vec<String> {
    names
        .iter()
        .map(|n| n.trim().to_ascii_lowercase())
        .filter(|n| !n.is_empty())
        .collect()
}

/// Build the headers for one outbound hop from the inbound request headers.
pub fn outbound_headers(
    inbound: &HeaderMap,
    config: &HeaderConfig,
    xfwd: bool,
    ctx: &ForwardContext,
) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(inbound.len());
    for (name, value) in inbound {
        let name_str = name.as_str();
        if DROP_OUTBOUND.contains(&name_str) {
            continue;
        }
        if name_str == ACCESS_CONTROL_REQUEST_METHOD.as_str()
            || name_str == ACCESS_CONTROL_REQUEST_HEADERS.as_str()
        {
            continue;
        }
        if config.remove.iter().any(|r| r == name_str) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }

    if xfwd {
        append_forwarded(&mut out, "x-forwarded-for", &ctx.client_ip.to_string());
        append_forwarded(&mut out, "x-forwarded-port", &ctx.local_port.to_string());
        append_forwarded(&mut out, "x-forwarded-proto", ctx.local_proto);
    }

    for (name, value) in &config.set {
        let name = match HeaderName::from_bytes(name.to_ascii_lowercase().as_bytes()) {
            Ok(n) => n,
            Err(_) => {
                tracing::warn!(header = %name, "Skipping override with invalid header name");
                continue;
            }
        };
        match HeaderValue::from_str(value) {
            Ok(v) => {
                out.insert(name, v);
            }
            Err(_) => {
                tracing::warn!(header = %name, "Skipping override with invalid header value");
            }
        }
    }

    out
}

/// Join a forwarding header onto any value an earlier proxy already set.
fn append_forwarded(headers: &mut HeaderMap, name: &'static str, value: &str) {
    let name = HeaderName::from_static(name);
    let joined = match headers.get(&name).and_then(|v| v.to_str().ok()) {
        Some(existing) => format!("{existing},{value}"),
        None => value.to_string(),
    };
    if let Ok(v) = HeaderValue::from_str(&joined) {
        headers.insert(name, v);
    }
}

/// Stamp the CORS contract onto a response header map: the wildcard origin,
/// preflight echoes, the optional preflight max-age, and the expose list
/// covering every non-safelisted header present at this point.
pub fn apply_cors(
    headers: &mut HeaderMap,
    request_headers: &HeaderMap,
    method: &Method,
    cors_max_age: Option<u32>,
) {
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));

    if method == Method::OPTIONS {
        if let Some(age) = cors_max_age {
            if let Ok(v) = HeaderValue::from_str(&age.to_string()) {
                headers.insert(ACCESS_CONTROL_MAX_AGE, v);
            }
        }
    }
    if let Some(v) = request_headers.get(ACCESS_CONTROL_REQUEST_METHOD) {
        headers.insert(ACCESS_CONTROL_ALLOW_METHODS, v.clone());
    }
    if let Some(v) = request_headers.get(ACCESS_CONTROL_REQUEST_HEADERS) {
        headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, v.clone());
    }

    if let Some(expose) = expose_list(headers) {
        headers.insert(ACCESS_CONTROL_EXPOSE_HEADERS, expose);
    }
}

/// Comma-join every response header a browser would otherwise hide from
/// script code. Returns `None` when only safelisted headers are present.
fn expose_list(headers: &HeaderMap) -> Option<HeaderValue> {
    let names: Vec<&str> = headers
        .keys()
        .map(HeaderName::as_str)
        .filter(|name| !is_hidden_from_expose(name))
        .collect();
    if names.is_empty() {
        return None;
    }
    HeaderValue::from_str(&names.join(",")).ok()
}

/// CORS-safelisted response headers are readable anyway, the
/// `Access-Control-*` family describes the CORS layer itself, and
/// connection-level headers never reach script code.
fn is_hidden_from_expose(name: &str) -> bool {
    matches!(
        name,
        "cache-control"
            | "content-language"
            | "content-length"
            | "content-type"
            | "expires"
            | "last-modified"
            | "pragma"
            | "connection"
            | "keep-alive"
            | "transfer-encoding"
            | "upgrade"
            | "trailer"
    ) || name.starts_with("access-control-")
}

/// Response headers the proxy refuses to relay.
pub fn strip_response_headers(headers: &mut HeaderMap) {
    headers.remove("set-cookie");
    headers.remove("set-cookie2");
    headers.remove("connection");
    headers.remove("keep-alive");
    headers.remove("transfer-encoding");
    headers.remove("trailer");
    headers.remove("upgrade");
}
