//! The bounded redirect chase.
//!
//! # Responsibilities
//! - Issue the outbound request and decide, per upstream response, whether
//!   to follow a redirect, pass it through, or finish
//! - Keep the per-request chase state explicit (hop list, current target)
//!   so the five-hop bound is one testable guard
//! - Finalize the client response: diagnostics, CORS stamping, cookie
//!   stripping, streamed body
//!
//! # State machine
//! ```text
//! FOLLOWING --3xx(301/302/303, hops<5)--> FOLLOWING   (re-issue as GET)
//! FOLLOWING --3xx(307/308, GET/HEAD)---> FOLLOWING    (method preserved)
//! FOLLOWING --3xx(307/308, other)------> DONE         (Location rewritten through proxy)
//! FOLLOWING --3xx(no usable Location)--> DONE         (passed through)
//! FOLLOWING --3xx(6th redirect)--------> ABORTED_LOOP (302 + diagnostic body)
//! FOLLOWING --non-3xx------------------> DONE
//! FOLLOWING --transport failure--------> error classifier (404)
//! ```
//!
//! Hops are strictly sequential; hop N+1 is not attempted before hop N's
//! response headers have arrived.

use std::io;

use axum::body::Body;
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method};
use axum::response::Response;
use futures_util::TryStreamExt;
use url::Url;

use crate::config::ProxyConfig;
use crate::observability::metrics;
use crate::proxy::error::UpstreamError;
use crate::proxy::headers::{
    self, ForwardContext, X_CORS_REDIRECT_PREFIX, X_FINAL_URL, X_REQUEST_URL,
};
use crate::proxy::target::{self, Resolution, TargetLocation};

const LOOP_ABORT_BODY: &str = "redirecting ad infinitum...";

/// One redirect followed during a chase.
#[derive(Debug, Clone)]
struct Hop {
    status: u16,
    location: String,
}

/// Per-request chase state. Created when the first outbound request is
/// issued and discarded once the response is finalized.
struct ChaseState {
    target: TargetLocation,
    initial_url: String,
    hops: Vec<Hop>,
    max_redirects: usize,
}

impl ChaseState {
    fn new(target: TargetLocation, max_redirects: usize) -> Self {
        let initial_url = target.url();
        Self {
            target,
            initial_url,
            hops: Vec::new(),
            max_redirects,
        }
    }

    fn at_limit(&self) -> bool {
        self.hops.len() >= self.max_redirects
    }

    fn record_hop(&mut self, status: u16, location: String, next: TargetLocation) {
        self.hops.push(Hop { status, location });
        self.target = next;
    }

    /// Diagnostic headers for the final response: the initial URL, one
    /// header per hop followed, and the URL the response came from.
    fn diagnostics(&self) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(self.hops.len() + 2);
        if let Ok(v) = HeaderValue::from_str(&self.initial_url) {
            map.insert(HeaderName::from_static(X_REQUEST_URL), v);
        }
        for (index, hop) in self.hops.iter().enumerate() {
            let name = format!("{}{}", X_CORS_REDIRECT_PREFIX, index + 1);
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&format!("{} {}", hop.status, hop.location)),
            ) {
                map.insert(name, value);
            }
        }
        if let Ok(v) = HeaderValue::from_str(&self.target.url()) {
            map.insert(HeaderName::from_static(X_FINAL_URL), v);
        }
        map
    }
}

/// Where the request entered the proxy.
pub struct CallContext {
    pub forward: ForwardContext,
    /// `scheme://host[:port]` of this proxy, used to route unfollowed
    /// redirects back through it.
    pub proxy_base: String,
}

/// Proxy one request to its target, chasing redirects as needed, and
/// produce the complete client response.
pub async fn run(
    client: &reqwest::Client,
    config: &ProxyConfig,
    parts: &Parts,
    body: Body,
    target: TargetLocation,
    ctx: &CallContext,
) -> Response {
    let mut state = ChaseState::new(target, config.upstream.max_redirects);
    let mut method = parts.method.clone();
    let mut body = Some(reqwest::Body::wrap_stream(body.into_data_stream()));

    loop {
        let mut outbound = headers::outbound_headers(
            &parts.headers,
            &config.headers,
            config.upstream.xfwd,
            &ctx.forward,
        );
        if !state.hops.is_empty() {
            // Follow-up hops carry no body, so no content metadata.
            outbound.remove(header::CONTENT_TYPE);
            outbound.remove(header::CONTENT_LENGTH);
        }

        let mut request = client
            .request(method.clone(), state.target.url())
            .headers(outbound);
        if let Some(b) = body.take() {
            request = request.body(b);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(err) => {
                return error_response(UpstreamError::classify(err), parts, config, &state)
            }
        };

        let status = response.status().as_u16();
        if matches!(status, 301 | 302 | 303 | 307 | 308) {
            let raw_location = response
                .headers()
                .get(header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            if let Some(raw_location) = raw_location {
                if let Some((next, absolute)) = resolve_location(&state.target, &raw_location) {
                    let follow_as_get = matches!(status, 301 | 302 | 303);
                    // 307/308 preserve the method and body; they are only
                    // followed for bodyless methods, since anything else
                    // would mean buffering the request body indefinitely.
                    if follow_as_get || method == Method::GET || method == Method::HEAD {
                        if state.at_limit() {
                            tracing::warn!(
                                url = %state.target.url(),
                                hops = state.hops.len(),
                                "Aborting redirect loop"
                            );
                            return loop_abort(&state, &absolute, parts, config, ctx);
                        }
                        tracing::debug!(
                            status,
                            location = %absolute,
                            hop = state.hops.len() + 1,
                            "Following redirect"
                        );
                        state.record_hop(status, absolute, next);
                        if follow_as_get {
                            // Redirect-as-GET: the original body is dropped
                            // and every later hop is a plain GET.
                            method = Method::GET;
                        }
                        body = None;
                        continue;
                    }
                    // Hand the redirect to the caller, routed back through
                    // the proxy so the re-issued request stays proxied.
                    let rewritten = format!("{}/{}", ctx.proxy_base, absolute);
                    return finalize(response, &state, parts, config, Some(rewritten));
                }
            }
            // No usable Location: nothing to follow, let the caller decide.
        }
        return finalize(response, &state, parts, config, None);
    }
}

/// Resolve a `Location` header against the current target. Returns the next
/// target plus its absolute URL, or `None` when the location is missing a
/// host, malformed, or not http(s).
fn resolve_location(
    current: &TargetLocation,
    raw_location: &str,
) -> Option<(TargetLocation, String)> {
    let base = Url::parse(&current.url()).ok()?;
    let absolute = base.join(raw_location).ok()?;
    if !matches!(absolute.scheme(), "http" | "https") {
        return None;
    }
    let absolute = absolute.to_string();
    match target::resolve(&absolute) {
        Ok(Resolution::Target(next)) => Some((next, absolute)),
        _ => None,
    }
}

/// Build the client response from the upstream one: diagnostics, cookie
/// stripping, CORS stamping, and the body streamed through untouched.
fn finalize(
    response: reqwest::Response,
    state: &ChaseState,
    parts: &Parts,
    config: &ProxyConfig,
    location_override: Option<String>,
) -> Response {
    let status = response.status();
    let mut headers = response.headers().clone();
    headers::strip_response_headers(&mut headers);

    if let Some(location) = location_override {
        if let Ok(v) = HeaderValue::from_str(&location) {
            headers.insert(header::LOCATION, v);
        }
    }
    for (name, value) in state.diagnostics().iter() {
        headers.insert(name.clone(), value.clone());
    }
    headers::apply_cors(&mut headers, &parts.headers, &parts.method, config.cors_max_age);
    metrics::record_redirects(state.hops.len());

    let body = Body::from_stream(response.bytes_stream().map_err(io::Error::other));
    let mut out = Response::new(body);
    *out.status_mut() = status;
    *out.headers_mut() = headers;
    out
}

/// Terminal response for the `ABORTED_LOOP` state: a synthetic 302 with the
/// next location routed back through the proxy and all five hop headers.
fn loop_abort(
    state: &ChaseState,
    next_location: &str,
    parts: &Parts,
    config: &ProxyConfig,
    ctx: &CallContext,
) -> Response {
    let mut headers = state.diagnostics();
    if let Ok(v) = HeaderValue::from_str(&format!("{}/{}", ctx.proxy_base, next_location)) {
        headers.insert(header::LOCATION, v);
    }
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain"),
    );
    headers::apply_cors(&mut headers, &parts.headers, &parts.method, config.cors_max_age);
    metrics::record_redirects(state.hops.len());

    let mut out = Response::new(Body::from(LOOP_ABORT_BODY));
    *out.status_mut() = axum::http::StatusCode::FOUND;
    *out.headers_mut() = headers;
    out
}

/// Terminal response for a transport failure: the error taxonomy maps
/// everything onto one 404 with the raw error text.
fn error_response(
    err: UpstreamError,
    parts: &Parts,
    config: &ProxyConfig,
    state: &ChaseState,
) -> Response {
    tracing::warn!(
        kind = err.kind.label(),
        url = %state.target.url(),
        error = %err,
        "Upstream request failed"
    );
    metrics::record_upstream_failure(err.kind.label());

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain"),
    );
    headers::apply_cors(&mut headers, &parts.headers, &parts.method, config.cors_max_age);

    let mut out = Response::new(Body::from(err.client_body()));
    *out.status_mut() = err.status();
    *out.headers_mut() = headers;
    out
}
