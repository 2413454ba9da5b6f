//! HTTP server setup and request orchestration.
//!
//! # Responsibilities
//! - Create the Axum router with the single catch-all proxy handler
//! - Wire up middleware (timeout, tracing)
//! - Build the shared outbound client from the config
//! - Orchestrate the per-request pipeline: preflight, target resolution,
//!   hook, policy gate, redirect chase
//! - Serve the terminal responses that never reach the upstream (help text,
//!   probe answer, policy denials, resolver errors)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, Method, Request, StatusCode, Uri},
    response::Response,
    routing::any,
    Router,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::ProxyConfig;
use crate::observability::metrics;
use crate::proxy::chase::{self, CallContext};
use crate::proxy::headers::{apply_cors, normalize_names, ForwardContext};
use crate::proxy::policy::{
    HookOutcome, PolicyDecision, PolicyGate, RateLimitPolicy, RequestHook,
};
use crate::proxy::target::{self, Resolution};
use crate::security::rate_limit::{HostRateLimiter, RateLimitError};

/// Usage text served when a request names no target and no help file is
/// configured.
const DEFAULT_HELP: &str = include_str!("help.txt");

/// Application state injected into the handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ProxyConfig>,
    pub client: reqwest::Client,
    pub hook: Option<Arc<dyn RequestHook>>,
    pub rate_limiter: Option<Arc<dyn RateLimitPolicy>>,
    /// The port the proxy listens on, reported via X-Forwarded-Port.
    pub local_port: u16,
}

/// The server failed to start.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to build outbound client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("rate limiter: {0}")]
    RateLimit(#[from] RateLimitError),
}

/// HTTP server for the CORS proxy.
pub struct HttpServer {
    config: ProxyConfig,
    hook: Option<Arc<dyn RequestHook>>,
    rate_limiter: Option<Arc<dyn RateLimitPolicy>>,
}

impl HttpServer {
    pub fn new(config: ProxyConfig) -> Self {
        Self {
            config,
            hook: None,
            rate_limiter: None,
        }
    }

    /// Install a pre-request hook that runs after target resolution and
    /// before the policy checks.
    pub fn with_request_hook(mut self, hook: Arc<dyn RequestHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Replace the config-driven rate limiter with a custom policy.
    pub fn with_rate_limiter(mut self, limiter: Arc<dyn RateLimitPolicy>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Run the server on the given listener until the shutdown signal fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;

        let mut config = self.config;
        // Header names compare lowercased everywhere downstream.
        config.policy.require_header = normalize_names(&config.policy.require_header);
        config.headers.remove = normalize_names(&config.headers.remove);

        let client = build_client(&config)?;

        let rate_limiter = match self.rate_limiter {
            Some(limiter) => Some(limiter),
            None if config.rate_limit.enabled() => {
                let limiter = Arc::new(HostRateLimiter::new(
                    config.rate_limit.max_requests_per_period,
                    config.rate_limit.period_minutes,
                    &config.rate_limit.unlimited_hosts,
                )?);
                limiter.spawn_reset(config.rate_limit.period_minutes);
                Some(limiter as Arc<dyn RateLimitPolicy>)
            }
            None => None,
        };

        let state = AppState {
            config: Arc::new(config.clone()),
            client,
            hook: self.hook,
            rate_limiter,
            local_port: addr.port(),
        };

        let app = build_router(&config, state)
            .into_make_service_with_connect_info::<SocketAddr>();

        tracing::info!(address = %addr, "CORS proxy listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the Axum router with all middleware layers.
fn build_router(config: &ProxyConfig, state: AppState) -> Router {
    Router::new()
        .route("/{*path}", any(proxy_handler))
        .route("/", any(proxy_handler))
        .with_state(state)
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.timeouts.request_secs,
        )))
        .layer(TraceLayer::new_for_http())
}

/// Build the shared outbound client. Redirects are handled by the chase, so
/// the client itself never follows them.
fn build_client(config: &ProxyConfig) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .connect_timeout(Duration::from_secs(config.timeouts.connect_secs))
        .danger_accept_invalid_certs(!config.upstream.verify_tls);
    if let Some(proxy) = &config.upstream.outbound_proxy {
        builder = builder.proxy(reqwest::Proxy::all(proxy)?);
    }
    builder.build()
}

/// Main proxy handler: every method, every path.
async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let response = handle(state, peer, request).await;
    metrics::record_request(&method, response.status().as_u16(), start);
    response
}

/// The per-request pipeline.
async fn handle(state: AppState, peer: SocketAddr, request: Request<Body>) -> Response {
    let (parts, body) = request.into_parts();
    let raw = raw_target(&parts.uri);

    tracing::debug!(method = %parts.method, url = %raw, "Proxying request");

    // Preflight terminates here for every path, valid target or not; the
    // browser only wants the CORS headers.
    if parts.method == Method::OPTIONS {
        return preflight_response(&parts, &state.config);
    }

    let resolution = match target::resolve(raw) {
        Ok(resolution) => resolution,
        Err(err) => {
            metrics::record_denied("invalid_target");
            return terminal(err.status(), err.to_string(), &parts, &state.config);
        }
    };

    let mut annotations = HeaderMap::new();
    if let Some(hook) = &state.hook {
        let target = match &resolution {
            Resolution::Target(t) => Some(t),
            _ => None,
        };
        if let HookOutcome::Handled(response) = hook.on_request(&parts, target, &mut annotations)
        {
            return response;
        }
    }

    let mut response = match resolution {
        Resolution::NoTarget => help_response(&parts, &state.config).await,
        Resolution::Probe => probe_response(),
        Resolution::Target(target) => {
            let gate = PolicyGate {
                require_header: &state.config.policy.require_header,
                origin_blacklist: &state.config.policy.origin_blacklist,
                origin_whitelist: &state.config.policy.origin_whitelist,
                redirect_same_origin: state.config.policy.redirect_same_origin,
                rate_limiter: state.rate_limiter.as_deref(),
            };
            match gate.evaluate(&parts.headers, &target) {
                PolicyDecision::Deny { status, body } => {
                    metrics::record_denied(deny_reason(status));
                    terminal(status, body, &parts, &state.config)
                }
                PolicyDecision::RedirectToTarget { location } => {
                    same_origin_redirect(&location, &parts, &state.config)
                }
                PolicyDecision::Allow => {
                    let ctx = CallContext {
                        forward: ForwardContext {
                            client_ip: peer.ip(),
                            local_port: state.local_port,
                            local_proto: "http",
                        },
                        proxy_base: proxy_base(&parts, state.local_port),
                    };
                    chase::run(&state.client, &state.config, &parts, body, target, &ctx).await
                }
            }
        }
    };
    response.headers_mut().extend(annotations);
    response
}

/// The target spec is the request path plus query, leading slash stripped.
fn raw_target(uri: &Uri) -> &str {
    let raw = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());
    raw.strip_prefix('/').unwrap_or(raw)
}

/// `scheme://authority` of this proxy, reconstructed from the Host header.
fn proxy_base(parts: &Parts, local_port: u16) -> String {
    match parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
    {
        Some(host) => format!("http://{host}"),
        None => format!("http://localhost:{local_port}"),
    }
}

fn deny_reason(status: StatusCode) -> &'static str {
    match status {
        StatusCode::BAD_REQUEST => "required_header",
        StatusCode::TOO_MANY_REQUESTS => "rate_limit",
        _ => "origin",
    }
}

/// Empty 200 with the CORS contract; answers every OPTIONS request.
fn preflight_response(parts: &Parts, config: &ProxyConfig) -> Response {
    let mut headers = HeaderMap::new();
    apply_cors(&mut headers, &parts.headers, &parts.method, config.cors_max_age);
    let mut out = Response::new(Body::empty());
    *out.headers_mut() = headers;
    out
}

/// Terminal response produced by the proxy itself; still carries the CORS
/// headers so scripts can read the diagnostic body.
fn terminal(status: StatusCode, body: String, parts: &Parts, config: &ProxyConfig) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain"),
    );
    apply_cors(&mut headers, &parts.headers, &parts.method, config.cors_max_age);
    let mut out = Response::new(Body::from(body));
    *out.status_mut() = status;
    *out.headers_mut() = headers;
    out
}

/// Same-origin shortcut: the page can fetch the target directly, so send it
/// there. Cacheable only per origin.
fn same_origin_redirect(location: &str, parts: &Parts, config: &ProxyConfig) -> Response {
    let mut headers = HeaderMap::new();
    if let Ok(v) = HeaderValue::from_str(location) {
        headers.insert(header::LOCATION, v);
    }
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("private"),
    );
    headers.insert(header::VARY, HeaderValue::from_static("origin"));
    apply_cors(&mut headers, &parts.headers, &parts.method, config.cors_max_age);
    let mut out = Response::new(Body::empty());
    *out.status_mut() = StatusCode::MOVED_PERMANENTLY;
    *out.headers_mut() = headers;
    out
}

/// Usage text for requests that name no target. The configured help file is
/// read per request so operators can edit it without a restart.
async fn help_response(parts: &Parts, config: &ProxyConfig) -> Response {
    let text = match &config.help_file {
        Some(path) => match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(err) => {
                tracing::error!(path = %path.display(), %err, "Failed to read help file");
                let mut out = Response::new(Body::empty());
                *out.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                return out;
            }
        },
        None => DEFAULT_HELP.to_string(),
    };
    terminal(StatusCode::OK, text, parts, config)
}

/// Answer for the `iscorsneeded` pseudo-host. Deliberately served without
/// CORS headers: a script that can read this body does not need the proxy.
fn probe_response() -> Response {
    let mut out = Response::new(Body::from("no"));
    out.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain"),
    );
    out
}
