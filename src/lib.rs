//! CORS-enabling reverse proxy library.
//!
//! Proxies arbitrary http(s) URLs given in the request path and stamps
//! `Access-Control-Allow-Origin: *` onto every response, so browser scripts
//! can read resources their own origin would otherwise hide.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod proxy;
pub mod security;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use proxy::{HookOutcome, RateLimitDecision, RateLimitPolicy, RequestHook};
