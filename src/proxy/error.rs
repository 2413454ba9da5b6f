//! Classification of upstream transport failures.
//!
//! Everything that goes wrong between the proxy and the target — DNS,
//! connect, TLS validation, protocol parsing, timeouts — resolves to one
//! client-visible 404 carrying the raw error text, since the audience is
//! developers debugging their own proxied calls. Failures after response
//! streaming has begun cannot change the status; the connection is simply
//! aborted.

use axum::http::StatusCode;
use thiserror::Error;

/// Broad category of an upstream failure, for logging and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    Tls,
    Connect,
    Protocol,
}

impl FailureKind {
    pub fn label(self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Tls => "tls",
            FailureKind::Connect => "connect",
            FailureKind::Protocol => "protocol",
        }
    }
}

/// An outbound request failed before a well-formed upstream response was
/// available.
#[derive(Debug, Error)]
#[error("{}", describe(.source))]
pub struct UpstreamError {
    pub kind: FailureKind,
    #[source]
    source: reqwest::Error,
}

impl UpstreamError {
    pub fn classify(source: reqwest::Error) -> Self {
        let kind = if source.is_timeout() {
            FailureKind::Timeout
        } else if is_tls_failure(&source) {
            FailureKind::Tls
        } else if source.is_connect() {
            FailureKind::Connect
        } else {
            FailureKind::Protocol
        };
        Self { kind, source }
    }

    /// Failures surface as 404 when nothing has been written to the client.
    pub fn status(&self) -> StatusCode {
        StatusCode::NOT_FOUND
    }

    pub fn client_body(&self) -> String {
        format!("Not found because of proxy error: {self}")
    }
}

/// The top-level reqwest message is vague ("error sending request"); the
/// actionable cause sits further down the source chain.
fn describe(err: &reqwest::Error) -> String {
    let mut text = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

/// TLS problems do not get a dedicated reqwest predicate; sniff the source
/// chain instead.
fn is_tls_failure(err: &reqwest::Error) -> bool {
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        let text = cause.to_string().to_ascii_lowercase();
        if text.contains("certificate") || text.contains("tls") || text.contains("ssl") {
            return true;
        }
        source = cause.source();
    }
    false
}
