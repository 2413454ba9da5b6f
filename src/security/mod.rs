//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → proxy::policy (ordered access checks)
//!     → rate_limit.rs (per-origin request counting)
//!     → Pass to the redirect chase
//! ```
//!
//! # Design Decisions
//! - Fail closed: a non-empty whitelist denies requests without an Origin
//! - No trust in client input

pub mod rate_limit;

pub use rate_limit::{HostRateLimiter, RateLimitError};
