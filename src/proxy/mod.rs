//! The proxying pipeline.
//!
//! # Data Flow
//! ```text
//! inbound request path
//!     → target.rs (resolve the destination URL)
//!     → policy.rs (hook, required headers, origin lists, rate limit)
//!     → headers.rs (outbound header rewriting)
//!     → chase.rs (outbound request, bounded redirect following)
//!     → headers.rs (CORS stamping, diagnostics, cookie stripping)
//!     → error.rs (transport failures → one client-visible 404)
//! ```

pub mod chase;
pub mod error;
pub mod headers;
pub mod policy;
pub mod target;

pub use policy::{HookOutcome, RateLimitDecision, RateLimitPolicy, RequestHook};
pub use target::{Resolution, TargetLocation};
