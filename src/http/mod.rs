//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, one handler for every method and path)
//!     → proxy::target (resolve the target URL from the path)
//!     → proxy::policy (access checks)
//!     → proxy::chase (outbound request, redirect handling)
//!     → response streamed back to the client
//! ```

pub mod server;

pub use server::{HttpServer, ServerError};
