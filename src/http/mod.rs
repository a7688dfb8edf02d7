//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, body limit)
//!     → request.rs (RequestDescriptor + RequestBody)
//!     → exchange.rs (per-request context through the filter chain)
//!     → response.rs (ResponseDescriptor, hop-by-hop stripping, error bodies)
//!     → websocket.rs (upgrade detection, upstream socket, frame relay)
//!     → Send to client
//! ```

pub mod exchange;
pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use server::{spawn_reload_loop, AppState, HttpServer};

/// Correlation header set on every inbound request and echoed back.
pub const X_REQUEST_ID: &str = "x-request-id";
