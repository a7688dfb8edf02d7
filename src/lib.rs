//! Filter gateway library.
//!
//! Routes inbound HTTP requests through ordered filter chains to pooled
//! upstream connections.

pub mod admin;
pub mod config;
pub mod error;
pub mod filter;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod routing;
pub mod upstream;

pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayResult};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use routing::{GatewayRouter, Route, RouteTable};
