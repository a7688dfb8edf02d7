//! Upstream dispatch and connection pooling.
//!
//! # Data Flow
//! ```text
//! Filter chain terminal
//!     → dispatcher.rs (timeout, retry, request rewrite)
//!     → pool.rs (idle reuse or new connection, per-host cap)
//!     → connection.rs (hyper HTTP/1.1 sender, released on body end)
//! ```

pub mod connection;
pub mod dispatcher;
pub mod pool;

pub use connection::{ConnectionId, PoolKey, PooledBody, PooledConnection};
pub use dispatcher::{DispatchPolicy, UpstreamDispatcher};
pub use pool::{ConnectionPool, PoolSettings, PoolStats};
