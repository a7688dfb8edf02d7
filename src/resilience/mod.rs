//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to upstream:
//!     → dispatcher enforces the route timeout
//!     → On failure: retries.rs (check if retryable, retry with backoff)
//!     → backoff.rs (exponential delay with jitter)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every upstream call has a deadline
//! - Retries only for idempotent requests with a replayable body
//! - Only unreachable-upstream failures are retried

pub mod backoff;
pub mod retries;

pub use retries::RetryPolicy;
