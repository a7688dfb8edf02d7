//! Retry logic.
//!
//! # Responsibilities
//! - Determine if a failed call may be retried
//! - Supply the delay before the next attempt
//!
//! # Design Decisions
//! - Never retry POST/PATCH (non-idempotent)
//! - Connection failures are retryable; timeouts and malformed responses
//!   are not

use std::time::Duration;

use axum::http::Method;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::resilience::backoff::Backoff;

/// Per-route retry settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one. `1` disables retries.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 50,
            max_delay_ms: 1000,
        }
    }
}

impl RetryPolicy {
    pub fn attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_attempts > 1
    }

    /// Whether another attempt should follow `attempt` (1-based) failing
    /// with `error`.
    pub fn should_retry(&self, attempt: u32, method: &Method, error: &GatewayError) -> bool {
        attempt < self.max_attempts && is_idempotent(method) && error.is_retryable()
    }

    /// Delay before the attempt following failed attempt `attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        Backoff::new(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
        .delay(attempt)
    }
}

/// Idempotent per RFC 9110.
pub fn is_idempotent(method: &Method) -> bool {
    method.is_idempotent()
}
