//! Gateway error taxonomy.
//!
//! # Design Decisions
//! - Internal components report failures as `GatewayError` values and never
//!   swallow them; translation into an HTTP response happens only at the
//!   server boundary (`http::response::error_response`)
//! - A filter short-circuit is not an error: the filter simply sets a
//!   response and does not continue the chain
//! - Only `UpstreamUnreachable` is retryable

use std::time::Duration;

use axum::http::{Method, StatusCode};
use thiserror::Error;

/// Errors produced while routing, filtering or dispatching a request.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("no route matched {method} {path}")]
    NoRouteMatched { method: Method, path: String },

    /// Malformed predicate configuration. Fatal at startup.
    #[error("invalid predicate: {0}")]
    PredicateEvaluation(String),

    #[error("invalid route '{id}': {reason}")]
    InvalidRoute { id: String, reason: String },

    #[error("duplicate route id '{0}'")]
    DuplicateRoute(String),

    #[error("filter '{filter}' failed: {message}")]
    FilterExecution { filter: String, message: String },

    #[error("request body already consumed")]
    BodyAlreadyConsumed,

    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("upstream {authority} unreachable: {reason}")]
    UpstreamUnreachable { authority: String, reason: String },

    #[error("upstream {authority} timed out after {timeout:?}")]
    UpstreamTimeout { authority: String, timeout: Duration },

    #[error("malformed response from upstream {authority}: {reason}")]
    UpstreamMalformedResponse { authority: String, reason: String },

    #[error("downstream client cancelled the request")]
    DownstreamCancelled,
}

impl GatewayError {
    /// Shorthand for a filter failure.
    pub fn filter(filter: impl Into<String>, message: impl Into<String>) -> Self {
        GatewayError::FilterExecution {
            filter: filter.into(),
            message: message.into(),
        }
    }

    /// Whether the dispatcher may retry the call under a route's retry policy.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::UpstreamUnreachable { .. })
    }

    /// Status code presented to the client, or `None` when no response
    /// should be attempted (the client has gone away).
    pub fn status(&self) -> Option<StatusCode> {
        let status = match self {
            GatewayError::NoRouteMatched { .. } => StatusCode::NOT_FOUND,
            GatewayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::UpstreamUnreachable { .. }
            | GatewayError::UpstreamMalformedResponse { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::DownstreamCancelled => return None,
            GatewayError::PredicateEvaluation(_)
            | GatewayError::InvalidRoute { .. }
            | GatewayError::DuplicateRoute(_)
            | GatewayError::FilterExecution { .. }
            | GatewayError::BodyAlreadyConsumed => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Some(status)
    }

    /// Stable machine-readable code used in error bodies and metrics.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::NoRouteMatched { .. } => "NO_ROUTE_MATCHED",
            GatewayError::PredicateEvaluation(_) => "INVALID_PREDICATE",
            GatewayError::InvalidRoute { .. } => "INVALID_ROUTE",
            GatewayError::DuplicateRoute(_) => "DUPLICATE_ROUTE",
            GatewayError::FilterExecution { .. } => "FILTER_FAILED",
            GatewayError::BodyAlreadyConsumed => "BODY_CONSUMED",
            GatewayError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            GatewayError::UpstreamUnreachable { .. } => "UPSTREAM_UNREACHABLE",
            GatewayError::UpstreamTimeout { .. } => "UPSTREAM_TIMEOUT",
            GatewayError::UpstreamMalformedResponse { .. } => "UPSTREAM_MALFORMED_RESPONSE",
            GatewayError::DownstreamCancelled => "DOWNSTREAM_CANCELLED",
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let not_found = GatewayError::NoRouteMatched {
            method: Method::GET,
            path: "/missing".into(),
        };
        assert_eq!(not_found.status(), Some(StatusCode::NOT_FOUND));

        let unreachable = GatewayError::UpstreamUnreachable {
            authority: "127.0.0.1:1".into(),
            reason: "connection refused".into(),
        };
        assert_eq!(unreachable.status(), Some(StatusCode::BAD_GATEWAY));
        assert!(unreachable.is_retryable());

        let timeout = GatewayError::UpstreamTimeout {
            authority: "127.0.0.1:1".into(),
            timeout: Duration::from_millis(10),
        };
        assert_eq!(timeout.status(), Some(StatusCode::GATEWAY_TIMEOUT));
        assert!(!timeout.is_retryable());

        assert_eq!(GatewayError::DownstreamCancelled.status(), None);
    }
}
