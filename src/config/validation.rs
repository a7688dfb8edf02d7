//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Detect duplicate route ids
//! - Validate value ranges (timeouts > 0, filter orders, addresses)
//! - At most one named weight group per route
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Pure function: `&GatewayConfig → Result<(), Vec<ValidationError>>`
//! - Runs before a config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::{FilterConfig, GatewayConfig, PredicateConfig};
use crate::filter::FilterOrder;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }
    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::new("timeouts.connect_secs", "must be greater than 0"));
    }
    if config.pool.max_connections_per_host == 0 {
        errors.push(ValidationError::new("pool.max_connections_per_host", "must be greater than 0"));
    }
    if config.admin.enabled && config.admin.api_key.trim().is_empty() {
        errors.push(ValidationError::new("admin.api_key", "required when the admin API is enabled"));
    }

    validate_filters("default_filters", &config.default_filters, &mut errors);

    let mut seen = HashSet::new();
    for (i, route) in config.routes.iter().enumerate() {
        let field = format!("routes[{}]", i);
        if route.id.trim().is_empty() {
            errors.push(ValidationError::new(format!("{}.id", field), "must not be empty"));
        } else if !seen.insert(route.id.as_str()) {
            errors.push(ValidationError::new(
                format!("{}.id", field),
                format!("duplicate route id '{}'", route.id),
            ));
        }

        match Url::parse(&route.uri) {
            Ok(uri) if uri.scheme() != "http" => errors.push(ValidationError::new(
                format!("{}.uri", field),
                format!("unsupported scheme '{}'", uri.scheme()),
            )),
            Ok(uri) if uri.host_str().is_none() => {
                errors.push(ValidationError::new(format!("{}.uri", field), "missing host"))
            }
            Ok(_) => {}
            Err(e) => errors.push(ValidationError::new(format!("{}.uri", field), e.to_string())),
        }

        if route.timeout_ms == Some(0) {
            errors.push(ValidationError::new(format!("{}.timeout_ms", field), "must be greater than 0"));
        }
        if route.retry.max_attempts == 0 {
            errors.push(ValidationError::new(format!("{}.retry.max_attempts", field), "must be at least 1"));
        }

        let mut weights = 0;
        for (j, predicate) in route.predicates.iter().enumerate() {
            if let PredicateConfig::Weight { group, .. } = predicate {
                weights += 1;
                if group.trim().is_empty() {
                    errors.push(ValidationError::new(
                        format!("{}.predicates[{}].group", field, j),
                        "must not be empty",
                    ));
                } else if weights > 1 {
                    errors.push(ValidationError::new(
                        format!("{}.predicates[{}]", field, j),
                        "a route belongs to at most one weight group",
                    ));
                }
            }
        }

        validate_filters(&format!("{}.filters", field), &route.filters, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_filters(field: &str, filters: &[FilterConfig], errors: &mut Vec<ValidationError>) {
    for (i, filter) in filters.iter().enumerate() {
        if let Some(order) = filter.order {
            if FilterOrder::user(order).is_err() {
                errors.push(ValidationError::new(
                    format!("{}[{}].order", field, i),
                    format!(
                        "{} is outside [{}, {}]",
                        order,
                        FilterOrder::USER_MIN,
                        FilterOrder::USER_MAX
                    ),
                ));
            }
        }
    }
}
