//! Turns validated configuration into routes and filters.

use std::sync::Arc;
use std::time::Duration;

use crate::config::schema::{FilterConfig, FilterKind, GatewayConfig, PredicateConfig, RouteConfig};
use crate::error::{GatewayError, GatewayResult};
use crate::filter::{
    AddRequestHeader, AddResponseHeader, FilterOrder, GatewayFilter, OrderedFilter, PrefixPath, RemoveRequestHeader,
    RemoveResponseHeader, RequireHeader, SetPath, SetRequestHeader, SetStatus, StripPrefix,
};
use crate::routing::matcher::{
    HeaderMatcher, HostMatcher, Matcher, MethodMatcher, NotMatcher, OrMatcher, PathMatcher, QueryMatcher,
};
use crate::routing::Route;

/// Every configured route, in registration order.
pub fn build_routes(config: &GatewayConfig) -> GatewayResult<Vec<Route>> {
    config.routes.iter().map(build_route).collect()
}

pub fn build_route(config: &RouteConfig) -> GatewayResult<Route> {
    let mut builder = Route::builder(config.id.clone())
        .uri(config.uri.clone())
        .priority(config.priority)
        .retry(config.retry.clone());

    for predicate in &config.predicates {
        if let PredicateConfig::Weight { group, weight } = predicate {
            builder = builder.weight(group.clone(), *weight);
            continue;
        }
        builder = match build_predicate(predicate) {
            Ok(matcher) => builder.predicate(matcher),
            Err(e) => builder.fail(e),
        };
    }
    for filter in &config.filters {
        builder = match build_filter(filter) {
            Ok(filter) => builder.shared_filter(filter),
            Err(e) => builder.fail(e),
        };
    }
    for (key, value) in &config.metadata {
        builder = builder.metadata(key.clone(), value.clone());
    }
    if let Some(ms) = config.timeout_ms {
        builder = builder.timeout(Duration::from_millis(ms));
    }

    builder.build()
}

pub fn build_default_filters(config: &GatewayConfig) -> GatewayResult<Vec<Arc<dyn GatewayFilter>>> {
    config.default_filters.iter().map(build_filter).collect()
}

pub fn build_predicate(config: &PredicateConfig) -> GatewayResult<Arc<dyn Matcher>> {
    let matcher: Arc<dyn Matcher> = match config {
        PredicateConfig::Path { patterns } => Arc::new(PathMatcher::new(patterns)?),
        PredicateConfig::Method { methods } => Arc::new(MethodMatcher::parse(methods)?),
        PredicateConfig::Host { pattern } => Arc::new(HostMatcher::new(pattern.as_str())),
        PredicateConfig::Header { name, value } => Arc::new(HeaderMatcher::new(name, value.clone())?),
        PredicateConfig::Query { name, value } => Arc::new(QueryMatcher::new(name.as_str(), value.clone())),
        PredicateConfig::Any { predicates } => Arc::new(OrMatcher::new(
            predicates.iter().map(build_predicate).collect::<GatewayResult<Vec<_>>>()?,
        )),
        PredicateConfig::Not { predicate } => Arc::new(NotMatcher::new(build_predicate(predicate)?)),
        PredicateConfig::Weight { group, .. } => {
            return Err(GatewayError::PredicateEvaluation(format!(
                "weight group '{}' cannot be nested inside another predicate",
                group
            )))
        }
    };
    Ok(matcher)
}

pub fn build_filter(config: &FilterConfig) -> GatewayResult<Arc<dyn GatewayFilter>> {
    let filter: Arc<dyn GatewayFilter> = match &config.kind {
        FilterKind::AddRequestHeader { name, value } => Arc::new(AddRequestHeader::new(name, value)?),
        FilterKind::SetRequestHeader { name, value } => Arc::new(SetRequestHeader::new(name, value)?),
        FilterKind::RemoveRequestHeader { name } => Arc::new(RemoveRequestHeader::new(name)?),
        FilterKind::AddResponseHeader { name, value } => Arc::new(AddResponseHeader::new(name, value)?),
        FilterKind::RemoveResponseHeader { name } => Arc::new(RemoveResponseHeader::new(name)?),
        FilterKind::StripPrefix { parts } => Arc::new(StripPrefix::new(*parts)),
        FilterKind::PrefixPath { prefix } => Arc::new(PrefixPath::new(prefix)?),
        FilterKind::SetPath { template } => Arc::new(SetPath::new(template)?),
        FilterKind::SetStatus { status } => Arc::new(SetStatus::new(*status)?),
        FilterKind::RequireHeader { name, status } => Arc::new(RequireHeader::new(name, *status)?),
    };

    match config.order {
        Some(order) => Ok(Arc::new(OrderedFilter::new(FilterOrder::user(order)?, filter))),
        None => Ok(filter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::RequestDescriptor;
    use crate::routing::RouteWeight;
    use axum::http::Method;

    fn config(toml: &str) -> GatewayConfig {
        toml::from_str(toml).unwrap()
    }

    #[test]
    fn builds_routes_in_registration_order() {
        let config = config(
            r#"
            [[routes]]
            id = "api"
            uri = "http://api.test:8080"
            predicates = [
                { type = "path", patterns = ["/api/**"] },
                { type = "any", predicates = [
                    { type = "method", methods = ["GET"] },
                    { type = "header", name = "x-allow-write" },
                ] },
            ]
            filters = [
                { type = "strip_prefix", parts = 1 },
                { type = "add_request_header", name = "Hello", value = "World", order = -10 },
            ]
            timeout_ms = 500

            [[routes]]
            id = "fallback"
            uri = "http://fallback.test"
            "#,
        );

        let routes = build_routes(&config).unwrap();
        assert_eq!(routes.len(), 2);

        let api = &routes[0];
        assert_eq!(api.timeout(), Some(Duration::from_millis(500)));
        assert_eq!(api.filters()[1].order(), FilterOrder(-10));
        assert!(api.matches(&RequestDescriptor::new(Method::GET, "/api/items")));
        assert!(!api.matches(&RequestDescriptor::new(Method::POST, "/api/items")));

        assert!(routes[1].matches(&RequestDescriptor::new(Method::DELETE, "/anything")));
    }

    #[test]
    fn malformed_predicate_is_fatal() {
        let config = config(
            r#"
            [[routes]]
            id = "bad"
            uri = "http://api.test"
            predicates = [{ type = "path", patterns = ["/a/**/b"] }]
            "#,
        );
        let err = build_routes(&config).unwrap_err();
        assert!(matches!(err, GatewayError::PredicateEvaluation(_)));
    }

    #[test]
    fn invalid_filter_is_reported_with_route_id() {
        let config = config(
            r#"
            [[routes]]
            id = "bad-filter"
            uri = "http://api.test"
            filters = [{ type = "prefix_path", prefix = "relative" }]
            "#,
        );
        match build_routes(&config).unwrap_err() {
            GatewayError::InvalidRoute { id, .. } => assert_eq!(id, "bad-filter"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn weight_predicate_joins_a_group() {
        let config = config(
            r#"
            [[routes]]
            id = "stable"
            uri = "http://stable.test"
            predicates = [{ type = "path", patterns = ["/api/**"] }, { type = "weight", group = "api", weight = 9 }]
            "#,
        );
        let route = build_routes(&config).unwrap().remove(0);
        assert_eq!(
            route.weight(),
            Some(&RouteWeight {
                group: "api".into(),
                weight: 9
            })
        );
        assert_eq!(route.predicates().len(), 1);
    }

    #[test]
    fn nested_weight_is_rejected() {
        let config = config(
            r#"
            [[routes]]
            id = "nested"
            uri = "http://api.test"
            predicates = [{ type = "not", predicate = { type = "weight", group = "g", weight = 1 } }]
            "#,
        );
        let err = build_routes(&config).unwrap_err();
        assert!(matches!(err, GatewayError::PredicateEvaluation(_)));
    }
}
