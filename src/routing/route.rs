//! Route definition and builder.
//!
//! Routes are built explicitly with [`RouteBuilder`] and are immutable once
//! built. A reload replaces them wholesale.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use url::Url;

use crate::error::{GatewayError, GatewayResult};
use crate::filter::{FilterOrder, GatewayFilter, OrderedFilter};
use crate::http::exchange::PathVariables;
use crate::http::request::RequestDescriptor;
use crate::resilience::RetryPolicy;
use crate::routing::matcher::{HeaderMatcher, HostMatcher, Matcher, MethodMatcher, PathMatcher, QueryMatcher};
use crate::routing::weight::RouteWeight;

/// A configured mapping from predicates to an upstream target and filters.
pub struct Route {
    id: String,
    uri: Url,
    priority: i32,
    predicates: Vec<Arc<dyn Matcher>>,
    filters: Vec<Arc<dyn GatewayFilter>>,
    metadata: BTreeMap<String, String>,
    timeout: Option<Duration>,
    retry: RetryPolicy,
    weight: Option<RouteWeight>,
}

impl Route {
    pub fn builder(id: impl Into<String>) -> RouteBuilder {
        RouteBuilder::new(id)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn predicates(&self) -> &[Arc<dyn Matcher>] {
        &self.predicates
    }

    pub fn filters(&self) -> &[Arc<dyn GatewayFilter>] {
        &self.filters
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Per-route upstream timeout, if configured.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Weight group membership, if the route shares traffic with others.
    pub fn weight(&self) -> Option<&RouteWeight> {
        self.weight.as_ref()
    }

    /// Upstream URL for `req`: the route's origin and base path joined with
    /// the request path. A query on the route URI comes first, followed by
    /// the request query.
    pub fn target_for(&self, req: &RequestDescriptor) -> Url {
        let mut url = self.uri.clone();
        let base = self.uri.path().trim_end_matches('/');
        url.set_path(&format!("{}{}", base, req.path()));
        let query = match (self.uri.query().filter(|q| !q.is_empty()), req.query().filter(|q| !q.is_empty())) {
            (Some(fixed), Some(incoming)) => Some(format!("{}&{}", fixed, incoming)),
            (fixed, incoming) => fixed.or(incoming).map(str::to_string),
        };
        url.set_query(query.as_deref());
        url
    }

    /// All predicates must match. Short-circuits on the first failure.
    pub fn matches(&self, req: &RequestDescriptor) -> bool {
        self.predicates.iter().all(|p| p.matches(req))
    }

    /// Path variables captured by the first templated predicate.
    pub fn path_variables(&self, req: &RequestDescriptor) -> PathVariables {
        self.predicates
            .iter()
            .find_map(|p| p.captures(req))
            .unwrap_or_default()
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("id", &self.id)
            .field("uri", &self.uri.as_str())
            .field("priority", &self.priority)
            .field("predicates", &self.predicates)
            .field("filters", &self.filters.iter().map(|fl| fl.name()).collect::<Vec<_>>())
            .field("metadata", &self.metadata)
            .field("weight", &self.weight)
            .finish()
    }
}

/// Fluent builder for [`Route`].
///
/// Methods never fail; the first error is kept and reported by `build`.
pub struct RouteBuilder {
    id: String,
    uri: Option<String>,
    priority: i32,
    predicates: Vec<Arc<dyn Matcher>>,
    filters: Vec<Arc<dyn GatewayFilter>>,
    metadata: BTreeMap<String, String>,
    timeout: Option<Duration>,
    retry: RetryPolicy,
    weight: Option<RouteWeight>,
    error: Option<GatewayError>,
}

impl RouteBuilder {
    fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            uri: None,
            priority: 0,
            predicates: Vec::new(),
            filters: Vec::new(),
            metadata: BTreeMap::new(),
            timeout: None,
            retry: RetryPolicy::default(),
            weight: None,
            error: None,
        }
    }

    fn record<T>(&mut self, result: GatewayResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.error.get_or_insert(e);
                None
            }
        }
    }

    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn predicate(mut self, matcher: Arc<dyn Matcher>) -> Self {
        self.predicates.push(matcher);
        self
    }

    pub fn path(mut self, pattern: &str) -> Self {
        if let Some(m) = self.record(PathMatcher::new([pattern])) {
            self.predicates.push(Arc::new(m));
        }
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        self.predicates.push(Arc::new(MethodMatcher::new(vec![method])));
        self
    }

    pub fn host(mut self, host: &str) -> Self {
        self.predicates.push(Arc::new(HostMatcher::new(host)));
        self
    }

    pub fn header(mut self, name: &str, value: Option<&str>) -> Self {
        if let Some(m) = self.record(HeaderMatcher::new(name, value.map(str::to_string))) {
            self.predicates.push(Arc::new(m));
        }
        self
    }

    pub fn query(mut self, name: &str, value: Option<&str>) -> Self {
        self.predicates.push(Arc::new(QueryMatcher::new(name, value.map(str::to_string))));
        self
    }

    /// Add a filter at its own declared order.
    pub fn filter(mut self, filter: impl GatewayFilter + 'static) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    /// Add a filter at an explicit user order.
    pub fn filter_with_order(mut self, order: i32, filter: Arc<dyn GatewayFilter>) -> Self {
        if let Some(order) = self.record(FilterOrder::user(order)) {
            self.filters.push(Arc::new(OrderedFilter::new(order, filter)));
        }
        self
    }

    pub fn shared_filter(mut self, filter: Arc<dyn GatewayFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Join weight group `group` with a relative `weight`.
    pub fn weight(mut self, group: impl Into<String>, weight: u32) -> Self {
        self.weight = Some(RouteWeight {
            group: group.into(),
            weight,
        });
        self
    }

    /// Remember an error from outside the builder, e.g. a filter that
    /// failed to construct.
    pub fn fail(mut self, error: GatewayError) -> Self {
        self.error.get_or_insert(error);
        self
    }

    pub fn build(self) -> GatewayResult<Route> {
        let id = self.id;
        let invalid = |reason: String| GatewayError::InvalidRoute { id: id.clone(), reason };

        if let Some(err) = self.error {
            return Err(match err {
                GatewayError::InvalidRoute { id: existing, reason } if existing.is_empty() => invalid(reason),
                other => other,
            });
        }
        if id.is_empty() {
            return Err(invalid("route id must not be empty".into()));
        }

        let raw = self.uri.ok_or_else(|| invalid("missing target uri".into()))?;
        let uri = Url::parse(&raw).map_err(|e| invalid(format!("invalid uri '{}': {}", raw, e)))?;
        if uri.scheme() != "http" {
            return Err(invalid(format!("unsupported scheme '{}'", uri.scheme())));
        }
        if uri.host_str().is_none() {
            return Err(invalid(format!("uri '{}' has no host", raw)));
        }
        if self.weight.as_ref().is_some_and(|w| w.group.trim().is_empty()) {
            return Err(invalid("weight group must not be empty".into()));
        }

        Ok(Route {
            id,
            uri,
            priority: self.priority,
            predicates: self.predicates,
            filters: self.filters,
            metadata: self.metadata,
            timeout: self.timeout,
            retry: self.retry,
            weight: self.weight,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::AddRequestHeader;

    #[test]
    fn builds_sample_route() {
        let route = Route::builder("get")
            .path("/get")
            .filter(AddRequestHeader::new("Hello", "World").unwrap())
            .uri("http://example.test")
            .metadata("team", "edge")
            .build()
            .unwrap();

        assert_eq!(route.id(), "get");
        assert_eq!(route.uri().host_str(), Some("example.test"));
        assert_eq!(route.filters().len(), 1);
        assert!(route.matches(&RequestDescriptor::new(Method::GET, "/get")));
        assert!(!route.matches(&RequestDescriptor::new(Method::GET, "/missing")));
    }

    #[test]
    fn target_joins_base_path_and_query() {
        let route = Route::builder("svc")
            .path("/api/**")
            .uri("http://backend.test:8081/base/")
            .build()
            .unwrap();
        let req = RequestDescriptor::new(Method::GET, "/api/items").with_query(Some("page=2".into()));
        assert_eq!(
            route.target_for(&req).as_str(),
            "http://backend.test:8081/base/api/items?page=2"
        );

        let route = Route::builder("root").path("/**").uri("http://backend.test").build().unwrap();
        assert_eq!(
            route.target_for(&RequestDescriptor::new(Method::GET, "/get")).as_str(),
            "http://backend.test/get"
        );
    }

    #[test]
    fn route_query_is_kept_ahead_of_request_query() {
        let route = Route::builder("keyed")
            .path("/**")
            .uri("http://backend.test/api?key=abc")
            .build()
            .unwrap();

        let req = RequestDescriptor::new(Method::GET, "/items").with_query(Some("page=2".into()));
        assert_eq!(route.target_for(&req).as_str(), "http://backend.test/api/items?key=abc&page=2");

        let bare = RequestDescriptor::new(Method::GET, "/items");
        assert_eq!(route.target_for(&bare).as_str(), "http://backend.test/api/items?key=abc");
    }

    #[test]
    fn all_predicates_must_match() {
        let route = Route::builder("and")
            .path("/a")
            .method(Method::POST)
            .uri("http://example.test")
            .build()
            .unwrap();
        assert!(!route.matches(&RequestDescriptor::new(Method::GET, "/a")));
        assert!(route.matches(&RequestDescriptor::new(Method::POST, "/a")));
    }

    #[test]
    fn reports_first_error() {
        let err = Route::builder("bad").path("no-slash").uri("http://example.test").build().unwrap_err();
        assert!(matches!(err, GatewayError::PredicateEvaluation(_)));

        let err = Route::builder("bad").path("/a").build().unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRoute { .. }));

        let err = Route::builder("tls").path("/a").uri("https://example.test").build().unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRoute { .. }));

        let err = Route::builder("weighted").path("/a").weight(" ", 1).uri("http://example.test").build().unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRoute { .. }));

        let err = Route::builder("order")
            .path("/a")
            .filter_with_order(5_000_000, Arc::new(AddRequestHeader::new("a", "b").unwrap()))
            .uri("http://example.test")
            .build()
            .unwrap_err();
        match err {
            GatewayError::InvalidRoute { id, .. } => assert_eq!(id, "order"),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
