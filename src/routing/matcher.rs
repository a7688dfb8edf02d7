//! Route predicates.
//!
//! # Responsibilities
//! - Match path templates (trailing-slash insensitive)
//! - Match method, host header, arbitrary headers and query parameters
//! - Combine conditions with AND / OR / NOT
//!
//! # Design Decisions
//! - Matchers are pure: no side effects, so evaluation order never affects
//!   the result and AND groups may short-circuit freely
//! - Host matching is case-insensitive (RFC 9110), path matching is not
//! - No regex, to keep matching linear
//! - Malformed configuration fails at construction, never at match time

use std::fmt::Debug;
use std::sync::Arc;

use axum::http::{HeaderName, Method};

use crate::error::{GatewayError, GatewayResult};
use crate::http::exchange::PathVariables;
use crate::http::request::RequestDescriptor;
use crate::routing::path::PathPattern;

/// Trait for matching requests against conditions.
pub trait Matcher: Send + Sync + Debug {
    /// Returns true if the request matches this condition.
    fn matches(&self, req: &RequestDescriptor) -> bool;

    /// Path variables captured by this condition, if it matched a template.
    fn captures(&self, _req: &RequestDescriptor) -> Option<PathVariables> {
        None
    }
}

/// Matches the request path against one or more templates (any may match).
#[derive(Debug, Clone)]
pub struct PathMatcher {
    patterns: Vec<PathPattern>,
}

impl PathMatcher {
    pub fn new<I, S>(patterns: I) -> GatewayResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| PathPattern::parse(p.as_ref()))
            .collect::<GatewayResult<Vec<_>>>()?;
        if patterns.is_empty() {
            return Err(GatewayError::PredicateEvaluation("path predicate needs at least one pattern".into()));
        }
        Ok(Self { patterns })
    }
}

impl Matcher for PathMatcher {
    fn matches(&self, req: &RequestDescriptor) -> bool {
        self.patterns.iter().any(|p| p.matches(req.path()))
    }

    fn captures(&self, req: &RequestDescriptor) -> Option<PathVariables> {
        self.patterns.iter().find_map(|p| p.captures(req.path()))
    }
}

/// Matches one of a set of methods.
#[derive(Debug, Clone)]
pub struct MethodMatcher {
    methods: Vec<Method>,
}

impl MethodMatcher {
    pub fn new(methods: Vec<Method>) -> Self {
        Self { methods }
    }

    /// Parse method names, e.g. `["GET", "POST"]`.
    pub fn parse<I, S>(methods: I) -> GatewayResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let methods = methods
            .into_iter()
            .map(|m| {
                Method::from_bytes(m.as_ref().to_ascii_uppercase().as_bytes())
                    .map_err(|_| GatewayError::PredicateEvaluation(format!("invalid method '{}'", m.as_ref())))
            })
            .collect::<GatewayResult<Vec<_>>>()?;
        Ok(Self::new(methods))
    }
}

impl Matcher for MethodMatcher {
    fn matches(&self, req: &RequestDescriptor) -> bool {
        self.methods.contains(req.method())
    }
}

/// Matches a header by presence, or by exact value on any of its values.
#[derive(Debug, Clone)]
pub struct HeaderMatcher {
    name: HeaderName,
    value: Option<String>,
}

impl HeaderMatcher {
    pub fn new(name: &str, value: Option<String>) -> GatewayResult<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| GatewayError::PredicateEvaluation(format!("invalid header name '{}'", name)))?;
        Ok(Self { name, value })
    }
}

impl Matcher for HeaderMatcher {
    fn matches(&self, req: &RequestDescriptor) -> bool {
        let mut values = req.headers().get_all(&self.name).iter().peekable();
        match &self.value {
            None => values.peek().is_some(),
            Some(expected) => values.any(|v| v.to_str().map(|v| v == expected).unwrap_or(false)),
        }
    }
}

/// Matches the Host header.
///
/// The port is ignored. A leading `*.` matches any subdomain.
#[derive(Debug, Clone)]
pub struct HostMatcher {
    expected_host: String,
}

impl HostMatcher {
    /// The host is normalized to lowercase for case-insensitive matching.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            expected_host: host.into().to_lowercase(),
        }
    }
}

impl Matcher for HostMatcher {
    fn matches(&self, req: &RequestDescriptor) -> bool {
        let Some(host) = req.header_str("host") else {
            return false;
        };
        let host = host.to_lowercase();
        let host = strip_port(&host);
        match self.expected_host.strip_prefix("*.") {
            Some(suffix) => host.len() > suffix.len() && host.ends_with(suffix) && host[..host.len() - suffix.len()].ends_with('.'),
            None => host == self.expected_host,
        }
    }
}

/// Host without its port. A bracketed IPv6 literal keeps its brackets.
fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    host.rsplit_once(':').map(|(h, _)| h).unwrap_or(host)
}

/// Matches a query parameter by presence or exact value.
#[derive(Debug, Clone)]
pub struct QueryMatcher {
    name: String,
    value: Option<String>,
}

impl QueryMatcher {
    pub fn new(name: impl Into<String>, value: Option<String>) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

impl Matcher for QueryMatcher {
    fn matches(&self, req: &RequestDescriptor) -> bool {
        match (req.query_param(&self.name), &self.value) {
            (Some(_), None) => true,
            (Some(actual), Some(expected)) => actual == expected.as_str(),
            (None, _) => false,
        }
    }
}

/// Combines multiple matchers with AND semantics.
#[derive(Debug)]
pub struct AndMatcher {
    matchers: Vec<Arc<dyn Matcher>>,
}

impl AndMatcher {
    pub fn new(matchers: Vec<Arc<dyn Matcher>>) -> Self {
        Self { matchers }
    }
}

impl Matcher for AndMatcher {
    fn matches(&self, req: &RequestDescriptor) -> bool {
        self.matchers.iter().all(|m| m.matches(req))
    }

    fn captures(&self, req: &RequestDescriptor) -> Option<PathVariables> {
        self.matchers.iter().find_map(|m| m.captures(req))
    }
}

/// Combines multiple matchers with OR semantics.
#[derive(Debug)]
pub struct OrMatcher {
    matchers: Vec<Arc<dyn Matcher>>,
}

impl OrMatcher {
    pub fn new(matchers: Vec<Arc<dyn Matcher>>) -> Self {
        Self { matchers }
    }
}

impl Matcher for OrMatcher {
    fn matches(&self, req: &RequestDescriptor) -> bool {
        self.matchers.iter().any(|m| m.matches(req))
    }

    fn captures(&self, req: &RequestDescriptor) -> Option<PathVariables> {
        self.matchers
            .iter()
            .filter(|m| m.matches(req))
            .find_map(|m| m.captures(req))
    }
}

/// Negates a matcher.
#[derive(Debug)]
pub struct NotMatcher {
    inner: Arc<dyn Matcher>,
}

impl NotMatcher {
    pub fn new(inner: Arc<dyn Matcher>) -> Self {
        Self { inner }
    }
}

impl Matcher for NotMatcher {
    fn matches(&self, req: &RequestDescriptor) -> bool {
        !self.inner.matches(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn get(path: &str) -> RequestDescriptor {
        RequestDescriptor::new(Method::GET, path)
    }

    fn with_header(req: RequestDescriptor, name: &'static str, value: &'static str) -> RequestDescriptor {
        req.with_header(HeaderName::from_static(name), HeaderValue::from_static(value))
    }

    #[test]
    fn test_host_matcher() {
        let matcher = HostMatcher::new("example.com");
        assert!(matcher.matches(&with_header(get("/"), "host", "example.com")));
        assert!(matcher.matches(&with_header(get("/"), "host", "EXAMPLE.COM:8080")));
        assert!(!matcher.matches(&with_header(get("/"), "host", "other.com")));
        assert!(!matcher.matches(&get("/")));

        let wildcard = HostMatcher::new("*.example.com");
        assert!(wildcard.matches(&with_header(get("/"), "host", "api.example.com")));
        assert!(!wildcard.matches(&with_header(get("/"), "host", "example.com")));
        assert!(!wildcard.matches(&with_header(get("/"), "host", "badexample.com")));
    }

    #[test]
    fn test_host_matcher_ipv6() {
        let matcher = HostMatcher::new("[::1]");
        assert!(matcher.matches(&with_header(get("/"), "host", "[::1]")));
        assert!(matcher.matches(&with_header(get("/"), "host", "[::1]:8080")));
        assert!(!matcher.matches(&with_header(get("/"), "host", "[::2]")));

        assert_eq!(strip_port("[::1]"), "[::1]");
        assert_eq!(strip_port("[fe80::1]:443"), "[fe80::1]");
        assert_eq!(strip_port("example.com:80"), "example.com");
    }

    #[test]
    fn test_path_matcher() {
        let matcher = PathMatcher::new(["/get", "/anything/{segment}"]).unwrap();
        assert!(matcher.matches(&get("/get/")));
        assert!(matcher.matches(&get("/anything/x")));
        assert!(!matcher.matches(&get("/images")));

        let vars = matcher.captures(&get("/anything/x")).unwrap();
        assert_eq!(vars.get("segment").map(String::as_str), Some("x"));
    }

    #[test]
    fn test_method_and_header_matchers() {
        let methods = MethodMatcher::parse(["get", "HEAD"]).unwrap();
        assert!(methods.matches(&get("/")));
        assert!(!methods.matches(&RequestDescriptor::new(Method::POST, "/")));
        assert!(MethodMatcher::parse(["GE T"]).is_err());

        let present = HeaderMatcher::new("x-token", None).unwrap();
        let exact = HeaderMatcher::new("X-Token", Some("b".into())).unwrap();
        let req = with_header(with_header(get("/"), "x-token", "a"), "x-token", "b");
        assert!(present.matches(&req));
        assert!(exact.matches(&req));
        assert!(!exact.matches(&with_header(get("/"), "x-token", "a")));
        assert!(HeaderMatcher::new("bad header", None).is_err());
    }

    #[test]
    fn test_query_matcher() {
        let req = get("/search").with_query(Some("q=rust&debug".into()));
        assert!(QueryMatcher::new("debug", None).matches(&req));
        assert!(QueryMatcher::new("q", Some("rust".into())).matches(&req));
        assert!(!QueryMatcher::new("q", Some("go".into())).matches(&req));
        assert!(!QueryMatcher::new("page", None).matches(&req));
    }

    #[test]
    fn test_combinators() {
        let path: Arc<dyn Matcher> = Arc::new(PathMatcher::new(["/a"]).unwrap());
        let post: Arc<dyn Matcher> = Arc::new(MethodMatcher::new(vec![Method::POST]));

        let and = AndMatcher::new(vec![path.clone(), post.clone()]);
        let or = OrMatcher::new(vec![path.clone(), post.clone()]);
        let not = NotMatcher::new(post);

        let req = get("/a");
        assert!(!and.matches(&req));
        assert!(or.matches(&req));
        assert!(not.matches(&req));
        assert!(and.matches(&RequestDescriptor::new(Method::POST, "/a")));
    }
}
