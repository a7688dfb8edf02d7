//! Gateway-installed filters living in the reserved order bands.
//!
//! # Responsibilities
//! - `MetricsFilter`: outermost; records status, outcome and latency for
//!   every matched request, including short-circuits and failures
//! - `CacheRequestBodyFilter`: buffers the body when it must be replayable
//! - `RouteToRequestUrlFilter`: resolves the upstream URL from the rewritten
//!   request
//! - `ForwardedHeadersFilter`: appends `X-Forwarded-*` headers
//!
//! `WebsocketRoutingFilter` lives in its own module.

use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue};

use crate::error::GatewayResult;
use crate::filter::{FilterOrder, GatewayFilter, Next};
use crate::http::exchange::Exchange;
use crate::http::request::RequestBody;
use crate::observability::metrics;
use crate::resilience::retries::is_idempotent;

/// Route metadata key forcing body caching regardless of retry settings.
pub const CACHE_BODY_METADATA: &str = "cache-request-body";

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

#[derive(Debug, Clone, Default)]
pub struct MetricsFilter;

#[async_trait]
impl GatewayFilter for MetricsFilter {
    fn name(&self) -> &str {
        "Metrics"
    }

    fn order(&self) -> FilterOrder {
        FilterOrder::METRICS
    }

    async fn filter(&self, exchange: &mut Exchange, next: Next<'_>) -> GatewayResult<()> {
        let result = next.run(exchange).await;

        let (status, outcome) = match (&result, exchange.response()) {
            (Ok(()), Some(response)) if exchange.was_dispatched() => (response.status.as_u16(), "forwarded"),
            (Ok(()), Some(response)) => (response.status.as_u16(), "short_circuit"),
            (Ok(()), None) => (500, "no_response"),
            (Err(e), _) => (e.status().map(|s| s.as_u16()).unwrap_or(499), e.code()),
        };

        let route_id = exchange.route().id().to_string();
        let method = exchange.original_request().method().as_str().to_string();
        let elapsed = exchange.timings().elapsed();
        metrics::record_request(&route_id, &method, status, outcome, elapsed);

        tracing::info!(
            request_id = %exchange.request_id(),
            route_id = %route_id,
            method = %method,
            path = %exchange.original_request().path(),
            status,
            outcome,
            latency_ms = elapsed.as_millis() as u64,
            upstream_ms = exchange.timings().since_start("upstream_headers").map(|d| d.as_millis() as u64),
            "Response completed"
        );
        result
    }
}

/// Buffers the request body up to `limit` bytes when the route may retry an
/// idempotent request or asks for it through route metadata.
#[derive(Debug, Clone)]
pub struct CacheRequestBodyFilter {
    limit: usize,
}

impl CacheRequestBodyFilter {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }

    fn wants_cache(exchange: &Exchange) -> bool {
        let route = exchange.route();
        let forced = route
            .metadata()
            .get(CACHE_BODY_METADATA)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"));
        forced || (route.retry().is_enabled() && is_idempotent(exchange.request().method()))
    }
}

#[async_trait]
impl GatewayFilter for CacheRequestBodyFilter {
    fn name(&self) -> &str {
        "CacheRequestBody"
    }

    fn order(&self) -> FilterOrder {
        FilterOrder::CACHE_REQUEST_BODY
    }

    async fn filter(&self, exchange: &mut Exchange, next: Next<'_>) -> GatewayResult<()> {
        if Self::wants_cache(exchange) && matches!(exchange.body_mut(), RequestBody::Streaming(_)) {
            exchange.cache_body(self.limit).await?;
            exchange.timings_mut().mark("body_cached");
        }
        next.run(exchange).await
    }
}

/// Sets the exchange target from the route URI and the current request.
#[derive(Debug, Clone, Default)]
pub struct RouteToRequestUrlFilter;

#[async_trait]
impl GatewayFilter for RouteToRequestUrlFilter {
    fn name(&self) -> &str {
        "RouteToRequestUrl"
    }

    fn order(&self) -> FilterOrder {
        FilterOrder::ROUTE_TO_REQUEST_URL
    }

    async fn filter(&self, exchange: &mut Exchange, next: Next<'_>) -> GatewayResult<()> {
        let target = exchange.route().target_for(exchange.request());
        tracing::trace!(request_id = %exchange.request_id(), target = %target, "Resolved upstream URL");
        exchange.set_target(target);
        next.run(exchange).await
    }
}

#[derive(Debug, Clone, Default)]
pub struct ForwardedHeadersFilter;

#[async_trait]
impl GatewayFilter for ForwardedHeadersFilter {
    fn name(&self) -> &str {
        "ForwardedHeaders"
    }

    fn order(&self) -> FilterOrder {
        FilterOrder::FORWARDED_HEADERS
    }

    async fn filter(&self, exchange: &mut Exchange, next: Next<'_>) -> GatewayResult<()> {
        let client_ip = exchange.client_addr().map(|addr| addr.ip().to_string());
        let original_host = exchange.original_request().headers().get(axum::http::header::HOST).cloned();

        exchange.mutate_request(|mut req| {
            if let Some(ip) = client_ip {
                let forwarded_for = match req.header_str(X_FORWARDED_FOR.as_str()) {
                    Some(existing) => format!("{}, {}", existing, ip),
                    None => ip,
                };
                if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
                    req = req.with_header_set(X_FORWARDED_FOR, value);
                }
            }
            if !req.headers().contains_key(&X_FORWARDED_PROTO) {
                req = req.with_header_set(X_FORWARDED_PROTO, HeaderValue::from_static("http"));
            }
            if let (Some(host), false) = (original_host, req.headers().contains_key(&X_FORWARDED_HOST)) {
                req = req.with_header_set(X_FORWARDED_HOST, host);
            }
            req
        });
        next.run(exchange).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::filter::test_support::{exchange_for, EchoDispatch};
    use crate::filter::FilterChain;
    use crate::resilience::RetryPolicy;
    use crate::routing::Route;
    use axum::body::Body;
    use axum::http::Method;
    use std::net::SocketAddr;
    use std::sync::Arc;

    #[tokio::test]
    async fn forwarded_headers_are_appended() {
        let chain = FilterChain::build(&[], &[Arc::new(ForwardedHeadersFilter)]);
        let route = Route::builder("r").path("/**").uri("http://backend.test").build().unwrap();
        let mut ex = exchange_for(route, "/get", &[("host", "gw.test"), ("x-forwarded-for", "10.0.0.1")]);
        ex.set_client_addr(Some("192.0.2.7:5555".parse::<SocketAddr>().unwrap()));

        let dispatch = EchoDispatch::default();
        chain.execute(&mut ex, &dispatch).await.unwrap();

        let seen = dispatch.seen().unwrap();
        assert_eq!(seen.header_str("x-forwarded-for"), Some("10.0.0.1, 192.0.2.7"));
        assert_eq!(seen.header_str("x-forwarded-proto"), Some("http"));
        assert_eq!(seen.header_str("x-forwarded-host"), Some("gw.test"));
    }

    #[tokio::test]
    async fn target_follows_rewritten_path() {
        let chain = FilterChain::build(
            &[Arc::new(RouteToRequestUrlFilter)],
            &[Arc::new(crate::filter::StripPrefix::new(1))],
        );
        let route = Route::builder("r").path("/api/**").uri("http://backend.test:9000").build().unwrap();
        let mut ex = exchange_for(route, "/api/items?page=1", &[]);

        chain.execute(&mut ex, &EchoDispatch::default()).await.unwrap();
        assert_eq!(ex.target().unwrap().as_str(), "http://backend.test:9000/items?page=1");
    }

    #[tokio::test]
    async fn body_is_cached_only_when_retries_can_use_it() {
        let chain = FilterChain::build(&[Arc::new(CacheRequestBodyFilter::new(1024))], &[]);
        let retrying = Route::builder("retry")
            .path("/**")
            .uri("http://backend.test")
            .retry(RetryPolicy::attempts(3))
            .build()
            .unwrap();

        let mut ex = exchange_for(retrying, "/put", &[]);
        ex.mutate_request(|req| req.with_method(Method::PUT));
        *ex.body_mut() = RequestBody::streaming(Body::from("payload"));
        let dispatch = EchoDispatch::default();
        chain.execute(&mut ex, &dispatch).await.unwrap();
        assert!(dispatch.body_was_cached());

        let plain = Route::builder("plain").path("/**").uri("http://backend.test").build().unwrap();
        let mut ex = exchange_for(plain, "/put", &[]);
        *ex.body_mut() = RequestBody::streaming(Body::from("payload"));
        let dispatch = EchoDispatch::default();
        chain.execute(&mut ex, &dispatch).await.unwrap();
        assert!(!dispatch.body_was_cached());
    }

    #[tokio::test]
    async fn oversized_body_fails_before_dispatch() {
        let chain = FilterChain::build(&[Arc::new(CacheRequestBodyFilter::new(4))], &[]);
        let route = Route::builder("forced")
            .path("/**")
            .uri("http://backend.test")
            .metadata(CACHE_BODY_METADATA, "true")
            .build()
            .unwrap();
        let mut ex = exchange_for(route, "/post", &[]);
        *ex.body_mut() = RequestBody::streaming(Body::from("too large"));

        let dispatch = EchoDispatch::default();
        let err = chain.execute(&mut ex, &dispatch).await.unwrap_err();
        assert!(matches!(err, GatewayError::PayloadTooLarge { limit: 4 }));
        assert!(dispatch.seen().is_none());
    }

    #[tokio::test]
    async fn metrics_filter_passes_errors_through() {
        let chain = FilterChain::build(&[Arc::new(MetricsFilter)], &[]);
        let route = Route::builder("r").path("/**").uri("http://backend.test").build().unwrap();
        let mut ex = exchange_for(route, "/get", &[]);

        chain.execute(&mut ex, &EchoDispatch::failing()).await.unwrap_err();
        assert!(ex.response().is_none());
    }
}
