//! Gateway router: route lookup, chain assembly and execution.
//!
//! # Responsibilities
//! - Capture one route table snapshot per request
//! - Select the first matching route or report an explicit no-match
//! - Build the filter chain (global ∪ route) and run it to a response
//!
//! # Design Decisions
//! - Structural filters are always installed alongside user global filters
//! - The chain terminal is injectable; production uses the upstream
//!   dispatcher
//! - Deterministic: same snapshot, input and weight draw always pick the
//!   same route; the draw is kept on the exchange

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{GatewayError, GatewayResult};
use crate::filter::{
    CacheRequestBodyFilter, Dispatch, FilterChain, ForwardedHeadersFilter, GatewayFilter, MetricsFilter,
    RouteToRequestUrlFilter, WebsocketRoutingFilter,
};
use crate::http::exchange::Exchange;
use crate::http::request::{RequestBody, RequestDescriptor};
use crate::http::response::ResponseDescriptor;
use crate::http::websocket::PendingUpgrade;
use crate::observability::metrics;
use crate::routing::table::RouteTable;
use crate::upstream::{ConnectionPool, PoolSettings, UpstreamDispatcher};

/// Default cap for buffered request bodies.
pub const DEFAULT_BODY_CACHE_LIMIT: usize = 1024 * 1024;

/// Connection-level facts about an inbound request.
#[derive(Debug, Clone, Default)]
pub struct InboundContext {
    pub request_id: String,
    pub client_addr: Option<SocketAddr>,
    /// Client half of a WebSocket handshake, when the request asked for one.
    pub upgrade: Option<PendingUpgrade>,
}

/// Entry point for every proxied request.
pub struct GatewayRouter {
    table: Arc<RouteTable>,
    global_filters: Vec<Arc<dyn GatewayFilter>>,
    dispatch: Arc<dyn Dispatch>,
}

impl std::fmt::Debug for GatewayRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayRouter")
            .field("table", &self.table)
            .field("global_filters", &self.global_filters)
            .finish()
    }
}

impl GatewayRouter {
    pub fn builder(table: Arc<RouteTable>) -> GatewayRouterBuilder {
        GatewayRouterBuilder {
            table,
            global_filters: Vec::new(),
            dispatch: None,
            body_cache_limit: DEFAULT_BODY_CACHE_LIMIT,
        }
    }

    pub fn table(&self) -> &Arc<RouteTable> {
        &self.table
    }

    /// Global filters, structural ones included, in registration order.
    pub fn global_filters(&self) -> &[Arc<dyn GatewayFilter>] {
        &self.global_filters
    }

    /// Route one request to a response.
    pub async fn route(
        &self,
        request: RequestDescriptor,
        body: RequestBody,
        ctx: InboundContext,
    ) -> GatewayResult<ResponseDescriptor> {
        let started = Instant::now();
        let snapshot = self.table.snapshot();
        let weights = snapshot.choose_weights(&mut rand::thread_rng());

        let Some(route) = snapshot.lookup_with(&request, &weights).cloned() else {
            tracing::debug!(
                request_id = %ctx.request_id,
                method = %request.method(),
                path = %request.path(),
                snapshot_version = snapshot.version(),
                "No route matched"
            );
            metrics::record_request("", request.method().as_str(), 404, "NO_ROUTE_MATCHED", started.elapsed());
            return Err(GatewayError::NoRouteMatched {
                method: request.method().clone(),
                path: request.path().to_string(),
            });
        };

        tracing::debug!(
            request_id = %ctx.request_id,
            route_id = %route.id(),
            method = %request.method(),
            path = %request.path(),
            snapshot_version = snapshot.version(),
            "Route matched"
        );

        let path_variables = route.path_variables(&request);
        let mut exchange = Exchange::new(ctx.request_id, request, body, route.clone());
        exchange.set_path_variables(path_variables);
        exchange.set_client_addr(ctx.client_addr);
        exchange.attributes_mut().insert(weights);
        if let Some(upgrade) = ctx.upgrade {
            exchange.attributes_mut().insert(upgrade);
        }

        let chain = FilterChain::build(&self.global_filters, route.filters());
        chain.execute(&mut exchange, self.dispatch.as_ref()).await?;

        exchange
            .take_response()
            .ok_or_else(|| GatewayError::filter("chain", format!("route '{}' produced no response", route.id())))
    }
}

pub struct GatewayRouterBuilder {
    table: Arc<RouteTable>,
    global_filters: Vec<Arc<dyn GatewayFilter>>,
    dispatch: Option<Arc<dyn Dispatch>>,
    body_cache_limit: usize,
}

impl GatewayRouterBuilder {
    pub fn global_filter(mut self, filter: Arc<dyn GatewayFilter>) -> Self {
        self.global_filters.push(filter);
        self
    }

    pub fn global_filters(mut self, filters: impl IntoIterator<Item = Arc<dyn GatewayFilter>>) -> Self {
        self.global_filters.extend(filters);
        self
    }

    /// Terminal of every chain. Defaults to an upstream dispatcher over a
    /// fresh pool.
    pub fn dispatch(mut self, dispatch: Arc<dyn Dispatch>) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    pub fn body_cache_limit(mut self, limit: usize) -> Self {
        self.body_cache_limit = limit;
        self
    }

    pub fn build(self) -> GatewayRouter {
        let mut global_filters: Vec<Arc<dyn GatewayFilter>> = vec![
            Arc::new(MetricsFilter),
            Arc::new(CacheRequestBodyFilter::new(self.body_cache_limit)),
            Arc::new(RouteToRequestUrlFilter),
            Arc::new(ForwardedHeadersFilter),
            Arc::new(WebsocketRoutingFilter::default()),
        ];
        global_filters.extend(self.global_filters);

        let dispatch = self.dispatch.unwrap_or_else(|| {
            Arc::new(UpstreamDispatcher::new(
                Arc::new(ConnectionPool::new(PoolSettings::default())),
                Duration::from_secs(30),
            ))
        });

        GatewayRouter {
            table: self.table,
            global_filters,
            dispatch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{AddRequestHeader, SetPath};
    use crate::routing::Route;
    use async_trait::async_trait;
    use axum::http::{Method, StatusCode};
    use std::sync::Mutex;

    /// Records the target and request of every dispatched exchange.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, RequestDescriptor)>>,
    }

    #[async_trait]
    impl Dispatch for Recorder {
        async fn handle(&self, exchange: &mut Exchange) -> GatewayResult<()> {
            let target = exchange.target().map(|t| t.to_string()).unwrap_or_default();
            self.calls.lock().unwrap().push((target, exchange.request().clone()));
            exchange.set_response(ResponseDescriptor::new(StatusCode::OK));
            Ok(())
        }
    }

    fn router(routes: Vec<Route>, recorder: &Arc<Recorder>) -> GatewayRouter {
        let table = Arc::new(RouteTable::with_routes(routes).unwrap());
        GatewayRouter::builder(table).dispatch(recorder.clone()).build()
    }

    #[tokio::test]
    async fn forwards_with_route_filters_applied() {
        let recorder = Arc::new(Recorder::default());
        let router = router(
            vec![Route::builder("get")
                .path("/get")
                .filter(AddRequestHeader::new("Hello", "World").unwrap())
                .uri("http://httpbin.test:8080")
                .build()
                .unwrap()],
            &recorder,
        );

        let response = router
            .route(RequestDescriptor::new(Method::GET, "/get"), RequestBody::Empty, InboundContext::default())
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);

        let calls = recorder.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "http://httpbin.test:8080/get");
        assert_eq!(calls[0].1.header_str("hello"), Some("World"));
    }

    #[tokio::test]
    async fn unmatched_request_never_dispatches() {
        let recorder = Arc::new(Recorder::default());
        let router = router(
            vec![Route::builder("get").path("/get").uri("http://httpbin.test").build().unwrap()],
            &recorder,
        );

        let err = router
            .route(RequestDescriptor::new(Method::GET, "/missing"), RequestBody::Empty, InboundContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NoRouteMatched { .. }));
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
        assert!(recorder.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn lower_priority_value_is_selected() {
        let recorder = Arc::new(Recorder::default());
        let router = router(
            vec![
                Route::builder("five").path("/a").priority(5).uri("http://five.test").build().unwrap(),
                Route::builder("one").path("/a").priority(1).uri("http://one.test").build().unwrap(),
            ],
            &recorder,
        );

        router
            .route(RequestDescriptor::new(Method::GET, "/a"), RequestBody::Empty, InboundContext::default())
            .await
            .unwrap();
        assert_eq!(recorder.calls.lock().unwrap()[0].0, "http://one.test/a");
    }

    #[tokio::test]
    async fn captured_variables_reach_filters() {
        let recorder = Arc::new(Recorder::default());
        let router = router(
            vec![Route::builder("rewrite")
                .path("/old/{segment}")
                .filter(SetPath::new("/new/{segment}").unwrap())
                .uri("http://svc.test")
                .build()
                .unwrap()],
            &recorder,
        );

        router
            .route(RequestDescriptor::new(Method::GET, "/old/items"), RequestBody::Empty, InboundContext::default())
            .await
            .unwrap();
        assert_eq!(recorder.calls.lock().unwrap()[0].0, "http://svc.test/new/items");
    }

    #[tokio::test]
    async fn weighted_group_sends_nothing_to_zero_weight() {
        let recorder = Arc::new(Recorder::default());
        let router = router(
            vec![
                Route::builder("old").path("/w").weight("w", 0).uri("http://old.test").build().unwrap(),
                Route::builder("new").path("/w").weight("w", 3).uri("http://new.test").build().unwrap(),
            ],
            &recorder,
        );

        for _ in 0..20 {
            router
                .route(RequestDescriptor::new(Method::GET, "/w"), RequestBody::Empty, InboundContext::default())
                .await
                .unwrap();
        }
        let calls = recorder.calls.lock().unwrap();
        assert_eq!(calls.len(), 20);
        assert!(calls.iter().all(|(target, _)| target == "http://new.test/w"));
    }
}
