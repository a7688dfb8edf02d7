//! Filter chain execution.
//!
//! # Responsibilities
//! - Merge global and route filters into one ordered list
//! - Run filters as nested continuations ending in a dispatch step
//!
//! # Design Decisions
//! - Stable sort: equal orders keep registration sequence (global filters
//!   first, then route filters in declaration order)
//! - Filter execution within one request is strictly sequential

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::GatewayResult;
use crate::filter::GatewayFilter;
use crate::http::exchange::Exchange;

/// Terminal step of a chain, typically the upstream call.
#[async_trait]
pub trait Dispatch: Send + Sync {
    /// Produce a response on the exchange.
    async fn handle(&self, exchange: &mut Exchange) -> GatewayResult<()>;
}

/// Continuation representing "the rest of the chain".
///
/// Consumed by [`Next::run`], so each remaining filter runs at most once.
pub struct Next<'a> {
    filters: &'a [Arc<dyn GatewayFilter>],
    dispatch: &'a dyn Dispatch,
}

impl<'a> Next<'a> {
    /// Invoke the remaining chain.
    pub async fn run(self, exchange: &mut Exchange) -> GatewayResult<()> {
        match self.filters.split_first() {
            Some((filter, rest)) => {
                tracing::trace!(
                    request_id = %exchange.request_id(),
                    filter = filter.name(),
                    order = %filter.order(),
                    "Invoking filter"
                );
                let next = Next {
                    filters: rest,
                    dispatch: self.dispatch,
                };
                filter.filter(exchange, next).await
            }
            None => {
                exchange.mark_dispatched();
                self.dispatch.handle(exchange).await
            }
        }
    }

    /// Number of filters left before dispatch.
    pub fn remaining(&self) -> usize {
        self.filters.len()
    }
}

/// Ordered filters for one matched route.
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    filters: Vec<Arc<dyn GatewayFilter>>,
}

impl FilterChain {
    /// Global filters ∪ route filters, stable-sorted by order.
    pub fn build(global: &[Arc<dyn GatewayFilter>], route: &[Arc<dyn GatewayFilter>]) -> Self {
        let mut filters: Vec<Arc<dyn GatewayFilter>> = global.iter().chain(route.iter()).cloned().collect();
        filters.sort_by_key(|f| f.order());
        Self { filters }
    }

    pub fn filters(&self) -> &[Arc<dyn GatewayFilter>] {
        &self.filters
    }

    pub fn names(&self) -> Vec<String> {
        self.filters
            .iter()
            .map(|f| format!("{}@{}", f.name(), f.order()))
            .collect()
    }

    /// Run the chain, ending in `dispatch` unless a filter short-circuits.
    pub async fn execute(&self, exchange: &mut Exchange, dispatch: &dyn Dispatch) -> GatewayResult<()> {
        Next {
            filters: &self.filters,
            dispatch,
        }
        .run(exchange)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::filter::{FilterOrder, OrderedFilter};
    use crate::http::request::{RequestBody, RequestDescriptor};
    use crate::http::response::ResponseDescriptor;
    use crate::routing::Route;
    use axum::http::{Method, StatusCode};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    #[derive(Debug)]
    struct Recording {
        name: String,
        order: FilterOrder,
        log: Log,
    }

    #[async_trait]
    impl GatewayFilter for Recording {
        fn name(&self) -> &str {
            &self.name
        }

        fn order(&self) -> FilterOrder {
            self.order
        }

        async fn filter(&self, exchange: &mut Exchange, next: Next<'_>) -> GatewayResult<()> {
            self.log.lock().unwrap().push(format!("pre:{}", self.name));
            next.run(exchange).await?;
            self.log.lock().unwrap().push(format!("post:{}", self.name));
            Ok(())
        }
    }

    #[derive(Debug)]
    struct Reject;

    #[async_trait]
    impl GatewayFilter for Reject {
        fn name(&self) -> &str {
            "reject"
        }

        async fn filter(&self, exchange: &mut Exchange, _next: Next<'_>) -> GatewayResult<()> {
            exchange.set_response(ResponseDescriptor::new(StatusCode::UNAUTHORIZED));
            Ok(())
        }
    }

    #[derive(Debug)]
    struct Fail;

    #[async_trait]
    impl GatewayFilter for Fail {
        fn name(&self) -> &str {
            "fail"
        }

        async fn filter(&self, _exchange: &mut Exchange, _next: Next<'_>) -> GatewayResult<()> {
            Err(GatewayError::filter("fail", "boom"))
        }
    }

    #[derive(Default)]
    struct CountingDispatch {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Dispatch for CountingDispatch {
        async fn handle(&self, exchange: &mut Exchange) -> GatewayResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            exchange.set_response(ResponseDescriptor::new(StatusCode::OK));
            Ok(())
        }
    }

    fn exchange() -> Exchange {
        let route = Route::builder("r").path("/").uri("http://example.test").build().unwrap();
        Exchange::new(
            "req-1",
            RequestDescriptor::new(Method::GET, "/"),
            RequestBody::Empty,
            Arc::new(route),
        )
    }

    fn recording(name: &str, order: i32, log: &Log) -> Arc<dyn GatewayFilter> {
        Arc::new(Recording {
            name: name.to_string(),
            order: FilterOrder(order),
            log: log.clone(),
        })
    }

    #[tokio::test]
    async fn post_processing_unwinds_in_reverse() {
        let log: Log = Arc::default();
        let global = vec![recording("g10", 10, &log), recording("g0", 0, &log)];
        let route = vec![recording("r0", 0, &log), recording("r-5", -5, &log)];
        let chain = FilterChain::build(&global, &route);
        let dispatch = CountingDispatch::default();

        let mut ex = exchange();
        chain.execute(&mut ex, &dispatch).await.unwrap();

        let log = log.lock().unwrap().clone();
        assert_eq!(
            log,
            vec![
                "pre:r-5", "pre:g0", "pre:r0", "pre:g10", "post:g10", "post:r0", "post:g0", "post:r-5",
            ]
        );
        assert_eq!(dispatch.calls.load(Ordering::SeqCst), 1);
        assert!(ex.was_dispatched());
    }

    #[tokio::test]
    async fn short_circuit_skips_dispatch() {
        let log: Log = Arc::default();
        let global = vec![recording("outer", 0, &log)];
        let route: Vec<Arc<dyn GatewayFilter>> = vec![Arc::new(OrderedFilter::new(FilterOrder(5), Arc::new(Reject)))];
        let chain = FilterChain::build(&global, &route);
        let dispatch = CountingDispatch::default();

        let mut ex = exchange();
        chain.execute(&mut ex, &dispatch).await.unwrap();

        assert_eq!(dispatch.calls.load(Ordering::SeqCst), 0);
        assert!(!ex.was_dispatched());
        assert_eq!(ex.response().unwrap().status, StatusCode::UNAUTHORIZED);
        assert_eq!(*log.lock().unwrap(), vec!["pre:outer", "post:outer"]);
    }

    #[tokio::test]
    async fn failure_unwinds_without_post_processing() {
        let log: Log = Arc::default();
        let global = vec![recording("outer", 0, &log)];
        let route: Vec<Arc<dyn GatewayFilter>> = vec![Arc::new(OrderedFilter::new(FilterOrder(1), Arc::new(Fail)))];
        let chain = FilterChain::build(&global, &route);
        let dispatch = CountingDispatch::default();

        let mut ex = exchange();
        let err = chain.execute(&mut ex, &dispatch).await.unwrap_err();

        assert!(matches!(err, GatewayError::FilterExecution { .. }));
        assert_eq!(dispatch.calls.load(Ordering::SeqCst), 0);
        assert_eq!(*log.lock().unwrap(), vec!["pre:outer"]);
    }

    #[test]
    fn ordering_is_stable_across_builds() {
        let log: Log = Arc::default();
        let global = vec![recording("a", 0, &log), recording("b", 0, &log)];
        let route = vec![recording("c", 0, &log)];
        let first = FilterChain::build(&global, &route).names();
        for _ in 0..10 {
            assert_eq!(FilterChain::build(&global, &route).names(), first);
        }
        assert_eq!(first, vec!["a@0", "b@0", "c@0"]);
    }
}
