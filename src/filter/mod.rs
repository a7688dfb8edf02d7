//! Filter subsystem.
//!
//! # Data Flow
//! ```text
//! Matched route
//!     → chain.rs (global filters ∪ route filters, stable sort by order)
//!     → filter 1 pre ─→ filter 2 pre ─→ ... ─→ Dispatch (upstream call)
//!     ← filter 1 post ←─ filter 2 post ←─ ... ←─┘
//! ```
//!
//! # Order ranges
//! Orders are split into three documented bands so structural filters never
//! depend on extreme sentinel values:
//!
//! | Range                      | Use                                          |
//! |----------------------------|----------------------------------------------|
//! | `[-2_000_000, -1_000_000)` | structural, before user filters              |
//! | `[-1_000_000, 1_000_000]`  | user filters                                 |
//! | `(1_000_000, 2_000_000]`   | structural, after user filters               |
//!
//! # Design Decisions
//! - A filter receives the exchange and a one-shot continuation; it runs at
//!   most once per request because the continuation is consumed on use
//! - Post-processing unwinds in reverse order by construction
//! - Short-circuiting means setting a response and not continuing

pub mod chain;
pub mod headers;
pub mod path;
pub mod status;
pub mod structural;
pub mod websocket;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{GatewayError, GatewayResult};
use crate::http::exchange::Exchange;

pub use chain::{Dispatch, FilterChain, Next};
pub use headers::{AddRequestHeader, AddResponseHeader, RemoveRequestHeader, RemoveResponseHeader, SetRequestHeader};
pub use path::{PrefixPath, SetPath, StripPrefix};
pub use status::{RequireHeader, SetStatus};
pub use structural::{CacheRequestBodyFilter, ForwardedHeadersFilter, MetricsFilter, RouteToRequestUrlFilter};
pub use websocket::WebsocketRoutingFilter;

/// Position of a filter in the chain. Lower runs earlier on the request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FilterOrder(pub i32);

impl FilterOrder {
    /// Lowest order available to user filters.
    pub const USER_MIN: i32 = -1_000_000;
    /// Highest order available to user filters.
    pub const USER_MAX: i32 = 1_000_000;

    /// Wraps everything else so status and latency cover short-circuits.
    pub const METRICS: FilterOrder = FilterOrder(-1_900_000);
    /// Buffers the request body before user filters may inspect it.
    pub const CACHE_REQUEST_BODY: FilterOrder = FilterOrder(-1_800_000);
    pub const DEFAULT: FilterOrder = FilterOrder(0);
    /// Resolves the upstream URL after user filters rewrote the request.
    pub const ROUTE_TO_REQUEST_URL: FilterOrder = FilterOrder(1_100_000);
    pub const FORWARDED_HEADERS: FilterOrder = FilterOrder(1_200_000);
    /// Takes over upgrade requests just ahead of the dispatcher.
    pub const WEBSOCKET_ROUTING: FilterOrder = FilterOrder(1_900_000);

    /// Order for a user filter, rejecting values in the structural bands.
    pub fn user(order: i32) -> GatewayResult<Self> {
        if (Self::USER_MIN..=Self::USER_MAX).contains(&order) {
            Ok(FilterOrder(order))
        } else {
            Err(GatewayError::InvalidRoute {
                id: String::new(),
                reason: format!(
                    "filter order {} outside user range [{}, {}]",
                    order,
                    Self::USER_MIN,
                    Self::USER_MAX
                ),
            })
        }
    }

    pub fn is_structural(self) -> bool {
        !(Self::USER_MIN..=Self::USER_MAX).contains(&self.0)
    }
}

impl fmt::Display for FilterOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A unit of request/response processing.
#[async_trait]
pub trait GatewayFilter: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn order(&self) -> FilterOrder {
        FilterOrder::DEFAULT
    }

    /// Process the exchange. Call `next.run(exchange)` to continue the
    /// chain; return without calling it to short-circuit.
    async fn filter(&self, exchange: &mut Exchange, next: Next<'_>) -> GatewayResult<()>;
}

/// Overrides the order of another filter.
#[derive(Debug, Clone)]
pub struct OrderedFilter {
    order: FilterOrder,
    inner: Arc<dyn GatewayFilter>,
}

impl OrderedFilter {
    pub fn new(order: FilterOrder, inner: Arc<dyn GatewayFilter>) -> Self {
        Self { order, inner }
    }
}

#[async_trait]
impl GatewayFilter for OrderedFilter {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn order(&self) -> FilterOrder {
        self.order
    }

    async fn filter(&self, exchange: &mut Exchange, next: Next<'_>) -> GatewayResult<()> {
        self.inner.filter(exchange, next).await
    }
}


#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use axum::http::{HeaderName, HeaderValue, Method, StatusCode};

    use crate::error::{GatewayError, GatewayResult};
    use crate::filter::{Dispatch, FilterChain};
    use crate::http::exchange::{Exchange, PathVariables};
    use crate::http::request::{RequestBody, RequestDescriptor};
    use crate::http::response::ResponseDescriptor;
    use crate::routing::Route;

    /// Terminal that records the request it was handed and answers 200.
    #[derive(Debug, Default)]
    pub struct EchoDispatch {
        seen: Mutex<Option<RequestDescriptor>>,
        cached: Mutex<bool>,
        fail: bool,
    }

    impl EchoDispatch {
        pub const MARKER: &'static str = "x-echo";

        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub fn seen(&self) -> Option<RequestDescriptor> {
            self.seen.lock().unwrap().clone()
        }

        pub fn body_was_cached(&self) -> bool {
            *self.cached.lock().unwrap()
        }
    }

    #[async_trait]
    impl Dispatch for EchoDispatch {
        async fn handle(&self, exchange: &mut Exchange) -> GatewayResult<()> {
            if self.fail {
                return Err(GatewayError::UpstreamUnreachable {
                    authority: "backend.test:80".into(),
                    reason: "refused".into(),
                });
            }
            *self.seen.lock().unwrap() = Some(exchange.request().clone());
            *self.cached.lock().unwrap() = exchange.body_mut().is_cached();
            exchange.set_response(
                ResponseDescriptor::new(StatusCode::OK)
                    .with_header(HeaderName::from_static(Self::MARKER), HeaderValue::from_static("1")),
            );
            Ok(())
        }
    }

    pub fn exchange_for(route: Route, path_and_query: &str, headers: &[(&str, &str)]) -> Exchange {
        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (path_and_query, None),
        };
        let mut req = RequestDescriptor::new(Method::GET, path).with_query(query);
        for (name, value) in headers {
            req = req.with_header(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        Exchange::new("test-request", req, RequestBody::Empty, Arc::new(route))
    }

    /// Run `chain` for a GET on a catch-all route; returns the exchange and
    /// the request the terminal saw, if it was reached.
    pub async fn run(
        chain: &FilterChain,
        path_and_query: &str,
        headers: &[(&str, &str)],
        vars: PathVariables,
    ) -> (Exchange, Option<RequestDescriptor>) {
        let route = Route::builder("test").path("/**").uri("http://backend.test").build().unwrap();
        let mut ex = exchange_for(route, path_and_query, headers);
        ex.set_path_variables(vars);
        let dispatch = EchoDispatch::default();
        chain.execute(&mut ex, &dispatch).await.unwrap();
        (ex, dispatch.seen())
    }
}
