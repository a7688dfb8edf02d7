//! Per-request exchange context.
//!
//! An `Exchange` pairs the request being forwarded with a mutable attribute
//! bag and, once produced, the response. It is owned by exactly one request
//! task and is dropped when the response has been handed back.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::Extensions;
use url::Url;

use crate::error::GatewayResult;
use crate::http::request::{RequestBody, RequestDescriptor};
use crate::http::response::ResponseDescriptor;
use crate::routing::Route;

/// Variables captured by a path pattern, e.g. `{segment}`.
pub type PathVariables = HashMap<String, String>;

/// Named timing marks relative to the start of the exchange.
#[derive(Debug, Clone)]
pub struct Timings {
    started: Instant,
    marks: Vec<(&'static str, Instant)>,
}

impl Timings {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            marks: Vec::new(),
        }
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn mark(&mut self, name: &'static str) {
        self.marks.push((name, Instant::now()));
    }

    /// Elapsed time between the start and the named mark.
    pub fn since_start(&self, name: &str) -> Option<Duration> {
        self.marks
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, at)| at.duration_since(self.started))
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Mutable per-request context passed through the filter chain.
#[derive(Debug)]
pub struct Exchange {
    request_id: String,
    original: Arc<RequestDescriptor>,
    request: RequestDescriptor,
    body: RequestBody,
    route: Arc<Route>,
    target: Option<Url>,
    path_variables: PathVariables,
    client_addr: Option<SocketAddr>,
    attributes: Extensions,
    timings: Timings,
    response: Option<ResponseDescriptor>,
    dispatched: bool,
}

impl Exchange {
    pub fn new(request_id: impl Into<String>, request: RequestDescriptor, body: RequestBody, route: Arc<Route>) -> Self {
        Self {
            request_id: request_id.into(),
            original: Arc::new(request.clone()),
            request,
            body,
            route,
            target: None,
            path_variables: PathVariables::new(),
            client_addr: None,
            attributes: Extensions::new(),
            timings: Timings::new(),
            response: None,
            dispatched: false,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// The request as it arrived, before any filter changed it.
    pub fn original_request(&self) -> &Arc<RequestDescriptor> {
        &self.original
    }

    /// The pending request that will be forwarded upstream.
    pub fn request(&self) -> &RequestDescriptor {
        &self.request
    }

    /// Replace the pending request with a filter-produced copy.
    pub fn mutate_request(&mut self, f: impl FnOnce(RequestDescriptor) -> RequestDescriptor) {
        self.request = f(self.request.clone());
    }

    pub fn body_mut(&mut self) -> &mut RequestBody {
        &mut self.body
    }

    /// Move the body handle out, leaving `Consumed` behind.
    pub fn take_body(&mut self) -> RequestBody {
        std::mem::replace(&mut self.body, RequestBody::Consumed)
    }

    /// Buffer the body so it can be replayed.
    pub async fn cache_body(&mut self, limit: usize) -> GatewayResult<()> {
        self.body.cache(limit).await.map(|_| ())
    }

    pub fn route(&self) -> &Arc<Route> {
        &self.route
    }

    /// Fully resolved upstream URL, once computed.
    pub fn target(&self) -> Option<&Url> {
        self.target.as_ref()
    }

    pub fn set_target(&mut self, target: Url) {
        self.target = Some(target);
    }

    pub fn path_variables(&self) -> &PathVariables {
        &self.path_variables
    }

    pub fn set_path_variables(&mut self, vars: PathVariables) {
        self.path_variables = vars;
    }

    pub fn client_addr(&self) -> Option<SocketAddr> {
        self.client_addr
    }

    pub fn set_client_addr(&mut self, addr: Option<SocketAddr>) {
        self.client_addr = addr;
    }

    /// Typed attribute bag for filters.
    pub fn attributes(&self) -> &Extensions {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut Extensions {
        &mut self.attributes
    }

    pub fn timings(&self) -> &Timings {
        &self.timings
    }

    pub fn timings_mut(&mut self) -> &mut Timings {
        &mut self.timings
    }

    pub fn response(&self) -> Option<&ResponseDescriptor> {
        self.response.as_ref()
    }

    pub fn response_mut(&mut self) -> Option<&mut ResponseDescriptor> {
        self.response.as_mut()
    }

    pub fn set_response(&mut self, response: ResponseDescriptor) {
        self.response = Some(response);
    }

    pub fn take_response(&mut self) -> Option<ResponseDescriptor> {
        self.response.take()
    }

    /// Whether the chain reached the upstream dispatch step.
    pub fn was_dispatched(&self) -> bool {
        self.dispatched
    }

    pub fn mark_dispatched(&mut self) {
        self.dispatched = true;
        self.timings.mark("dispatched");
    }
}
