//! Upstream dispatch.
//!
//! # Responsibilities
//! - Forward the filtered request to the resolved upstream URL
//! - Apply the per-route timeout and retry policy
//! - Classify failures into gateway errors
//!
//! # Design Decisions
//! - The timeout bounds connection acquisition plus the wait for response
//!   headers; the body then streams under the client's own pace
//! - A timed-out or cancelled attempt drops its connection guard, so the
//!   socket is discarded rather than reused
//! - Retries require a replayable body; a streamed body was spent on the
//!   first attempt

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderValue, Request, Version};
use url::Url;

use crate::error::{GatewayError, GatewayResult};
use crate::filter::Dispatch;
use crate::http::exchange::Exchange;
use crate::http::request::{RequestBody, RequestDescriptor};
use crate::http::response::{strip_hop_by_hop, ResponseDescriptor};
use crate::observability::metrics;
use crate::resilience::RetryPolicy;
use crate::routing::Route;
use crate::upstream::connection::{PoolKey, PooledBody};
use crate::upstream::pool::ConnectionPool;

/// Timeout and retry settings for one dispatch.
#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

/// Sends requests upstream over pooled connections.
#[derive(Debug, Clone)]
pub struct UpstreamDispatcher {
    pool: Arc<ConnectionPool>,
    default_timeout: Duration,
    body_limit: usize,
}

impl UpstreamDispatcher {
    pub fn new(pool: Arc<ConnectionPool>, default_timeout: Duration) -> Self {
        Self {
            pool,
            default_timeout,
            body_limit: usize::MAX,
        }
    }

    /// Inbound body cap, reported when a streamed body overflows it.
    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Route overrides on top of the gateway defaults.
    pub fn policy_for(&self, route: &Route) -> DispatchPolicy {
        DispatchPolicy {
            timeout: route.timeout().unwrap_or(self.default_timeout),
            retry: route.retry().clone(),
        }
    }

    /// Send `request` to `target` and return the upstream response with a
    /// streaming body.
    pub async fn dispatch(
        &self,
        target: &Url,
        request: &RequestDescriptor,
        body: &mut RequestBody,
        policy: &DispatchPolicy,
    ) -> GatewayResult<ResponseDescriptor> {
        let key = PoolKey::from_url(target)?;
        let mut attempt = 1;

        loop {
            let started = Instant::now();
            let outgoing = build_upstream_request(target, request, body.take()?)?;
            match self.send_once(&key, outgoing, policy.timeout).await {
                Ok(response) => {
                    metrics::record_upstream(&key.to_string(), "success");
                    tracing::debug!(
                        authority = %key,
                        status = response.status.as_u16(),
                        attempt,
                        latency_ms = started.elapsed().as_millis() as u64,
                        "Upstream responded"
                    );
                    return Ok(response);
                }
                Err(err) => {
                    metrics::record_upstream(&key.to_string(), err.code());
                    if body.is_replayable() && policy.retry.should_retry(attempt, request.method(), &err) {
                        let delay = policy.retry.backoff(attempt);
                        tracing::warn!(
                            authority = %key,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "Upstream attempt failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    tracing::warn!(authority = %key, attempt, error = %err, "Upstream request failed");
                    return Err(err);
                }
            }
        }
    }

    async fn send_once(&self, key: &PoolKey, outgoing: Request<Body>, timeout: Duration) -> GatewayResult<ResponseDescriptor> {
        let exchange = async {
            let mut conn = self.pool.acquire(key).await?;
            let response = conn.send(outgoing, self.body_limit).await?;
            Ok::<_, GatewayError>((conn, response))
        };

        let result = tokio::time::timeout(timeout, exchange).await;
        let (conn, response) = match result {
            Ok(outcome) => outcome?,
            Err(_) => {
                return Err(GatewayError::UpstreamTimeout {
                    authority: key.to_string(),
                    timeout,
                })
            }
        };

        let (mut parts, incoming) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        Ok(ResponseDescriptor {
            status: parts.status,
            headers: parts.headers,
            body: Body::new(PooledBody::new(incoming, conn)),
        })
    }
}

#[async_trait]
impl Dispatch for UpstreamDispatcher {
    async fn handle(&self, exchange: &mut Exchange) -> GatewayResult<()> {
        let target = match exchange.target() {
            Some(target) => target.clone(),
            None => exchange.route().target_for(exchange.request()),
        };
        let policy = self.policy_for(exchange.route());
        let request = exchange.request().clone();
        let mut body = exchange.take_body();

        let result = self.dispatch(&target, &request, &mut body, &policy).await;
        *exchange.body_mut() = body;
        let response = result?;

        exchange.timings_mut().mark("upstream_headers");
        exchange.set_response(response);
        Ok(())
    }
}

/// Origin-form HTTP/1.1 request for `target`, with hop-by-hop headers removed
/// and `Host` pointing at the upstream.
fn build_upstream_request(target: &Url, request: &RequestDescriptor, body: Body) -> GatewayResult<Request<Body>> {
    let invalid = |reason: String| GatewayError::InvalidRoute {
        id: String::new(),
        reason,
    };

    let mut path_and_query = target.path().to_string();
    if let Some(query) = target.query() {
        path_and_query.push('?');
        path_and_query.push_str(query);
    }

    let host = target
        .host_str()
        .ok_or_else(|| invalid(format!("target '{}' has no host", target)))?;
    let authority = match target.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };

    let mut headers = request.headers().clone();
    strip_hop_by_hop(&mut headers);
    headers.insert(
        header::HOST,
        HeaderValue::from_str(&authority).map_err(|e| invalid(format!("invalid host '{}': {}", authority, e)))?,
    );

    let mut outgoing = Request::builder()
        .method(request.method().clone())
        .uri(path_and_query.as_str())
        .version(Version::HTTP_11)
        .body(body)
        .map_err(|e| invalid(format!("cannot build upstream request '{}': {}", path_and_query, e)))?;
    *outgoing.headers_mut() = headers;
    Ok(outgoing)
}
