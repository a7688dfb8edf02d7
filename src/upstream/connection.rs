//! Pooled upstream connections.
//!
//! # Responsibilities
//! - Identify connections and the host:port pool they belong to
//! - Return a connection to its pool exactly once, on every exit path
//! - Stream response bodies while holding the connection
//!
//! # Design Decisions
//! - `PooledConnection` is an RAII guard; dropping it is the release
//! - Only a connection whose response was read to the end is marked clean
//!   and may be reused; errors, timeouts and cancellations discard it
//! - `PooledBody` pulls frames only when polled, so upstream reads never
//!   outpace the downstream consumer

use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use bytes::Bytes;
use http_body::Body as _;
use http_body::{Frame, SizeHint};
use http_body_util::LengthLimitError;
use hyper::body::Incoming;
use hyper::client::conn::http1::SendRequest;
use tokio::sync::OwnedSemaphorePermit;
use url::Url;

use crate::error::{GatewayError, GatewayResult};
use crate::upstream::pool::ConnectionPool;

/// Global counter for connection IDs. Relaxed ordering is enough for uniqueness.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for an upstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "upstream-{}", self.0)
    }
}

/// Pool partition: one per upstream host and port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    host: String,
    port: u16,
}

impl PoolKey {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into().to_lowercase(),
            port,
        }
    }

    pub fn from_url(url: &Url) -> GatewayResult<Self> {
        let invalid = || GatewayError::UpstreamUnreachable {
            authority: url.to_string(),
            reason: "target has no host or port".into(),
        };
        let host = url.host_str().ok_or_else(invalid)?;
        let port = url.port_or_known_default().ok_or_else(invalid)?;
        Ok(Self::new(host, port))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Host without IPv6 brackets, suitable for socket resolution.
    pub fn connect_host(&self) -> &str {
        self.host.trim_start_matches('[').trim_end_matches(']')
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A checked-out connection. Dropping it hands it back to the pool.
pub struct PooledConnection {
    id: ConnectionId,
    key: PoolKey,
    sender: Option<SendRequest<Body>>,
    pool: Arc<ConnectionPool>,
    clean: bool,
    permit: Option<OwnedSemaphorePermit>,
}

impl PooledConnection {
    pub(crate) fn new(
        pool: Arc<ConnectionPool>,
        key: PoolKey,
        id: ConnectionId,
        sender: SendRequest<Body>,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Self {
        Self {
            id,
            key,
            sender: Some(sender),
            pool,
            clean: false,
            permit,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn key(&self) -> &PoolKey {
        &self.key
    }

    /// Wait until the connection can take a request. False if it died.
    pub(crate) async fn ready(&mut self) -> bool {
        match self.sender.as_mut() {
            Some(sender) => sender.ready().await.is_ok(),
            None => false,
        }
    }

    /// Send a request and wait for the response head. `body_limit` is the
    /// inbound cap reported if the request body overflows while streaming.
    pub async fn send(
        &mut self,
        request: axum::http::Request<Body>,
        body_limit: usize,
    ) -> GatewayResult<axum::http::Response<Incoming>> {
        let Some(sender) = self.sender.as_mut() else {
            return Err(GatewayError::UpstreamUnreachable {
                authority: self.key.to_string(),
                reason: "connection already released".into(),
            });
        };
        sender
            .send_request(request)
            .await
            .map_err(|e| classify(&self.key, e, body_limit))
    }

    /// Allow the connection back into the idle set when released.
    pub fn mark_clean(&mut self) {
        self.clean = true;
    }

    /// Release unclean and hand back the concurrency permit for reuse.
    pub(crate) fn discard(mut self) -> Option<OwnedSemaphorePermit> {
        self.clean = false;
        self.permit.take()
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("clean", &self.clean)
            .finish()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let sender = self.sender.take().filter(|_| self.clean);
        self.pool.release(&self.key, self.id, sender);
    }
}

/// Map a hyper client failure onto the gateway taxonomy.
pub(crate) fn classify(key: &PoolKey, err: hyper::Error, body_limit: usize) -> GatewayError {
    let authority = key.to_string();
    if exceeded_body_limit(&err) {
        GatewayError::PayloadTooLarge { limit: body_limit }
    } else if err.is_parse() || err.is_parse_status() {
        GatewayError::UpstreamMalformedResponse {
            authority,
            reason: err.to_string(),
        }
    } else if err.is_user() || err.is_body_write_aborted() {
        GatewayError::DownstreamCancelled
    } else {
        GatewayError::UpstreamUnreachable {
            authority,
            reason: err.to_string(),
        }
    }
}

/// Whether the inbound body limit tripped while hyper was writing the body.
fn exceeded_body_limit(err: &hyper::Error) -> bool {
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        if cause.is::<LengthLimitError>() {
            return true;
        }
        source = cause.source();
    }
    false
}

/// Upstream response body that owns its connection until end of stream.
pub struct PooledBody {
    inner: Incoming,
    conn: Option<PooledConnection>,
}

impl PooledBody {
    pub fn new(inner: Incoming, conn: PooledConnection) -> Self {
        let mut body = Self {
            inner,
            conn: Some(conn),
        };
        if http_body::Body::is_end_stream(&body.inner) {
            body.finish(true);
        }
        body
    }

    fn finish(&mut self, clean: bool) {
        if let Some(mut conn) = self.conn.take() {
            if clean {
                conn.mark_clean();
            }
        }
    }
}

impl http_body::Body for PooledBody {
    type Data = Bytes;
    type Error = hyper::Error;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Bytes>, hyper::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        match &polled {
            Poll::Ready(None) => this.finish(true),
            Poll::Ready(Some(Err(_))) => this.finish(false),
            Poll::Ready(Some(Ok(_))) if this.inner.is_end_stream() => this.finish(true),
            _ => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl fmt::Debug for PooledBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBody").field("conn", &self.conn).finish()
    }
}
