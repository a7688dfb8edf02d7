//! Per-host connection pool.
//!
//! # Responsibilities
//! - Keep idle keep-alive connections per upstream host:port
//! - Cap concurrent connections per host
//! - Account for active, inactive and pending connections
//!
//! # Design Decisions
//! - Idle connections are reused LIFO so the warmest socket goes first
//! - A connection re-enters the idle set only when it was released clean;
//!   everything else is dropped, which closes the socket
//! - Counters are updated under the same lock as the idle list, so a
//!   snapshot from `stats` is always internally consistent

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use axum::body::Body;
use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::error::{GatewayError, GatewayResult};
use crate::observability::metrics;
use crate::upstream::connection::{ConnectionId, PoolKey, PooledConnection};

/// Pool tuning knobs.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Upper bound on active connections per host; further callers wait.
    pub max_connections_per_host: usize,
    pub max_idle_per_host: usize,
    /// Idle connections older than this are closed instead of reused.
    pub idle_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections_per_host: 64,
            max_idle_per_host: 16,
            idle_timeout: Duration::from_secs(90),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Connection counts at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Checked out and serving a request.
    pub active: usize,
    /// Idle and available for reuse.
    pub inactive: usize,
    /// Callers waiting for a connection.
    pub pending: usize,
}

impl PoolStats {
    fn add(&mut self, other: PoolStats) {
        self.active += other.active;
        self.inactive += other.inactive;
        self.pending += other.pending;
    }
}

struct IdleConnection {
    id: ConnectionId,
    sender: SendRequest<Body>,
    idle_since: Instant,
}

struct HostPool {
    idle: Vec<IdleConnection>,
    active: usize,
    pending: usize,
    limit: Arc<Semaphore>,
}

impl HostPool {
    fn new(max_connections: usize) -> Self {
        Self {
            idle: Vec::new(),
            active: 0,
            pending: 0,
            limit: Arc::new(Semaphore::new(max_connections.max(1))),
        }
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            active: self.active,
            inactive: self.idle.len(),
            pending: self.pending,
        }
    }
}

/// Shared pool of upstream HTTP/1.1 connections.
pub struct ConnectionPool {
    settings: PoolSettings,
    hosts: Mutex<HashMap<PoolKey, HostPool>>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("settings", &self.settings)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Counts a caller as pending until acquisition finishes either way.
struct PendingGuard<'a> {
    pool: &'a ConnectionPool,
    key: &'a PoolKey,
}

impl<'a> PendingGuard<'a> {
    fn new(pool: &'a ConnectionPool, key: &'a PoolKey) -> (Self, Arc<Semaphore>) {
        let limit = {
            let mut hosts = pool.lock();
            let host = hosts
                .entry(key.clone())
                .or_insert_with(|| HostPool::new(pool.settings.max_connections_per_host));
            host.pending += 1;
            host.limit.clone()
        };
        (Self { pool, key }, limit)
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Some(host) = self.pool.lock().get_mut(self.key) {
            host.pending = host.pending.saturating_sub(1);
        }
        self.pool.publish();
    }
}

impl ConnectionPool {
    pub fn new(settings: PoolSettings) -> Self {
        Self {
            settings,
            hosts: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PoolKey, HostPool>> {
        self.hosts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check out a connection to `key`, reusing an idle one when possible.
    ///
    /// Waits while the host is at its connection cap. Dropping the returned
    /// guard releases the connection.
    pub async fn acquire(self: &Arc<Self>, key: &PoolKey) -> GatewayResult<PooledConnection> {
        let (pending, limit) = PendingGuard::new(self, key);
        let mut permit = limit.acquire_owned().await.ok();

        while let Some((id, sender)) = self.checkout_idle(key) {
            let mut conn = PooledConnection::new(self.clone(), key.clone(), id, sender, permit.take());
            if conn.ready().await {
                tracing::trace!(connection_id = %id, authority = %key, "Reusing idle connection");
                drop(pending);
                return Ok(conn);
            }
            tracing::debug!(connection_id = %id, authority = %key, "Idle connection went stale");
            permit = conn.discard();
        }

        let (id, sender) = self.connect(key).await?;
        self.lock()
            .entry(key.clone())
            .or_insert_with(|| HostPool::new(self.settings.max_connections_per_host))
            .active += 1;
        drop(pending);
        Ok(PooledConnection::new(self.clone(), key.clone(), id, sender, permit))
    }

    fn checkout_idle(&self, key: &PoolKey) -> Option<(ConnectionId, SendRequest<Body>)> {
        let mut hosts = self.lock();
        let host = hosts.get_mut(key)?;
        while let Some(idle) = host.idle.pop() {
            if idle.sender.is_closed() || idle.idle_since.elapsed() >= self.settings.idle_timeout {
                tracing::trace!(connection_id = %idle.id, authority = %key, "Dropping expired idle connection");
                continue;
            }
            host.active += 1;
            return Some((idle.id, idle.sender));
        }
        None
    }

    async fn connect(&self, key: &PoolKey) -> GatewayResult<(ConnectionId, SendRequest<Body>)> {
        let unreachable = |reason: String| GatewayError::UpstreamUnreachable {
            authority: key.to_string(),
            reason,
        };

        let connecting = TcpStream::connect((key.connect_host(), key.port()));
        let stream = match tokio::time::timeout(self.settings.connect_timeout, connecting).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(unreachable(e.to_string())),
            Err(_) => {
                return Err(unreachable(format!(
                    "connect timed out after {:?}",
                    self.settings.connect_timeout
                )))
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(authority = %key, error = %e, "Failed to set TCP_NODELAY");
        }

        let (sender, connection) = http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| unreachable(e.to_string()))?;

        let id = ConnectionId::new();
        let authority = key.to_string();
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!(connection_id = %id, authority, error = %e, "Upstream connection closed with error");
            }
        });

        tracing::debug!(connection_id = %id, authority = %key, "Opened upstream connection");
        Ok((id, sender))
    }

    /// Return a connection. `sender` is `Some` only for a clean release.
    pub(crate) fn release(&self, key: &PoolKey, id: ConnectionId, sender: Option<SendRequest<Body>>) {
        let (reused, stats) = {
            let mut hosts = self.lock();
            let Some(host) = hosts.get_mut(key) else {
                return;
            };
            host.active = host.active.saturating_sub(1);
            let reused = match sender {
                Some(sender) if !sender.is_closed() && host.idle.len() < self.settings.max_idle_per_host => {
                    host.idle.push(IdleConnection {
                        id,
                        sender,
                        idle_since: Instant::now(),
                    });
                    true
                }
                _ => false,
            };
            (reused, host.stats())
        };

        tracing::debug!(
            connection_id = %id,
            authority = %key,
            reused,
            "Connection released, now: {} active, {} inactive, {} pending",
            stats.active,
            stats.inactive,
            stats.pending
        );
        self.publish();
    }

    /// Totals across all hosts.
    pub fn stats(&self) -> PoolStats {
        let mut total = PoolStats::default();
        for host in self.lock().values() {
            total.add(host.stats());
        }
        total
    }

    pub fn host_stats(&self, key: &PoolKey) -> Option<PoolStats> {
        self.lock().get(key).map(HostPool::stats)
    }

    /// Per-host counts, keyed by `host:port`.
    pub fn all_host_stats(&self) -> Vec<(String, PoolStats)> {
        let mut all: Vec<(String, PoolStats)> = self
            .lock()
            .iter()
            .map(|(key, host)| (key.to_string(), host.stats()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Close idle connections past the idle timeout. Returns how many.
    pub fn evict_expired(&self) -> usize {
        let mut evicted = 0;
        {
            let mut hosts = self.lock();
            for host in hosts.values_mut() {
                let before = host.idle.len();
                host.idle
                    .retain(|c| !c.sender.is_closed() && c.idle_since.elapsed() < self.settings.idle_timeout);
                evicted += before - host.idle.len();
            }
        }
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted idle upstream connections");
            self.publish();
        }
        evicted
    }

    /// Periodically evict expired idle connections until the pool is dropped.
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(pool) => {
                        pool.evict_expired();
                    }
                    None => break,
                }
            }
        })
    }

    fn publish(&self) {
        metrics::record_pool(&self.stats());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::connection::PooledBody;
    use axum::http::{header, Request};
    use axum::routing::get;
    use http_body_util::BodyExt;
    use std::net::SocketAddr;

    async fn backend() -> SocketAddr {
        let app = axum::Router::new().route("/", get(|| async { "ok" }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn key(addr: SocketAddr) -> PoolKey {
        PoolKey::new(addr.ip().to_string(), addr.port())
    }

    async fn round_trip(pool: &Arc<ConnectionPool>, key: &PoolKey) -> ConnectionId {
        let mut conn = pool.acquire(key).await.unwrap();
        let id = conn.id();
        let request = Request::builder()
            .uri("/")
            .header(header::HOST, key.to_string())
            .body(Body::empty())
            .unwrap();
        let response = conn.send(request, usize::MAX).await.unwrap();
        let body = PooledBody::new(response.into_body(), conn);
        let bytes = body.collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"ok");
        id
    }

    #[tokio::test]
    async fn clean_release_allows_reuse() {
        let addr = backend().await;
        let key = key(addr);
        let pool = Arc::new(ConnectionPool::new(PoolSettings::default()));

        let first = round_trip(&pool, &key).await;
        assert_eq!(
            pool.host_stats(&key).unwrap(),
            PoolStats {
                active: 0,
                inactive: 1,
                pending: 0
            }
        );

        let second = round_trip(&pool, &key).await;
        assert_eq!(first, second);
        assert_eq!(pool.stats().inactive, 1);
    }

    #[tokio::test]
    async fn dropped_guard_discards_connection() {
        let addr = backend().await;
        let key = key(addr);
        let pool = Arc::new(ConnectionPool::new(PoolSettings::default()));

        let conn = pool.acquire(&key).await.unwrap();
        assert_eq!(pool.stats().active, 1);
        drop(conn);

        assert_eq!(pool.stats(), PoolStats::default());
    }

    #[tokio::test]
    async fn refused_connection_leaves_no_trace() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let pool = Arc::new(ConnectionPool::new(PoolSettings::default()));
        let err = pool.acquire(&key(addr)).await.unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamUnreachable { .. }));
        assert_eq!(pool.stats(), PoolStats::default());
    }

    #[tokio::test]
    async fn expired_idle_connections_are_evicted() {
        let addr = backend().await;
        let key = key(addr);
        let pool = Arc::new(ConnectionPool::new(PoolSettings {
            idle_timeout: Duration::from_millis(20),
            ..PoolSettings::default()
        }));

        round_trip(&pool, &key).await;
        assert_eq!(pool.stats().inactive, 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pool.evict_expired(), 1);
        assert_eq!(pool.stats().inactive, 0);
    }
}
