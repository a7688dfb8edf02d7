//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with the proxy handler as fallback
//! - Wire up middleware (tracing, request ID, body limit)
//! - Translate between axum requests and gateway descriptors
//! - Hold the client side of WebSocket handshakes for the routing filter
//! - Map gateway errors to client responses at the boundary
//! - Run the admin listener, pool reaper and config reload loop

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::{ws::WebSocketUpgrade, ConnectInfo, FromRequestParts, State},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use http_body::Body as _;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use uuid::Uuid;

use crate::admin;
use crate::config::compile::{build_default_filters, build_routes};
use crate::config::{load_config, ConfigError, GatewayConfig};
use crate::error::GatewayResult;
use crate::http::request::{RequestBody, RequestDescriptor};
use crate::http::response::error_response;
use crate::http::websocket::{is_upgrade_request, PendingUpgrade};
use crate::http::X_REQUEST_ID;
use crate::lifecycle::Shutdown;
use crate::routing::{GatewayRouter, InboundContext, RouteTable};
use crate::upstream::{ConnectionPool, UpstreamDispatcher};

/// Status logged and returned when the client went away mid-request.
const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Application state shared by the proxy handler and the admin API.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<GatewayRouter>,
    pub table: Arc<RouteTable>,
    pub pool: Arc<ConnectionPool>,
    pub config: Arc<ArcSwap<GatewayConfig>>,
    pub config_path: Option<Arc<PathBuf>>,
}

impl AppState {
    /// Compile `config` and swap its routes in. The running table is left
    /// untouched on failure.
    pub fn apply_config(&self, config: GatewayConfig) -> GatewayResult<u64> {
        let routes = build_routes(&config)?;
        let version = self.table.reload(routes)?;
        self.config.store(Arc::new(config));
        Ok(version)
    }

    /// Re-read the config file this gateway was started with.
    pub fn reload_from_disk(&self) -> Result<Option<u64>, ConfigError> {
        let Some(path) = self.config_path.as_deref() else {
            return Ok(None);
        };
        let config = load_config(path)?;
        Ok(Some(self.apply_config(config)?))
    }
}

/// HTTP server for the gateway.
pub struct HttpServer {
    state: AppState,
    config: GatewayConfig,
}

impl HttpServer {
    /// Build routes, pool, dispatcher and router from `config`.
    pub fn new(config: GatewayConfig) -> GatewayResult<Self> {
        let table = Arc::new(RouteTable::with_routes(build_routes(&config)?)?);
        let pool = Arc::new(ConnectionPool::new(config.pool_settings()));
        let dispatcher = Arc::new(
            UpstreamDispatcher::new(pool.clone(), config.timeouts.request())
                .with_body_limit(config.listener.max_body_bytes),
        );

        let router = GatewayRouter::builder(table.clone())
            .global_filters(build_default_filters(&config)?)
            .body_cache_limit(config.listener.body_cache_limit_bytes)
            .dispatch(dispatcher)
            .build();

        tracing::info!(
            routes = table.snapshot().len(),
            global_filters = router.global_filters().len(),
            "Gateway router built"
        );

        let state = AppState {
            router: Arc::new(router),
            table,
            pool,
            config: Arc::new(ArcSwap::from_pointee(config.clone())),
            config_path: None,
        };
        Ok(Self { state, config })
    }

    /// Remember the file the config came from, enabling admin refresh.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.state.config_path = Some(Arc::new(path.into()));
        self
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// The proxy application with all middleware layers.
    pub fn app(&self) -> Router {
        Router::new()
            .fallback(proxy_handler)
            .with_state(self.state.clone())
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(RequestBodyLimitLayer::new(self.config.listener.max_body_bytes)),
            )
    }

    /// Serve until `shutdown` fires. Also runs the admin API (when enabled)
    /// and the idle-connection reaper.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let reaper = self
            .state
            .pool
            .spawn_reaper(Duration::from_secs(self.config.pool.reaper_interval_secs.max(1)));

        if self.config.admin.enabled {
            let admin_listener = TcpListener::bind(&self.config.admin.bind_address).await?;
            let admin_addr = admin_listener.local_addr()?;
            let admin_app = admin::router(self.state.clone());
            let mut stop = shutdown.subscribe();
            tokio::spawn(async move {
                tracing::info!(address = %admin_addr, "Admin API listening");
                let served = axum::serve(admin_listener, admin_app)
                    .with_graceful_shutdown(async move {
                        let _ = stop.recv().await;
                    })
                    .await;
                if let Err(e) = served {
                    tracing::error!(error = %e, "Admin API stopped with error");
                }
            });
        }

        let app = self.app().into_make_service_with_connect_info::<SocketAddr>();
        let mut stop = shutdown.subscribe();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop.recv().await;
            })
            .await?;

        reaper.abort();
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Apply configs from the file watcher until shutdown.
pub fn spawn_reload_loop(
    state: AppState,
    mut updates: mpsc::UnboundedReceiver<GatewayConfig>,
    shutdown: &Shutdown,
) -> JoinHandle<()> {
    let mut stop = shutdown.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(config) = updates.recv() => match state.apply_config(config) {
                    Ok(version) => tracing::info!(version, "Applied reloaded configuration"),
                    Err(e) => tracing::error!(error = %e, "Rejected reloaded configuration, keeping current routes"),
                },
                _ = stop.recv() => break,
                else => break,
            }
        }
    })
}

/// Main proxy handler: descriptor in, descriptor out.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let client_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let request_id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let (mut parts, body) = request.into_parts();
    let upgrade = if is_upgrade_request(&parts.headers) {
        match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
            Ok(upgrade) => Some(PendingUpgrade::new(upgrade)),
            Err(rejection) => return rejection.into_response(),
        }
    } else {
        None
    };
    let descriptor = RequestDescriptor::from_parts(&parts);
    let body = if body.is_end_stream() {
        RequestBody::Empty
    } else {
        RequestBody::streaming(body)
    };
    let ctx = InboundContext {
        request_id: request_id.clone(),
        client_addr,
        upgrade,
    };

    match state.router.route(descriptor, body, ctx).await {
        Ok(response) => response.into_response(),
        Err(err) => match error_response(&err) {
            Some(response) => {
                tracing::warn!(
                    request_id = %request_id,
                    code = err.code(),
                    status = response.status.as_u16(),
                    error = %err,
                    "Request failed"
                );
                response.into_response()
            }
            None => {
                tracing::debug!(request_id = %request_id, "Client went away, no response sent");
                StatusCode::from_u16(CLIENT_CLOSED_REQUEST)
                    .unwrap_or(StatusCode::BAD_REQUEST)
                    .into_response()
            }
        },
    }
}
