use std::collections::BTreeMap;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::ConfigError;
use crate::filter::FilterChain;
use crate::http::server::AppState;
use crate::routing::RouteWeight;
use crate::upstream::PoolStats;

#[derive(Serialize, Deserialize)]
pub struct SystemStatus {
    pub version: String,
    pub status: String,
    pub routes: usize,
    pub route_table_version: u64,
}

#[derive(Serialize, Deserialize)]
pub struct RouteSummary {
    pub id: String,
    pub uri: String,
    pub priority: i32,
    /// Effective chain, `name@order`, global filters included.
    pub filters: Vec<String>,
    pub metadata: BTreeMap<String, String>,
    pub timeout_ms: Option<u64>,
    pub retry_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<RouteWeight>,
}

#[derive(Serialize, Deserialize)]
pub struct RoutesResponse {
    pub version: u64,
    pub routes: Vec<RouteSummary>,
}

#[derive(Serialize, Deserialize)]
pub struct HostPoolStats {
    pub authority: String,
    #[serde(flatten)]
    pub stats: PoolStats,
}

#[derive(Serialize, Deserialize)]
pub struct PoolResponse {
    pub total: PoolStats,
    pub hosts: Vec<HostPoolStats>,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let snapshot = state.table.snapshot();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: "operational".to_string(),
        routes: snapshot.len(),
        route_table_version: snapshot.version(),
    })
}

pub async fn get_routes(State(state): State<AppState>) -> Json<RoutesResponse> {
    let snapshot = state.table.snapshot();
    let global = state.router.global_filters();

    let routes = snapshot
        .iter()
        .map(|route| RouteSummary {
            id: route.id().to_string(),
            uri: route.uri().to_string(),
            priority: route.priority(),
            filters: FilterChain::build(global, route.filters()).names(),
            metadata: route.metadata().clone(),
            timeout_ms: route.timeout().map(|t| t.as_millis() as u64),
            retry_attempts: route.retry().max_attempts,
            weight: route.weight().cloned(),
        })
        .collect();

    Json(RoutesResponse {
        version: snapshot.version(),
        routes,
    })
}

pub async fn get_pool(State(state): State<AppState>) -> Json<PoolResponse> {
    let hosts = state
        .pool
        .all_host_stats()
        .into_iter()
        .map(|(authority, stats)| HostPoolStats { authority, stats })
        .collect();

    Json(PoolResponse {
        total: state.pool.stats(),
        hosts,
    })
}

/// Reload routes from the config file the gateway was started with.
pub async fn refresh_routes(State(state): State<AppState>) -> Response {
    match state.reload_from_disk() {
        Ok(Some(version)) => {
            tracing::info!(version, "Routes refreshed via admin API");
            Json(json!({ "version": version, "routes": state.table.snapshot().len() })).into_response()
        }
        Ok(None) => (
            StatusCode::CONFLICT,
            Json(json!({ "error": "gateway was not started from a config file" })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Admin refresh failed, keeping current routes");
            let status = match e {
                ConfigError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::UNPROCESSABLE_ENTITY,
            };
            (status, Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}
