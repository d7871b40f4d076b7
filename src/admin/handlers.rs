//! Admin endpoint handlers.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::admin::AdminState;
use crate::metrics::stats::StatsSnapshot;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub ready: bool,
    pub total_routes: usize,
    pub ms_since_last_registry_update: Option<u64>,
}

#[derive(Serialize)]
pub struct RouteEntry {
    pub uri: String,
    pub backends: Vec<String>,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        ready: state.readiness.is_ready(),
        total_routes: state.registry.count(),
        ms_since_last_registry_update: state.registry.ms_since_last_update(),
    })
}

pub async fn get_stats(State(state): State<AdminState>) -> Json<StatsSnapshot> {
    Json(state.stats.snapshot())
}

pub async fn get_routes(State(state): State<AdminState>) -> Json<Vec<RouteEntry>> {
    let routes = state
        .registry
        .dump()
        .into_iter()
        .map(|(uri, backends)| RouteEntry { uri, backends })
        .collect();
    Json(routes)
}
