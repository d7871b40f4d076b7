//! Admin JSON endpoints.
//!
//! Served on a separate listener so operational traffic never mixes with
//! proxied traffic.

pub mod handlers;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;

use crate::health::Readiness;
use crate::metrics::ProxyStats;
use crate::registry::RouteRegistry;

/// State injected into admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub stats: Arc<ProxyStats>,
    pub registry: Arc<RouteRegistry>,
    pub readiness: Arc<Readiness>,
}

/// Build the admin router.
pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/status", get(handlers::get_status))
        .route("/stats", get(handlers::get_stats))
        .route("/routes", get(handlers::get_routes))
        .with_state(state)
}
