//! The capture interface the request pipeline reports through.

use std::time::Duration;

use axum::http::StatusCode;

use crate::route::Endpoint;

/// Narrow sink for request/response counters and latencies.
///
/// Called concurrently from every request task; implementations must be
/// internally synchronized.
pub trait ProxyReporter: Send + Sync {
    /// A request that could not be routed (bad host, no matching route).
    fn capture_bad_request(&self);

    /// A request that exhausted its endpoints or failed terminally.
    fn capture_bad_gateway(&self);

    /// A handler panic recovered at the chain boundary.
    fn capture_panic(&self);

    /// An endpoint was selected for a request.
    fn capture_routing_request(&self, endpoint: &Endpoint);

    /// A backend response completed.
    fn capture_routing_response(&self, endpoint: &Endpoint, status: StatusCode, duration: Duration);

    /// A route service response completed.
    fn capture_route_service_response(&self, status: StatusCode);

    fn capture_websocket_request(&self);
    fn capture_tcp_request(&self);

    /// Time spent resolving the route for one request.
    fn capture_lookup_time(&self, duration: Duration);

    /// Periodic registry size and staleness.
    fn capture_route_stats(&self, total_routes: usize, ms_since_last_update: u64);

    fn capture_registry_message(&self, component: &str);
    fn capture_unregistry_message(&self, component: &str);
}

/// Status class suffix used by response counters: `2xx`..`5xx`, else `xxx`.
pub fn status_class(status: StatusCode) -> &'static str {
    match status.as_u16() / 100 {
        2 => "2xx",
        3 => "3xx",
        4 => "4xx",
        5 => "5xx",
        _ => "xxx",
    }
}
