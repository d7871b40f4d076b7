//! In-process request counters for the admin surface.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::http::StatusCode;
use serde::Serialize;

use crate::metrics::reporter::ProxyReporter;
use crate::route::Endpoint;

/// Atomic counter set kept alongside the metrics sink.
///
/// The admin endpoints read these directly instead of scraping the
/// exporter.
#[derive(Default)]
pub struct ProxyStats {
    total_requests: AtomicU64,
    bad_requests: AtomicU64,
    bad_gateways: AtomicU64,
    recovered_panics: AtomicU64,
    responses_2xx: AtomicU64,
    responses_3xx: AtomicU64,
    responses_4xx: AtomicU64,
    responses_5xx: AtomicU64,
    route_service_responses: AtomicU64,
    websocket_requests: AtomicU64,
    tcp_requests: AtomicU64,
    registry_messages: AtomicU64,
    unregistry_messages: AtomicU64,
}

/// Point-in-time copy of the counters, serialized by the admin endpoints.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub bad_requests: u64,
    pub bad_gateways: u64,
    pub recovered_panics: u64,
    pub responses_2xx: u64,
    pub responses_3xx: u64,
    pub responses_4xx: u64,
    pub responses_5xx: u64,
    pub route_service_responses: u64,
    pub websocket_requests: u64,
    pub tcp_requests: u64,
    pub registry_messages: u64,
    pub unregistry_messages: u64,
}

impl ProxyStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            bad_requests: self.bad_requests.load(Ordering::Relaxed),
            bad_gateways: self.bad_gateways.load(Ordering::Relaxed),
            recovered_panics: self.recovered_panics.load(Ordering::Relaxed),
            responses_2xx: self.responses_2xx.load(Ordering::Relaxed),
            responses_3xx: self.responses_3xx.load(Ordering::Relaxed),
            responses_4xx: self.responses_4xx.load(Ordering::Relaxed),
            responses_5xx: self.responses_5xx.load(Ordering::Relaxed),
            route_service_responses: self.route_service_responses.load(Ordering::Relaxed),
            websocket_requests: self.websocket_requests.load(Ordering::Relaxed),
            tcp_requests: self.tcp_requests.load(Ordering::Relaxed),
            registry_messages: self.registry_messages.load(Ordering::Relaxed),
            unregistry_messages: self.unregistry_messages.load(Ordering::Relaxed),
        }
    }
}

impl ProxyReporter for ProxyStats {
    fn capture_bad_request(&self) {
        self.bad_requests.fetch_add(1, Ordering::Relaxed);
    }

    fn capture_bad_gateway(&self) {
        self.bad_gateways.fetch_add(1, Ordering::Relaxed);
    }

    fn capture_panic(&self) {
        self.recovered_panics.fetch_add(1, Ordering::Relaxed);
    }

    fn capture_routing_request(&self, _endpoint: &Endpoint) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    fn capture_routing_response(&self, _endpoint: &Endpoint, status: StatusCode, _duration: Duration) {
        let counter = match status.as_u16() / 100 {
            2 => &self.responses_2xx,
            3 => &self.responses_3xx,
            4 => &self.responses_4xx,
            5 => &self.responses_5xx,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn capture_route_service_response(&self, _status: StatusCode) {
        self.route_service_responses.fetch_add(1, Ordering::Relaxed);
    }

    fn capture_websocket_request(&self) {
        self.websocket_requests.fetch_add(1, Ordering::Relaxed);
    }

    fn capture_tcp_request(&self) {
        self.tcp_requests.fetch_add(1, Ordering::Relaxed);
    }

    fn capture_lookup_time(&self, _duration: Duration) {}

    fn capture_route_stats(&self, _total_routes: usize, _ms_since_last_update: u64) {}

    fn capture_registry_message(&self, _component: &str) {
        self.registry_messages.fetch_add(1, Ordering::Relaxed);
    }

    fn capture_unregistry_message(&self, _component: &str) {
        self.unregistry_messages.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::ModificationTag;
    use std::collections::HashMap;

    #[test]
    fn counters_accumulate() {
        let stats = ProxyStats::default();
        let endpoint = Endpoint::new(
            "app",
            "host",
            1111,
            "id",
            "0",
            HashMap::new(),
            30,
            None,
            ModificationTag::default(),
        );

        stats.capture_routing_request(&endpoint);
        stats.capture_routing_request(&endpoint);
        stats.capture_routing_response(&endpoint, StatusCode::OK, Duration::from_millis(12));
        stats.capture_routing_response(&endpoint, StatusCode::BAD_GATEWAY, Duration::from_millis(3));
        stats.capture_bad_gateway();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.responses_2xx, 1);
        assert_eq!(snapshot.responses_5xx, 1);
        assert_eq!(snapshot.bad_gateways, 1);
    }
}
