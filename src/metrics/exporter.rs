//! metrics-crate backed reporter and Prometheus exposition.

use std::net::SocketAddr;
use std::time::Duration;

use axum::http::StatusCode;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::metrics::reporter::{status_class, ProxyReporter};
use crate::route::Endpoint;

/// Install the Prometheus recorder and scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus recorder");

    tracing::info!(address = %addr, "metrics exporter listening");
}

/// Reporter that emits through the `metrics` facade.
///
/// Counter names mirror the routing platform's conventions: per-component
/// request counters, status-class response counters, and millisecond
/// latency series.
#[derive(Default)]
pub struct MetricsReporter;

impl MetricsReporter {
    pub fn new() -> Self {
        Self
    }
}

impl ProxyReporter for MetricsReporter {
    fn capture_bad_request(&self) {
        counter!("rejected_requests").increment(1);
    }

    fn capture_bad_gateway(&self) {
        counter!("bad_gateways").increment(1);
    }

    fn capture_panic(&self) {
        counter!("recovered_panics").increment(1);
    }

    fn capture_routing_request(&self, endpoint: &Endpoint) {
        counter!("total_requests").increment(1);

        if let Some(component) = endpoint.component() {
            counter!(format!("requests.{component}")).increment(1);
            if component.starts_with("dea-") {
                counter!("routed_app_requests").increment(1);
            }
        }
    }

    fn capture_routing_response(&self, endpoint: &Endpoint, status: StatusCode, duration: Duration) {
        counter!("responses").increment(1);
        counter!(format!("responses.{}", status_class(status))).increment(1);

        let latency_ms = duration.as_secs_f64() * 1000.0;
        histogram!("latency").record(latency_ms);
        if let Some(component) = endpoint.component() {
            histogram!(format!("latency.{component}")).record(latency_ms);
        }
    }

    fn capture_route_service_response(&self, status: StatusCode) {
        counter!("responses.route_services").increment(1);
        counter!(format!("responses.route_services.{}", status_class(status))).increment(1);
    }

    fn capture_websocket_request(&self) {
        counter!("websocket_requests").increment(1);
    }

    fn capture_tcp_request(&self) {
        counter!("tcp_requests").increment(1);
    }

    fn capture_lookup_time(&self, duration: Duration) {
        gauge!("route_lookup_time").set(duration.as_nanos() as f64);
    }

    fn capture_route_stats(&self, total_routes: usize, ms_since_last_update: u64) {
        gauge!("total_routes").set(total_routes as f64);
        gauge!("ms_since_last_registry_update").set(ms_since_last_update as f64);
    }

    fn capture_registry_message(&self, component: &str) {
        if component.is_empty() {
            counter!("registry_message").increment(1);
        } else {
            counter!(format!("registry_message.{component}")).increment(1);
        }
    }

    fn capture_unregistry_message(&self, component: &str) {
        if component.is_empty() {
            counter!("unregistry_message").increment(1);
        } else {
            counter!(format!("unregistry_message.{component}")).increment(1);
        }
    }
}
