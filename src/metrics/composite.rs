//! Fan-out reporter.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;

use crate::metrics::reporter::ProxyReporter;
use crate::route::Endpoint;

/// Forwards every capture to an ordered list of reporters.
///
/// Transparent by contract: call counts and arguments reach each underlying
/// reporter verbatim, in registration order.
pub struct CompositeReporter {
    reporters: Vec<Arc<dyn ProxyReporter>>,
}

impl CompositeReporter {
    pub fn new(reporters: Vec<Arc<dyn ProxyReporter>>) -> Self {
        Self { reporters }
    }
}

impl ProxyReporter for CompositeReporter {
    fn capture_bad_request(&self) {
        for r in &self.reporters {
            r.capture_bad_request();
        }
    }

    fn capture_bad_gateway(&self) {
        for r in &self.reporters {
            r.capture_bad_gateway();
        }
    }

    fn capture_panic(&self) {
        for r in &self.reporters {
            r.capture_panic();
        }
    }

    fn capture_routing_request(&self, endpoint: &Endpoint) {
        for r in &self.reporters {
            r.capture_routing_request(endpoint);
        }
    }

    fn capture_routing_response(&self, endpoint: &Endpoint, status: StatusCode, duration: Duration) {
        for r in &self.reporters {
            r.capture_routing_response(endpoint, status, duration);
        }
    }

    fn capture_route_service_response(&self, status: StatusCode) {
        for r in &self.reporters {
            r.capture_route_service_response(status);
        }
    }

    fn capture_websocket_request(&self) {
        for r in &self.reporters {
            r.capture_websocket_request();
        }
    }

    fn capture_tcp_request(&self) {
        for r in &self.reporters {
            r.capture_tcp_request();
        }
    }

    fn capture_lookup_time(&self, duration: Duration) {
        for r in &self.reporters {
            r.capture_lookup_time(duration);
        }
    }

    fn capture_route_stats(&self, total_routes: usize, ms_since_last_update: u64) {
        for r in &self.reporters {
            r.capture_route_stats(total_routes, ms_since_last_update);
        }
    }

    fn capture_registry_message(&self, component: &str) {
        for r in &self.reporters {
            r.capture_registry_message(component);
        }
    }

    fn capture_unregistry_message(&self, component: &str) {
        for r in &self.reporters {
            r.capture_unregistry_message(component);
        }
    }
}
