//! Per-request dispatch: upgrade branch or plain HTTP forwarding.

use std::sync::Arc;

use axum::body::Body;
use axum::http::header::{CONNECTION, UPGRADE};
use axum::http::{HeaderMap, Request, Response, StatusCode};

use crate::access_log::SharedRecord;
use crate::metrics::ProxyReporter;
use crate::proxy::{driver, plain_response, sticky, tunnel, ProxyState};
use crate::route::{Endpoint, EndpointIterator, Pool};

/// Upgrade flavors the proxy tunnels instead of proxying as HTTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeType {
    Tcp,
    WebSocket,
}

/// Detect a protocol upgrade request.
///
/// The `Connection` header must name `upgrade` (case-insensitive; possibly
/// comma-separated or repeated). `tcp` is matched exactly, `websocket`
/// case-insensitively.
pub fn upgrade_type(headers: &HeaderMap) -> Option<UpgradeType> {
    let connection_upgrades = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.to_ascii_lowercase().contains("upgrade"));
    if !connection_upgrades {
        return None;
    }

    let upgrade = headers.get(UPGRADE)?.to_str().ok()?;
    if upgrade == "tcp" {
        Some(UpgradeType::Tcp)
    } else if upgrade.eq_ignore_ascii_case("websocket") {
        Some(UpgradeType::WebSocket)
    } else {
        None
    }
}

/// Iterator wrapper that records every selected endpoint.
///
/// Each successful `next` stamps the endpoint on the access log record and
/// reports the routing request before handing the endpoint out, so the
/// logged endpoint always matches the one an attempt was made against.
pub struct ReportingIterator {
    nested: Box<dyn EndpointIterator>,
    record: SharedRecord,
    reporter: Arc<dyn ProxyReporter>,
}

impl ReportingIterator {
    pub fn new(
        nested: Box<dyn EndpointIterator>,
        record: SharedRecord,
        reporter: Arc<dyn ProxyReporter>,
    ) -> Self {
        Self { nested, record, reporter }
    }
}

impl EndpointIterator for ReportingIterator {
    fn next(&mut self) -> Option<Arc<Endpoint>> {
        let endpoint = self.nested.next();
        if let Some(endpoint) = &endpoint {
            self.record.lock().unwrap().route_endpoint = Some(Arc::clone(endpoint));
            self.reporter.capture_routing_request(endpoint);
        }
        endpoint
    }

    fn endpoint_failed(&mut self) {
        self.nested.endpoint_failed();
    }

    fn pre_request(&self, endpoint: &Endpoint) {
        self.nested.pre_request(endpoint);
    }

    fn post_request(&self, endpoint: &Endpoint) {
        self.nested.post_request(endpoint);
    }
}

/// The dispatch stage: reads the pool and record from the request context,
/// builds the reporting iterator, and branches on the upgrade headers.
pub async fn dispatch(state: ProxyState, req: Request<Body>) -> Response<Body> {
    let Some(record) = req.extensions().get::<SharedRecord>().cloned() else {
        tracing::error!("access log record not set on request context");
        return plain_response(StatusCode::INTERNAL_SERVER_ERROR, "access log record not set");
    };
    let Some(pool) = req.extensions().get::<Arc<Pool>>().cloned() else {
        tracing::error!("route pool not set on request context");
        return plain_response(StatusCode::INTERNAL_SERVER_ERROR, "route pool not set");
    };

    let sticky_id = sticky::sticky_instance_id(req.headers());
    let nested = pool.endpoints(state.inner.config.load_balance, sticky_id.as_deref());
    let iterator = Box::new(ReportingIterator::new(
        Box::new(nested),
        record.clone(),
        state.inner.reporter.clone(),
    ));

    match upgrade_type(req.headers()) {
        Some(UpgradeType::Tcp) => {
            state.inner.reporter.capture_tcp_request();
            tunnel::tcp(state, req, iterator).await
        }
        Some(UpgradeType::WebSocket) => {
            state.inner.reporter.capture_websocket_request();
            tunnel::websocket(state, req, iterator).await
        }
        None => driver::serve(state, req, iterator, record, pool, sticky_id).await,
    }
}
