//! Retrying transport in front of the backend client.
//!
//! # Data Flow
//! ```text
//! driver → ProxyRoundTripper::round_trip(parts, buffered body)
//!     → attempt loop (max 3):
//!         backend mode:       iterator.next() → rewrite target URI
//!         route-service mode: fixed target, iterator untouched
//!         → Transport::round_trip
//!         → retriable error? mark endpoint failed, try again
//!     → AfterRoundTrip callback with the final outcome
//! ```
//!
//! # Design Decisions
//! - Requests are repeatable because the inbound body was buffered by the
//!   driver; each attempt clones the parts and bytes
//! - Retry triggers only on connect failures and connection resets; a
//!   returned response (any status) or other error ends the loop
//! - In route-service mode the single target is retried in place and no
//!   failure feedback is recorded

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::request::Parts;
use axum::http::{Request, Response, Uri};
use bytes::Bytes;
use futures_util::future::BoxFuture;
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::config::TransportConfig;
use crate::proxy::error::{ProxyError, TransportError};
use crate::route::{Endpoint, EndpointIterator};

/// Attempts per request, counting the first one.
pub const MAX_ATTEMPTS: usize = 3;

/// Backend dial budget, separate from the endpoint I/O timeout.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// The underlying client the round-tripper retries over.
pub trait Transport: Send + Sync {
    fn round_trip(&self, req: Request<Body>) -> BoxFuture<'_, Result<Response<Body>, TransportError>>;

    /// Propagate a client-side cancellation for the given request.
    fn cancel_request(&self, parts: &Parts);
}

/// Invoked once with the final outcome of the retry loop.
pub type AfterRoundTrip =
    Box<dyn Fn(Option<&Response<Body>>, &Endpoint, Option<&ProxyError>) + Send + Sync>;

/// Where one round trip is headed.
pub enum RoundTripMode {
    /// Iterate pool endpoints, rewriting the target per attempt.
    Backend,
    /// The target is already fixed to an external route service.
    RouteService { endpoint: Arc<Endpoint>, uri: Uri },
}

/// Transport-layer retry loop with endpoint failure feedback.
pub struct ProxyRoundTripper {
    mode: RoundTripMode,
    transport: Arc<dyn Transport>,
    iterator: Box<dyn EndpointIterator>,
    after: Option<AfterRoundTrip>,
}

impl ProxyRoundTripper {
    pub fn new(
        mode: RoundTripMode,
        transport: Arc<dyn Transport>,
        iterator: Box<dyn EndpointIterator>,
        after: Option<AfterRoundTrip>,
    ) -> Self {
        Self { mode, transport, iterator, after }
    }

    pub async fn round_trip(
        &mut self,
        parts: Parts,
        body: Bytes,
    ) -> Result<Response<Body>, ProxyError> {
        let mut last_failure: Option<(Arc<Endpoint>, TransportError)> = None;

        for _attempt in 0..MAX_ATTEMPTS {
            let serving_backend = matches!(self.mode, RoundTripMode::Backend);

            let (endpoint, target) = match &self.mode {
                RoundTripMode::Backend => {
                    let endpoint = match self.iterator.next() {
                        Some(endpoint) => endpoint,
                        None => return self.finish(Err(ProxyError::NoEndpointsAvailable), None),
                    };
                    let target = backend_uri(&parts.uri, &endpoint)?;
                    (endpoint, target)
                }
                RoundTripMode::RouteService { endpoint, uri } => {
                    (Arc::clone(endpoint), uri.clone())
                }
            };

            if serving_backend {
                self.iterator.pre_request(&endpoint);
            }

            let mut attempt = parts.clone();
            attempt.uri = target;
            let request = Request::from_parts(attempt, Body::from(body.clone()));

            let result = self.transport.round_trip(request).await;

            if serving_backend {
                self.iterator.post_request(&endpoint);
            }

            match result {
                Ok(response) => return self.finish(Ok(response), Some(endpoint)),
                Err(err) if err.is_retriable() => {
                    tracing::warn!(
                        endpoint = %endpoint.address(),
                        error = %err,
                        "backend attempt failed, retrying"
                    );
                    if serving_backend {
                        self.iterator.endpoint_failed();
                    }
                    last_failure = Some((endpoint, err));
                }
                Err(err) => {
                    return self.finish(Err(ProxyError::Transport(err)), Some(endpoint));
                }
            }
        }

        match last_failure {
            Some((endpoint, err)) => self.finish(Err(ProxyError::Transport(err)), Some(endpoint)),
            // Unreachable with MAX_ATTEMPTS > 0; kept for totality.
            None => Err(ProxyError::NoEndpointsAvailable),
        }
    }

    /// Propagate cancellation to the underlying transport.
    pub fn cancel_request(&self, parts: &Parts) {
        self.transport.cancel_request(parts);
    }

    fn finish(
        &self,
        result: Result<Response<Body>, ProxyError>,
        endpoint: Option<Arc<Endpoint>>,
    ) -> Result<Response<Body>, ProxyError> {
        if let (Some(after), Some(endpoint)) = (&self.after, endpoint) {
            match &result {
                Ok(response) => after(Some(response), &endpoint, None),
                Err(err) => after(None, &endpoint, Some(err)),
            }
        }
        result
    }
}

fn backend_uri(original: &Uri, endpoint: &Endpoint) -> Result<Uri, ProxyError> {
    let path_and_query = original.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    Uri::builder()
        .scheme("http")
        .authority(endpoint.address())
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| ProxyError::Transport(TransportError::Other(Box::new(e))))
}

/// Production transport over the pooled hyper client.
///
/// Speaks plaintext HTTP to backends and HTTPS to route services; the
/// connector enforces the dial timeout, the wrapper enforces the endpoint
/// I/O budget.
pub struct BackendTransport {
    client: Client<hyper_rustls::HttpsConnector<HttpConnector>, Body>,
    endpoint_timeout: Option<Duration>,
}

impl BackendTransport {
    pub fn new(transport: &TransportConfig, endpoint_timeout: Option<Duration>) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(DIAL_TIMEOUT));
        connector.set_nodelay(true);
        connector.enforce_http(false);

        let connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(connector);

        let max_idle_per_host = if transport.disable_keep_alives {
            0
        } else if transport.max_idle_conns > 0 {
            transport.max_idle_conns_per_host.min(transport.max_idle_conns)
        } else {
            transport.max_idle_conns_per_host
        };

        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(max_idle_per_host)
            .build(connector);

        Self { client, endpoint_timeout }
    }
}

impl Transport for BackendTransport {
    fn round_trip(&self, req: Request<Body>) -> BoxFuture<'_, Result<Response<Body>, TransportError>> {
        let client = self.client.clone();
        let endpoint_timeout = self.endpoint_timeout;
        Box::pin(async move {
            let pending = client.request(req);
            let result = match endpoint_timeout {
                Some(budget) => tokio::time::timeout(budget, pending)
                    .await
                    .map_err(|_| TransportError::Timeout)?,
                None => pending.await,
            };
            match result {
                Ok(response) => Ok(response.map(Body::new)),
                Err(err) => Err(TransportError::from_client_error(err)),
            }
        })
    }

    fn cancel_request(&self, parts: &Parts) {
        // The in-flight request aborts when its future is dropped; there is
        // no separate teardown on the pooled client.
        tracing::debug!(uri = %parts.uri, "outbound request canceled");
    }
}
