//! The request pipeline.
//!
//! # Data Flow
//! ```text
//! accepted request
//!     → access-log binder (record created, X-Vcap-Request-Id)
//!     → healthcheck (platform monitor short-circuit)
//!     → zipkin (B3 trace headers, when enabled)
//!     → protocol check (malformed Host → 400)
//!     → lookup (registry → pool attached to the request)
//!     → dispatch (upgrade branch / sticky session)
//!     → driver (director rewrite → retrying round-tripper → stream back)
//! ```
//!
//! Order is load-bearing: each stage either short-circuits with a response
//! or augments the request context and continues. Whatever response comes
//! back, its body is wrapped so status and byte counts land in the access
//! log record, which ships when the body completes. Panics anywhere in the
//! chain are recovered at the boundary and answered with a 500 plus a
//! dedicated counter.

pub mod driver;
pub mod error;
pub mod handler;
pub mod healthcheck;
pub mod lookup;
pub mod protocol;
pub mod round_tripper;
pub mod sticky;
pub mod tunnel;
pub mod zipkin;

use std::any::Any;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::header::HOST;
use axum::http::{HeaderValue, Request, Response, StatusCode};
use axum::routing::any;
use axum::Router;
use tower_http::catch_panic::{CatchPanicLayer, ResponseForPanic};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::access_log::{AccessLogRecord, AccessLogger, CountingBody, SharedRecord};
use crate::config::RouterConfig;
use crate::health::Readiness;
use crate::metrics::ProxyReporter;
use crate::registry::LookupRegistry;
use crate::route_service::RouteServiceConfig;

pub use error::{ProxyError, TransportError};
pub use round_tripper::{BackendTransport, ProxyRoundTripper, RoundTripMode, Transport};

pub const X_VCAP_REQUEST_ID: &str = "x-vcap-request-id";
pub const X_REQUEST_START: &str = "x-request-start";
pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
pub const X_CF_APP_INSTANCE: &str = "x-cf-app-instance";
pub const X_VCAP_TRACE: &str = "x-vcap-trace";
pub const X_VCAP_ROUTER: &str = "x-vcap-router";
pub const X_VCAP_BACKEND: &str = "x-vcap-backend";

/// Everything the pipeline stages share, cloned per request.
#[derive(Clone)]
pub struct ProxyState {
    pub(crate) inner: Arc<ProxyInner>,
}

pub struct ProxyInner {
    pub config: Arc<RouterConfig>,
    pub registry: Arc<dyn LookupRegistry>,
    pub reporter: Arc<dyn ProxyReporter>,
    pub access_logger: Arc<dyn AccessLogger>,
    pub readiness: Arc<Readiness>,
    pub route_services: Arc<RouteServiceConfig>,
    pub transport: Arc<dyn Transport>,
}

impl ProxyState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<RouterConfig>,
        registry: Arc<dyn LookupRegistry>,
        reporter: Arc<dyn ProxyReporter>,
        access_logger: Arc<dyn AccessLogger>,
        readiness: Arc<Readiness>,
        route_services: Arc<RouteServiceConfig>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            inner: Arc::new(ProxyInner {
                config,
                registry,
                reporter,
                access_logger,
                readiness,
                route_services,
                transport,
            }),
        }
    }
}

/// Build the proxy router: one catch-all handler running the chain, with
/// panic recovery and request tracing layered outside it.
pub fn router(state: ProxyState) -> Router {
    let panic_responder = PanicResponder { reporter: state.inner.reporter.clone() };
    Router::new()
        .route("/", any(proxy_handler))
        .route("/{*path}", any(proxy_handler))
        .with_state(state)
        .layer(CatchPanicLayer::custom(panic_responder))
        .layer(TraceLayer::new_for_http())
}

async fn proxy_handler(
    State(state): State<ProxyState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    mut req: Request<Body>,
) -> Response<Body> {
    let record = bind_access_log(&state, &mut req, remote_addr);

    if let Some(response) = healthcheck::check(
        &state.inner.config.health_check_user_agent,
        &state.inner.readiness,
        &req,
    ) {
        return finish(&state, &record, response);
    }

    if state.inner.config.enable_zipkin {
        zipkin::ensure_headers(&mut req, &record);
    }

    let host = match protocol::host_without_port(&req) {
        Ok(host) => host,
        Err(()) => {
            state.inner.reporter.capture_bad_request();
            return finish(&state, &record, plain_response(StatusCode::BAD_REQUEST, "Bad Request"));
        }
    };

    let pool = match lookup::lookup(
        state.inner.registry.as_ref(),
        state.inner.reporter.as_ref(),
        &host,
        req.uri().path(),
    ) {
        Some(pool) => pool,
        None => {
            state.inner.reporter.capture_bad_request();
            tracing::debug!(host = %host, path = %req.uri().path(), "no route for request");
            return finish(&state, &record, plain_response(StatusCode::NOT_FOUND, "Not Found"));
        }
    };
    req.extensions_mut().insert(pool);

    let response = handler::dispatch(state.clone(), req).await;
    finish(&state, &record, response)
}

/// First stage: create the record, settle `X-Vcap-Request-Id`, capture the
/// configured extra headers, and attach the record to the request.
fn bind_access_log(
    state: &ProxyState,
    req: &mut Request<Body>,
    remote_addr: SocketAddr,
) -> SharedRecord {
    let request_id = match req.headers().get(X_VCAP_REQUEST_ID).and_then(|v| v.to_str().ok()) {
        Some(id) => id.to_string(),
        None => {
            let id = Uuid::new_v4().to_string();
            if let Ok(value) = HeaderValue::from_str(&id) {
                req.headers_mut().insert(X_VCAP_REQUEST_ID, value);
            }
            id
        }
    };

    let host = req
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| req.uri().authority().map(|a| a.as_str()))
        .unwrap_or("")
        .to_string();

    let mut record = AccessLogRecord::new(
        req.method().to_string(),
        req.uri().to_string(),
        host,
        Some(remote_addr),
        request_id,
    );

    for name in &state.inner.config.trace_headers_to_log {
        if let Some(value) = req.headers().get(name.as_str()).and_then(|v| v.to_str().ok()) {
            record.extra_headers.push((name.clone(), value.to_string()));
        }
    }

    let record: SharedRecord = Arc::new(Mutex::new(record));
    req.extensions_mut().insert(record.clone());
    record
}

/// Last touch on every response: stamp the status into the record and wrap
/// the body so bytes are counted and the record ships at stream end.
fn finish(state: &ProxyState, record: &SharedRecord, response: Response<Body>) -> Response<Body> {
    record.lock().unwrap().status = Some(response.status().as_u16());
    let record = record.clone();
    let logger = state.inner.access_logger.clone();
    response.map(move |body| Body::new(CountingBody::new(body, record, logger)))
}

/// Terse one-line error response; details stay in the logs.
pub(crate) fn plain_response(status: StatusCode, message: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(format!("{message}\n")));
    *response.status_mut() = status;
    response
}

/// Translates recovered handler panics into counted 500s.
#[derive(Clone)]
struct PanicResponder {
    reporter: Arc<dyn ProxyReporter>,
}

impl ResponseForPanic for PanicResponder {
    type ResponseBody = Body;

    fn response_for_panic(&mut self, err: Box<dyn Any + Send + 'static>) -> Response<Body> {
        self.reporter.capture_panic();
        let detail = err
            .downcast_ref::<String>()
            .map(String::as_str)
            .or_else(|| err.downcast_ref::<&str>().copied())
            .unwrap_or("unknown panic");
        tracing::error!(panic = %detail, "handler panicked");
        plain_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
    }
}
