//! Reverse proxy driver for plain HTTP requests.
//!
//! Rewrites the outgoing request (director), decides between backend and
//! route-service forwarding, drives the retrying round-tripper, and relays
//! the response body to the client as it streams in. hyper's write path
//! flushes eagerly whenever the connection goes idle, which preserves
//! server-sent-event and streaming semantics without an explicit flush
//! timer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::http::header::HOST;
use axum::http::request::Parts;
use axum::http::{HeaderValue, Request, Response, StatusCode, Uri};
use http_body_util::BodyExt;

use crate::access_log::SharedRecord;
use crate::proxy::round_tripper::{AfterRoundTrip, ProxyRoundTripper, RoundTripMode};
use crate::proxy::sticky;
use crate::proxy::{plain_response, ProxyState};
use crate::route::{Endpoint, EndpointIterator, ModificationTag, Pool};
use crate::route_service::{
    ROUTE_SERVICE_FORWARDED_URL, ROUTE_SERVICE_METADATA, ROUTE_SERVICE_SIGNATURE,
};
use crate::proxy::{
    X_CF_APP_INSTANCE, X_FORWARDED_PROTO, X_REQUEST_START, X_VCAP_BACKEND, X_VCAP_ROUTER,
    X_VCAP_TRACE,
};

/// Terminal stage: forward the request and relay the response.
pub async fn serve(
    state: ProxyState,
    req: Request<Body>,
    iterator: Box<dyn EndpointIterator>,
    record: SharedRecord,
    pool: Arc<Pool>,
    sticky_id: Option<String>,
) -> Response<Body> {
    let inner = &state.inner;
    let (mut parts, body) = req.into_parts();

    // Buffer the inbound body so retry attempts can replay it. Responses
    // are not buffered; they stream straight through.
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            tracing::warn!(error = %err, "failed to read request body");
            return plain_response(StatusCode::BAD_REQUEST, "Bad Request");
        }
    };
    record.lock().unwrap().bytes_received = body.len() as u64;

    let inbound_trace = parts
        .headers
        .get(X_VCAP_TRACE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    director(&mut parts, inner.config.force_forwarded_proto_https);

    let mode = match route_service_mode(&state, &pool, &mut parts, &record) {
        Ok(mode) => mode,
        Err(response) => return response,
    };
    let to_route_service = matches!(mode, RoundTripMode::RouteService { .. });

    let started = Instant::now();
    let reporter = inner.reporter.clone();
    let after: AfterRoundTrip = Box::new(move |response, endpoint, _error| {
        if let Some(response) = response {
            reporter.capture_routing_response(endpoint, response.status(), started.elapsed());
            if to_route_service {
                reporter.capture_route_service_response(response.status());
            }
        }
    });

    let mut round_tripper =
        ProxyRoundTripper::new(mode, inner.transport.clone(), iterator, Some(after));

    match round_tripper.round_trip(parts, body).await {
        Ok(mut response) => {
            let chosen = record.lock().unwrap().route_endpoint.clone();
            if let Some(endpoint) = chosen {
                sticky::apply(
                    &mut response,
                    sticky_id.as_deref(),
                    &endpoint,
                    inner.config.secure_cookies,
                );
                apply_trace_headers(&state, inbound_trace.as_deref(), &endpoint, &mut response);
            }
            response
        }
        Err(err) => {
            inner.reporter.capture_bad_gateway();
            tracing::error!(error = %err, "request forwarding failed");
            plain_response(StatusCode::BAD_GATEWAY, "Bad Gateway")
        }
    }
}

/// Rewrite the outgoing request before transport.
///
/// The target authority is set per attempt by the round-tripper; everything
/// endpoint-independent happens here.
pub fn director(parts: &mut Parts, force_forwarded_proto_https: bool) {
    if force_forwarded_proto_https {
        parts
            .headers
            .insert(X_FORWARDED_PROTO, HeaderValue::from_static("https"));
    } else if !parts.headers.contains_key(X_FORWARDED_PROTO) {
        // TLS termination happens in front of this core; what reaches the
        // director is plaintext unless the terminator said otherwise.
        parts
            .headers
            .insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));
    }

    if !parts.headers.contains_key(X_REQUEST_START) {
        let epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        if let Ok(value) = HeaderValue::from_str(&epoch_ms.to_string()) {
            parts.headers.insert(X_REQUEST_START, value);
        }
    }

    parts.headers.remove(X_CF_APP_INSTANCE);
}

/// Decide whether this request goes to the application or to its route
/// service, preparing the forwarded headers in the latter case.
fn route_service_mode(
    state: &ProxyState,
    pool: &Arc<Pool>,
    parts: &mut Parts,
    record: &SharedRecord,
) -> Result<RoundTripMode, Response<Body>> {
    let Some(rs_url) = pool.route_service_url() else {
        return Ok(RoundTripMode::Backend);
    };

    let signature = parts
        .headers
        .get(ROUTE_SERVICE_SIGNATURE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if let Some(signature) = signature {
        // The route service called back in; validate and forward to the
        // application.
        let metadata = parts
            .headers
            .get(ROUTE_SERVICE_METADATA)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        return match state.inner.route_services.validate(&signature, metadata) {
            Ok(_) => Ok(RoundTripMode::Backend),
            Err(err) => {
                tracing::warn!(error = %err, "route service signature rejected");
                state.inner.reporter.capture_bad_request();
                Err(plain_response(StatusCode::BAD_REQUEST, "Bad Request"))
            }
        };
    }

    let forwarded_url = original_url(parts);
    let rs = match state.inner.route_services.request(&rs_url, &forwarded_url) {
        Ok(rs) => rs,
        Err(err) => {
            tracing::error!(error = %err, route_service = %rs_url, "cannot build route service request");
            return Err(plain_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Server Error",
            ));
        }
    };

    for (name, value) in [
        (ROUTE_SERVICE_FORWARDED_URL, rs.forwarded_url.as_str()),
        (ROUTE_SERVICE_SIGNATURE, rs.signature.as_str()),
        (ROUTE_SERVICE_METADATA, rs.metadata.as_str()),
    ] {
        match HeaderValue::from_str(value) {
            Ok(value) => {
                parts.headers.insert(name, value);
            }
            Err(_) => {
                return Err(plain_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error",
                ));
            }
        }
    }
    if let Some(authority) = rs.uri.authority() {
        if let Ok(host) = HeaderValue::from_str(authority.as_str()) {
            parts.headers.insert(HOST, host);
        }
    }

    let endpoint = Arc::new(route_service_endpoint(&rs.uri, &rs_url));
    record.lock().unwrap().route_endpoint = Some(Arc::clone(&endpoint));

    Ok(RoundTripMode::RouteService { endpoint, uri: rs.uri })
}

/// The application's original absolute URL, as carried to the route
/// service.
fn original_url(parts: &Parts) -> String {
    let scheme = parts
        .headers
        .get(X_FORWARDED_PROTO)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    let host = parts
        .headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| parts.uri.authority().map(|a| a.as_str()))
        .unwrap_or("");
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    format!("{scheme}://{host}{path_and_query}")
}

fn route_service_endpoint(uri: &Uri, rs_url: &str) -> Endpoint {
    let host = uri.host().unwrap_or("").to_string();
    let port = uri
        .port_u16()
        .unwrap_or(if uri.scheme_str() == Some("http") { 80 } else { 443 });
    Endpoint::new(
        "",
        host,
        port,
        "",
        "",
        HashMap::new(),
        0,
        Some(rs_url.to_string()),
        ModificationTag::default(),
    )
}

fn apply_trace_headers(
    state: &ProxyState,
    inbound_trace: Option<&str>,
    endpoint: &Endpoint,
    response: &mut Response<Body>,
) {
    let trace_key = &state.inner.config.trace_key;
    if trace_key.is_empty() || inbound_trace != Some(trace_key.as_str()) {
        return;
    }
    if let Ok(value) = HeaderValue::from_str(&state.inner.config.ip) {
        response.headers_mut().insert(X_VCAP_ROUTER, value);
    }
    if let Ok(value) = HeaderValue::from_str(&endpoint.address()) {
        response.headers_mut().insert(X_VCAP_BACKEND, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts_for(uri: &str, headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().method("GET").uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let (parts, _) = builder.body(Body::empty()).unwrap().into_parts();
        parts
    }

    #[test]
    fn director_defaults_forwarded_proto_to_http() {
        let mut parts = parts_for("http://myapp.com/", &[]);
        director(&mut parts, false);
        assert_eq!(parts.headers.get(X_FORWARDED_PROTO).unwrap(), "http");
    }

    #[test]
    fn director_keeps_inbound_forwarded_proto() {
        let mut parts = parts_for("http://myapp.com/", &[(X_FORWARDED_PROTO, "https")]);
        director(&mut parts, false);
        assert_eq!(parts.headers.get(X_FORWARDED_PROTO).unwrap(), "https");
    }

    #[test]
    fn director_forces_https_when_configured() {
        let mut parts = parts_for("http://myapp.com/", &[(X_FORWARDED_PROTO, "http")]);
        director(&mut parts, true);
        assert_eq!(parts.headers.get(X_FORWARDED_PROTO).unwrap(), "https");
    }

    #[test]
    fn director_stamps_request_start_once() {
        let mut parts = parts_for("http://myapp.com/", &[(X_REQUEST_START, "12345")]);
        director(&mut parts, false);
        assert_eq!(parts.headers.get(X_REQUEST_START).unwrap(), "12345");

        let mut parts = parts_for("http://myapp.com/", &[]);
        director(&mut parts, false);
        let stamped: u128 = parts
            .headers
            .get(X_REQUEST_START)
            .unwrap()
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        // Epoch milliseconds, not seconds or micros.
        assert!(stamped > 1_500_000_000_000);
        assert!(stamped < 100_000_000_000_000);
    }

    #[test]
    fn director_strips_app_instance_header() {
        let mut parts = parts_for("http://myapp.com/", &[(X_CF_APP_INSTANCE, "app:2")]);
        director(&mut parts, false);
        assert!(parts.headers.get(X_CF_APP_INSTANCE).is_none());
    }

    #[test]
    fn original_url_preserves_path_and_query() {
        let mut parts = parts_for(
            "http://myapp.com/some%20path?q=1",
            &[("host", "myapp.com")],
        );
        director(&mut parts, false);
        assert_eq!(original_url(&parts), "http://myapp.com/some%20path?q=1");
    }
}
