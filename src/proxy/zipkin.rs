//! Zipkin B3 trace headers.

use axum::body::Body;
use axum::http::{HeaderValue, Request};
use rand::Rng;

use crate::access_log::SharedRecord;

pub const B3_TRACE_ID: &str = "x-b3-traceid";
pub const B3_SPAN_ID: &str = "x-b3-spanid";

/// Ensure B3 identifiers exist on the request and register them with the
/// access log record. Inbound identifiers are kept.
pub fn ensure_headers(req: &mut Request<Body>, record: &SharedRecord) {
    for name in [B3_TRACE_ID, B3_SPAN_ID] {
        if !req.headers().contains_key(name) {
            let id = format!("{:016x}", rand::thread_rng().gen::<u64>());
            if let Ok(value) = HeaderValue::from_str(&id) {
                req.headers_mut().insert(name, value);
            }
        }
        if let Some(value) = req.headers().get(name).and_then(|v| v.to_str().ok()) {
            record
                .lock()
                .unwrap()
                .extra_headers
                .push((name.to_string(), value.to_string()));
        }
    }
}
