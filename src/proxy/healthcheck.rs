//! Platform health checker short-circuit.

use axum::body::Body;
use axum::http::header::USER_AGENT;
use axum::http::{Request, Response, StatusCode};

use crate::health::Readiness;

/// Answer the platform health checker directly, identified by its
/// configured `User-Agent`. Returns `None` for ordinary traffic.
pub fn check(
    health_check_user_agent: &str,
    readiness: &Readiness,
    req: &Request<Body>,
) -> Option<Response<Body>> {
    let agent = req.headers().get(USER_AGENT).and_then(|v| v.to_str().ok())?;
    if agent != health_check_user_agent {
        return None;
    }

    let response = if readiness.is_ready() {
        Response::builder()
            .status(StatusCode::OK)
            .header("Cache-Control", "private, max-age=0")
            .header("Expires", "0")
            .body(Body::from("ok\n"))
    } else {
        Response::builder()
            .status(StatusCode::SERVICE_UNAVAILABLE)
            .body(Body::empty())
    };
    response.ok()
}
