//! Inbound protocol checks.

use axum::body::Body;
use axum::http::header::HOST;
use axum::http::uri::Authority;
use axum::http::Request;
use std::str::FromStr;

/// The request's host with any port stripped.
///
/// Rejects empty or malformed `Host` values; the caller answers 400.
pub fn host_without_port(req: &Request<Body>) -> Result<String, ()> {
    let raw = req
        .uri()
        .authority()
        .map(|a| a.as_str())
        .or_else(|| req.headers().get(HOST).and_then(|v| v.to_str().ok()))
        .unwrap_or("");

    if raw.is_empty() {
        return Err(());
    }

    let authority = Authority::from_str(raw).map_err(|_| ())?;
    if authority.host().is_empty() {
        return Err(());
    }
    Ok(authority.host().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with_host(host: &str) -> Request<Body> {
        Request::builder()
            .uri("/some/path")
            .header(HOST, host)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn strips_port() {
        assert_eq!(
            host_without_port(&request_with_host("myapp.example.com:8443")),
            Ok("myapp.example.com".to_string())
        );
    }

    #[test]
    fn plain_host_passes_through() {
        assert_eq!(
            host_without_port(&request_with_host("myapp.example.com")),
            Ok("myapp.example.com".to_string())
        );
    }

    #[test]
    fn rejects_missing_host() {
        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        assert!(host_without_port(&req).is_err());
    }

    #[test]
    fn rejects_malformed_host() {
        assert!(host_without_port(&request_with_host("bad host with spaces")).is_err());
    }
}
