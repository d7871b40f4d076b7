//! Sticky session cookies.
//!
//! Applications opt in by setting a `JSESSIONID` cookie; the proxy pairs it
//! with a `__VCAP_ID__` cookie carrying the chosen endpoint's private
//! instance id, so subsequent requests land on the same instance.

use axum::body::Body;
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue, Response};

use crate::route::Endpoint;

pub const VCAP_COOKIE_ID: &str = "__VCAP_ID__";
pub const STICKY_COOKIE_KEY: &str = "JSESSIONID";

/// The instance preferred by the client, read from request cookies.
///
/// Only honored when the application cookie is present too; a bare
/// `__VCAP_ID__` is ignored.
pub fn sticky_instance_id(headers: &HeaderMap) -> Option<String> {
    let mut jsession = false;
    let mut vcap_id = None;

    for header in headers.get_all(COOKIE) {
        let Ok(value) = header.to_str() else { continue };
        for pair in value.split(';') {
            let Some((name, value)) = pair.trim().split_once('=') else { continue };
            match name {
                STICKY_COOKIE_KEY => jsession = true,
                VCAP_COOKIE_ID => vcap_id = Some(value.to_string()),
                _ => {}
            }
        }
    }

    if jsession {
        vcap_id
    } else {
        None
    }
}

/// Attributes of the upstream `JSESSIONID` cookie we mirror.
#[derive(Debug, Default, PartialEq, Eq)]
struct UpstreamCookie {
    path: Option<String>,
    secure: bool,
    /// Upstream asked for immediate expiry (`Max-Age=0`).
    expired: bool,
}

fn upstream_sticky_cookie(headers: &HeaderMap) -> Option<UpstreamCookie> {
    for header in headers.get_all(SET_COOKIE) {
        let Ok(value) = header.to_str() else { continue };
        let mut segments = value.split(';');
        let Some((name, _)) = segments.next().and_then(|s| s.trim().split_once('=')) else {
            continue;
        };
        if name != STICKY_COOKIE_KEY {
            continue;
        }

        let mut cookie = UpstreamCookie::default();
        for attribute in segments {
            let attribute = attribute.trim();
            if attribute.eq_ignore_ascii_case("secure") {
                cookie.secure = true;
            } else if let Some((key, value)) = attribute.split_once('=') {
                if key.eq_ignore_ascii_case("path") {
                    cookie.path = Some(value.to_string());
                } else if key.eq_ignore_ascii_case("max-age") {
                    cookie.expired = value.trim().parse::<i64>().map(|v| v <= 0).unwrap_or(false);
                }
            }
        }
        return Some(cookie);
    }
    None
}

/// Write the `__VCAP_ID__` cookie when stickiness applies.
///
/// Applies when the upstream set `JSESSIONID`, or when the endpoint that
/// answered differs from the instance the client asked for.
pub fn apply(
    response: &mut Response<Body>,
    requested_instance_id: Option<&str>,
    endpoint: &Endpoint,
    secure_cookies: bool,
) {
    let upstream = upstream_sticky_cookie(response.headers());

    let endpoint_changed = requested_instance_id
        .map(|requested| requested != endpoint.private_instance_id)
        .unwrap_or(false);

    if upstream.is_none() && !endpoint_changed {
        return;
    }

    let upstream = upstream.unwrap_or_default();
    let mut cookie = format!(
        "{}={}; Path={}; HttpOnly",
        VCAP_COOKIE_ID,
        endpoint.private_instance_id,
        upstream.path.as_deref().unwrap_or("/"),
    );
    if upstream.expired {
        cookie.push_str("; Max-Age=0");
    }
    if upstream.secure || secure_cookies {
        cookie.push_str("; Secure");
    }

    if let Ok(value) = HeaderValue::from_str(&cookie) {
        response.headers_mut().append(SET_COOKIE, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::ModificationTag;
    use std::collections::HashMap;

    fn endpoint(id: &str) -> Endpoint {
        Endpoint::new(
            "app-1",
            "10.0.0.1",
            8080,
            id,
            "0",
            HashMap::new(),
            120,
            None,
            ModificationTag::default(),
        )
    }

    fn request_headers(cookie: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_str(cookie).unwrap());
        headers
    }

    fn response_with_set_cookie(value: Option<&str>) -> Response<Body> {
        let mut builder = Response::builder().status(200);
        if let Some(value) = value {
            builder = builder.header(SET_COOKIE, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn vcap_cookie(response: &Response<Body>) -> Option<String> {
        response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find(|v| v.starts_with(VCAP_COOKIE_ID))
            .map(str::to_string)
    }

    #[test]
    fn sticky_id_requires_both_cookies() {
        assert_eq!(
            sticky_instance_id(&request_headers("JSESSIONID=abc; __VCAP_ID__=instance-7")),
            Some("instance-7".to_string())
        );
        assert_eq!(sticky_instance_id(&request_headers("__VCAP_ID__=instance-7")), None);
        assert_eq!(sticky_instance_id(&request_headers("JSESSIONID=abc")), None);
    }

    #[test]
    fn sticky_id_found_across_repeated_cookie_headers() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("JSESSIONID=abc"));
        headers.append(COOKIE, HeaderValue::from_static("__VCAP_ID__=instance-7"));
        assert_eq!(sticky_instance_id(&headers), Some("instance-7".to_string()));
    }

    #[test]
    fn upstream_session_cookie_triggers_vcap_cookie() {
        let mut response = response_with_set_cookie(Some("JSESSIONID=abc; Path=/app"));
        apply(&mut response, None, &endpoint("instance-1"), false);

        assert_eq!(
            vcap_cookie(&response),
            Some("__VCAP_ID__=instance-1; Path=/app; HttpOnly".to_string())
        );
    }

    #[test]
    fn endpoint_change_triggers_vcap_cookie_without_upstream_cookie() {
        let mut response = response_with_set_cookie(None);
        apply(&mut response, Some("instance-old"), &endpoint("instance-new"), false);

        assert_eq!(
            vcap_cookie(&response),
            Some("__VCAP_ID__=instance-new; Path=/; HttpOnly".to_string())
        );
    }

    #[test]
    fn unchanged_endpoint_without_upstream_cookie_sets_nothing() {
        let mut response = response_with_set_cookie(None);
        apply(&mut response, Some("instance-1"), &endpoint("instance-1"), false);
        assert_eq!(vcap_cookie(&response), None);
    }

    #[test]
    fn secure_follows_upstream_or_config() {
        let mut response = response_with_set_cookie(Some("JSESSIONID=abc; Secure"));
        apply(&mut response, None, &endpoint("instance-1"), false);
        assert!(vcap_cookie(&response).unwrap().ends_with("; Secure"));

        let mut response = response_with_set_cookie(Some("JSESSIONID=abc"));
        apply(&mut response, None, &endpoint("instance-1"), true);
        assert!(vcap_cookie(&response).unwrap().ends_with("; Secure"));

        let mut response = response_with_set_cookie(Some("JSESSIONID=abc"));
        apply(&mut response, None, &endpoint("instance-1"), false);
        assert!(!vcap_cookie(&response).unwrap().contains("Secure"));
    }

    #[test]
    fn upstream_expiry_is_mirrored() {
        let mut response = response_with_set_cookie(Some("JSESSIONID=abc; Max-Age=0"));
        apply(&mut response, None, &endpoint("instance-1"), false);
        assert!(vcap_cookie(&response).unwrap().contains("Max-Age=0"));

        // A positive Max-Age stays a session cookie on our side.
        let mut response = response_with_set_cookie(Some("JSESSIONID=abc; Max-Age=3600"));
        apply(&mut response, None, &endpoint("instance-1"), false);
        assert!(!vcap_cookie(&response).unwrap().contains("Max-Age"));
    }
}
