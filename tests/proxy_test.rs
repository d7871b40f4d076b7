//! End-to-end tests against a running router and raw TCP mock backends.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use edge_router::access_log::TracingAccessLogger;
use edge_router::config::RouterConfig;
use edge_router::health::Readiness;
use edge_router::metrics::{CompositeReporter, ProxyReporter, ProxyStats};
use edge_router::proxy::{self, BackendTransport, ProxyState};
use edge_router::registry::RouteRegistry;
use edge_router::route::{Endpoint, ModificationTag};
use edge_router::route_service::{PlainSigner, RouteServiceConfig};

mod common;

struct TestRouter {
    addr: SocketAddr,
    registry: Arc<RouteRegistry>,
    stats: Arc<ProxyStats>,
    readiness: Arc<Readiness>,
}

impl TestRouter {
    fn register(&self, uri: &str, instance_id: &str, backend: SocketAddr) {
        self.registry.register(
            uri,
            Endpoint::new(
                "app-under-test",
                backend.ip().to_string(),
                backend.port(),
                instance_id,
                "0",
                HashMap::new(),
                120,
                None,
                ModificationTag::default(),
            ),
        );
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

async fn start_router(config: RouterConfig) -> TestRouter {
    let config = Arc::new(config);
    let stats = Arc::new(ProxyStats::default());
    let sinks: Vec<Arc<dyn ProxyReporter>> = vec![stats.clone()];
    let reporter: Arc<dyn ProxyReporter> = Arc::new(CompositeReporter::new(sinks));
    let registry = Arc::new(RouteRegistry::new(Duration::from_secs(30), reporter.clone()));
    let readiness = Arc::new(Readiness::new(true));
    let transport = Arc::new(BackendTransport::new(&config.transport, Some(Duration::from_secs(5))));
    let route_services = Arc::new(RouteServiceConfig::new(
        Arc::new(PlainSigner),
        Duration::from_secs(60),
    ));

    let state = ProxyState::new(
        config,
        registry.clone(),
        reporter,
        Arc::new(TracingAccessLogger),
        readiness.clone(),
        route_services,
        transport,
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = proxy::router(state).into_make_service_with_connect_info::<SocketAddr>();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    TestRouter { addr, registry, stats, readiness }
}

fn client() -> reqwest::Client {
    reqwest::Client::builder().build().unwrap()
}

#[tokio::test]
async fn routes_by_host_header() {
    let backend = common::start_mock_backend("hello from backend").await;
    let router = start_router(RouterConfig::default()).await;
    router.register("myapp.test", "instance-1", backend);

    let response = client()
        .get(router.url("/"))
        .header("host", "myapp.test")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "hello from backend");
}

#[tokio::test]
async fn unknown_route_is_a_counted_404() {
    let router = start_router(RouterConfig::default()).await;

    let response = client()
        .get(router.url("/"))
        .header("host", "nobody.home")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
    assert_eq!(router.stats.snapshot().bad_requests, 1);
}

#[tokio::test]
async fn health_check_follows_readiness() {
    let router = start_router(RouterConfig::default()).await;

    let response = client()
        .get(router.url("/"))
        .header("host", "anything.test")
        .header("user-agent", "HTTP-Monitor/1.1")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "ok\n");

    router.readiness.set_ready(false);
    let response = client()
        .get(router.url("/"))
        .header("host", "anything.test")
        .header("user-agent", "HTTP-Monitor/1.1")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 503);
}

#[tokio::test]
async fn dead_backend_fails_over_within_the_retry_budget() {
    let dead = common::dead_backend_addr().await;
    let live = common::start_mock_backend("still here").await;
    let router = start_router(RouterConfig::default()).await;
    router.register("failover.test", "dead-instance", dead);
    router.register("failover.test", "live-instance", live);

    // Round-robin alternates the first pick; every request must still land
    // on the live instance through retries.
    for _ in 0..4 {
        let response = client()
            .get(router.url("/"))
            .header("host", "failover.test")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await.unwrap(), "still here");
    }
}

#[tokio::test]
async fn exhausted_pool_answers_502() {
    let dead = common::dead_backend_addr().await;
    let router = start_router(RouterConfig::default()).await;
    router.register("down.test", "dead-instance", dead);

    let response = client()
        .get(router.url("/"))
        .header("host", "down.test")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 502);
    assert_eq!(router.stats.snapshot().bad_gateways, 1);
}

#[tokio::test]
async fn sticky_cookie_carries_the_chosen_instance() {
    let backend = common::start_raw_backend(|| {
        let body = "session started";
        format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nSet-Cookie: JSESSIONID=abc123; Path=/\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        )
    })
    .await;
    let router = start_router(RouterConfig::default()).await;
    router.register("sticky.test", "instance-42", backend);

    let response = client()
        .get(router.url("/"))
        .header("host", "sticky.test")
        .send()
        .await
        .unwrap();

    let cookies: Vec<String> = response
        .headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_string)
        .collect();
    assert!(cookies.iter().any(|c| c == "JSESSIONID=abc123; Path=/"));
    assert!(cookies
        .iter()
        .any(|c| c.starts_with("__VCAP_ID__=instance-42; Path=/; HttpOnly")));
}

#[tokio::test]
async fn director_rewrites_forwarded_headers() {
    let (backend, seen) = common::start_capturing_backend(|| {
        "HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n".to_string()
    })
    .await;
    let router = start_router(RouterConfig::default()).await;
    router.register("headers.test", "instance-1", backend);

    let response = client()
        .get(router.url("/api/v1?q=1"))
        .header("host", "headers.test")
        .header("x-cf-app-instance", "app:3")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);

    let seen = seen.lock().unwrap();
    let head = seen[0].to_lowercase();
    assert!(head.starts_with("get /api/v1?q=1 http/1.1"));
    assert!(head.contains("x-forwarded-proto: http"));
    assert!(head.contains("x-vcap-request-id:"));
    assert!(head.contains("x-request-start:"));
    assert!(!head.contains("x-cf-app-instance"));
}

#[tokio::test]
async fn requests_count_toward_stats() {
    let backend = common::start_mock_backend("ok").await;
    let router = start_router(RouterConfig::default()).await;
    router.register("stats.test", "instance-1", backend);

    for _ in 0..3 {
        let response = client()
            .get(router.url("/"))
            .header("host", "stats.test")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    let snapshot = router.stats.snapshot();
    assert_eq!(snapshot.total_requests, 3);
    assert_eq!(snapshot.responses_2xx, 3);
}
