//! Multi-tenant HTTP reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────┐
//!                     │                 EDGE ROUTER                   │
//!                     │                                               │
//!   Client Request    │  ┌──────────┐   ┌─────────┐   ┌───────────┐  │
//!   ──────────────────┼─▶│ handler  │──▶│ route   │──▶│ endpoint  │  │
//!                     │  │ chain    │   │ registry│   │ iterator  │  │
//!                     │  └──────────┘   └─────────┘   └─────┬─────┘  │
//!                     │                                      │        │
//!                     │                                      ▼        │
//!   Client Response   │  ┌──────────┐   ┌──────────────────────────┐ │
//!   ◀─────────────────┼──│ stream / │◀──│ retrying round-tripper   │◀┼── Backend
//!                     │  │ tunnel   │   │ (or route service detour)│ │    Instances
//!                     │  └──────────┘   └──────────────────────────┘ │
//!                     │                                               │
//!                     │  config · access log · metrics · admin        │
//!                     └──────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use edge_router::access_log::TracingAccessLogger;
use edge_router::admin::{self, AdminState};
use edge_router::config::{load_config, RouterConfig};
use edge_router::health::Readiness;
use edge_router::metrics::{exporter, CompositeReporter, MetricsReporter, ProxyReporter, ProxyStats};
use edge_router::proxy::{self, BackendTransport, ProxyState};
use edge_router::registry::RouteRegistry;
use edge_router::route::{Endpoint, ModificationTag};
use edge_router::route_service::{PlainSigner, RouteServiceConfig};

#[derive(Parser, Debug)]
#[command(name = "edge-router", about = "Multi-tenant HTTP reverse proxy")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => RouterConfig::default(),
    };
    let config = Arc::new(config);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(format!(
                    "edge_router={},tower_http=warn",
                    config.observability.log_level
                ))
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        exporter::init_metrics(addr);
    }

    let stats = Arc::new(ProxyStats::default());
    let sinks: Vec<Arc<dyn ProxyReporter>> = vec![Arc::new(MetricsReporter::new()), stats.clone()];
    let reporter: Arc<dyn ProxyReporter> = Arc::new(CompositeReporter::new(sinks));

    let registry = Arc::new(RouteRegistry::new(
        Duration::from_secs(config.retry_after_failure_secs),
        reporter.clone(),
    ));
    seed_static_routes(&config, &registry);

    let readiness = Arc::new(Readiness::new(true));

    let endpoint_timeout = match config.endpoint_timeout_secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };
    let transport = Arc::new(BackendTransport::new(&config.transport, endpoint_timeout));

    let route_services = Arc::new(RouteServiceConfig::new(
        Arc::new(PlainSigner),
        Duration::from_secs(config.route_services.signature_lifetime_secs),
    ));

    let state = ProxyState::new(
        config.clone(),
        registry.clone(),
        reporter.clone(),
        Arc::new(TracingAccessLogger),
        readiness.clone(),
        route_services,
        transport,
    );

    spawn_route_stats_task(
        reporter.clone(),
        registry.clone(),
        Duration::from_secs(config.route_stats_interval_secs.max(1)),
    );

    if config.admin.enabled {
        let admin_addr: SocketAddr = config.admin.bind_address.parse()?;
        let admin_router = admin::router(AdminState {
            stats,
            registry: registry.clone(),
            readiness: readiness.clone(),
        });
        tokio::spawn(async move {
            match TcpListener::bind(admin_addr).await {
                Ok(listener) => {
                    tracing::info!(address = %admin_addr, "admin endpoints listening");
                    if let Err(err) = axum::serve(listener, admin_router).await {
                        tracing::error!(error = %err, "admin server stopped");
                    }
                }
                Err(err) => tracing::error!(error = %err, "cannot bind admin address"),
            }
        });
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(
        address = %listener.local_addr()?,
        routes = registry.count(),
        "edge router starting"
    );

    let app = proxy::router(state).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(readiness))
        .await?;

    tracing::info!("edge router stopped");
    Ok(())
}

/// Register configured routes ahead of any control plane traffic.
fn seed_static_routes(config: &RouterConfig, registry: &RouteRegistry) {
    for route in &config.static_routes {
        for backend in &route.backends {
            let Ok(addr) = backend.parse::<SocketAddr>() else {
                tracing::warn!(backend = %backend, "skipping unparseable backend address");
                continue;
            };
            let endpoint = Endpoint::new(
                route.application_id.clone(),
                addr.ip().to_string(),
                addr.port(),
                Uuid::new_v4().to_string(),
                "0",
                HashMap::new(),
                120,
                route.route_service_url.clone(),
                ModificationTag::default(),
            );
            registry.register(&route.uri, endpoint);
        }
    }
}

/// Periodically publish registry size and staleness.
fn spawn_route_stats_task(
    reporter: Arc<dyn ProxyReporter>,
    registry: Arc<RouteRegistry>,
    interval: Duration,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ms = registry.ms_since_last_update().unwrap_or(0);
            reporter.capture_route_stats(registry.count(), ms);
        }
    });
}

/// Wait for ctrl-c, then flip readiness so health checks drain traffic.
async fn shutdown_signal(readiness: Arc<Readiness>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install ctrl-c handler");
        return;
    }
    readiness.set_ready(false);
    tracing::info!("shutdown signal received");
}
