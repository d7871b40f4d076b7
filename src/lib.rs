//! Multi-tenant HTTP reverse proxy library.
//!
//! Receives client requests, resolves the target application from a
//! dynamic route registry, selects one backend instance from the route's
//! pool, and forwards the request with retries and sticky-session support.
//! WebSocket and raw TCP upgrades are tunneled; route-service-protected
//! routes make a signed detour through an external HTTPS middlebox first.

pub mod access_log;
pub mod admin;
pub mod config;
pub mod health;
pub mod metrics;
pub mod proxy;
pub mod registry;
pub mod route;
pub mod route_service;

pub use config::RouterConfig;
pub use proxy::{ProxyError, ProxyState};
pub use registry::{LookupRegistry, RouteRegistry};
