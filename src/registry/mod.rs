//! URI-keyed route registry.
//!
//! # Data Flow
//! ```text
//! Control plane announcements
//!     → register / unregister (rare, serialized by a writer lock)
//!     → snapshot rebuilt and published with one atomic pointer swap
//!
//! Request path (hot):
//!     lookup(host, path)
//!     → load current snapshot (lock-free)
//!     → longest path-prefix match
//!     → Arc<Pool>
//! ```
//!
//! # Design Decisions
//! - Copy-on-write snapshots: readers never block on writers beyond the
//!   pointer load
//! - Pools are shared by reference; endpoint churn inside a pool does not
//!   republish the snapshot
//! - Route URIs are normalized (lowercased host, no trailing slash)

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;

use crate::metrics::reporter::ProxyReporter;
use crate::route::{Endpoint, Pool};

/// The lookup surface the request pipeline depends on.
pub trait LookupRegistry: Send + Sync {
    /// Find the pool for `(host-without-port, request path)`.
    fn lookup(&self, host: &str, path: &str) -> Option<Arc<Pool>>;
}

/// In-memory route table mapping `host[/path-prefix]` to endpoint pools.
pub struct RouteRegistry {
    snapshot: ArcSwap<HashMap<String, Arc<Pool>>>,
    routes: Mutex<HashMap<String, Arc<Pool>>>,
    /// Epoch milliseconds of the last mutation; 0 until first update.
    last_update_ms: AtomicU64,
    retry_after_failure: Duration,
    reporter: Arc<dyn ProxyReporter>,
}

impl RouteRegistry {
    pub fn new(retry_after_failure: Duration, reporter: Arc<dyn ProxyReporter>) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(HashMap::new()),
            routes: Mutex::new(HashMap::new()),
            last_update_ms: AtomicU64::new(0),
            retry_after_failure,
            reporter,
        }
    }

    /// Add or refresh an endpoint under the given route URI.
    pub fn register(&self, uri: &str, endpoint: Endpoint) {
        let key = normalize_uri(uri);
        let component = endpoint.component().unwrap_or("").to_string();

        let mut routes = self.routes.lock().unwrap();
        match routes.get(&key) {
            Some(pool) => {
                pool.put(endpoint);
            }
            None => {
                let pool = Arc::new(Pool::new(self.retry_after_failure));
                pool.put(endpoint);
                routes.insert(key.clone(), pool);
                self.publish(&routes);
            }
        }
        drop(routes);

        self.touch();
        self.reporter.capture_registry_message(&component);
        tracing::debug!(route = %key, "route registered");
    }

    /// Drop an endpoint from the given route URI, removing the pool when it
    /// empties.
    pub fn unregister(&self, uri: &str, endpoint: &Endpoint) {
        let key = normalize_uri(uri);

        let mut routes = self.routes.lock().unwrap();
        if let Some(pool) = routes.get(&key) {
            pool.remove(&endpoint.private_instance_id);
            if pool.is_empty() {
                routes.remove(&key);
                self.publish(&routes);
            }
        }
        drop(routes);

        self.touch();
        self.reporter
            .capture_unregistry_message(endpoint.component().unwrap_or(""));
        tracing::debug!(route = %key, "route unregistered");
    }

    /// Number of registered routes.
    pub fn count(&self) -> usize {
        self.snapshot.load().len()
    }

    /// Milliseconds since the last registry mutation, or `None` before the
    /// first update.
    pub fn ms_since_last_update(&self) -> Option<u64> {
        let last = self.last_update_ms.load(Ordering::Relaxed);
        if last == 0 {
            return None;
        }
        Some(epoch_ms().saturating_sub(last))
    }

    /// Route URIs with their endpoint addresses, for the admin surface.
    pub fn dump(&self) -> Vec<(String, Vec<String>)> {
        let snapshot = self.snapshot.load();
        let mut routes: Vec<_> = snapshot
            .iter()
            .map(|(uri, pool)| {
                let addresses = pool.snapshot().iter().map(|e| e.address()).collect();
                (uri.clone(), addresses)
            })
            .collect();
        routes.sort();
        routes
    }

    fn publish(&self, routes: &HashMap<String, Arc<Pool>>) {
        self.snapshot.store(Arc::new(routes.clone()));
    }

    fn touch(&self) {
        self.last_update_ms.store(epoch_ms(), Ordering::Relaxed);
    }
}

impl LookupRegistry for RouteRegistry {
    fn lookup(&self, host: &str, path: &str) -> Option<Arc<Pool>> {
        let snapshot = self.snapshot.load();
        let host = host.to_ascii_lowercase();
        let mut prefix = path.trim_end_matches('/');

        // Longest prefix wins: try host + full path, then shrink one path
        // segment at a time down to the bare host.
        loop {
            let key = format!("{}{}", host, prefix);
            if let Some(pool) = snapshot.get(&key) {
                return Some(Arc::clone(pool));
            }
            if prefix.is_empty() {
                return None;
            }
            prefix = match prefix.rfind('/') {
                Some(idx) => &prefix[..idx],
                None => "",
            };
        }
    }
}

fn normalize_uri(uri: &str) -> String {
    uri.trim().trim_end_matches('/').to_ascii_lowercase()
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::stats::ProxyStats;
    use crate::route::ModificationTag;
    use std::collections::HashMap as Tags;

    fn registry() -> (RouteRegistry, Arc<ProxyStats>) {
        let stats = Arc::new(ProxyStats::default());
        (
            RouteRegistry::new(Duration::from_secs(30), stats.clone()),
            stats,
        )
    }

    fn endpoint(id: &str, port: u16) -> Endpoint {
        Endpoint::new(
            "app-1",
            "10.0.0.1",
            port,
            id,
            "0",
            Tags::new(),
            120,
            None,
            ModificationTag::default(),
        )
    }

    #[test]
    fn lookup_by_bare_host() {
        let (registry, _) = registry();
        registry.register("myapp.example.com", endpoint("i-1", 8080));

        assert!(registry.lookup("myapp.example.com", "/").is_some());
        assert!(registry.lookup("myapp.example.com", "/some/deep/path").is_some());
        assert!(registry.lookup("other.example.com", "/").is_none());
    }

    #[test]
    fn lookup_prefers_longest_path_prefix() {
        let (registry, _) = registry();
        registry.register("myapp.example.com", endpoint("root", 8080));
        registry.register("myapp.example.com/api", endpoint("api", 9090));

        let pool = registry.lookup("myapp.example.com", "/api/v2/users").unwrap();
        assert_eq!(pool.snapshot()[0].private_instance_id, "api");

        let pool = registry.lookup("myapp.example.com", "/web").unwrap();
        assert_eq!(pool.snapshot()[0].private_instance_id, "root");
    }

    #[test]
    fn lookup_is_case_insensitive_on_host() {
        let (registry, _) = registry();
        registry.register("MyApp.Example.Com", endpoint("i-1", 8080));
        assert!(registry.lookup("myapp.example.com", "/").is_some());
    }

    #[test]
    fn unregister_removes_empty_pool() {
        let (registry, _) = registry();
        let e = endpoint("i-1", 8080);
        registry.register("myapp.example.com", endpoint("i-1", 8080));
        assert_eq!(registry.count(), 1);

        registry.unregister("myapp.example.com", &e);
        assert_eq!(registry.count(), 0);
        assert!(registry.lookup("myapp.example.com", "/").is_none());
    }

    #[test]
    fn register_tracks_update_time_and_messages() {
        let (registry, stats) = registry();
        assert_eq!(registry.ms_since_last_update(), None);

        registry.register("myapp.example.com", endpoint("i-1", 8080));
        assert!(registry.ms_since_last_update().is_some());
        assert_eq!(stats.snapshot().registry_messages, 1);
    }

    #[test]
    fn readers_keep_pool_across_unregister() {
        let (registry, _) = registry();
        let e = endpoint("i-1", 8080);
        registry.register("myapp.example.com", e);

        let borrowed = registry.lookup("myapp.example.com", "/").unwrap();
        let e2 = endpoint("i-1", 8080);
        registry.unregister("myapp.example.com", &e2);

        // The request that looked the pool up before the unregister still
        // holds a usable reference.
        assert!(borrowed.is_empty());
    }
}
