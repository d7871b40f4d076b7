//! Route resolution stage.

use std::sync::Arc;
use std::time::Instant;

use crate::metrics::ProxyReporter;
use crate::registry::LookupRegistry;
use crate::route::Pool;

/// Resolve the pool for `(host, path)`, reporting the lookup time.
pub fn lookup(
    registry: &dyn LookupRegistry,
    reporter: &dyn ProxyReporter,
    host: &str,
    path: &str,
) -> Option<Arc<Pool>> {
    let started = Instant::now();
    let pool = registry.lookup(host, path);
    reporter.capture_lookup_time(started.elapsed());
    pool
}
