//! Endpoint pool for one route.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::route::endpoint::Endpoint;
use crate::route::iterator::{LoadBalance, PoolIterator};

/// The set of endpoints serving one route.
///
/// Owned by the registry; request handlers obtain an `Arc` for the duration
/// of one request and build per-request iterators from it. Endpoint failures
/// reported by iterators are kept here so recently failed instances are
/// deprioritized across requests until the cooldown expires.
pub struct Pool {
    endpoints: Mutex<Vec<Arc<Endpoint>>>,
    /// Instance id → time of last reported failure.
    failures: DashMap<String, Instant>,
    /// Round-robin cursor shared by all iterators of this pool.
    next_index: AtomicUsize,
    retry_after_failure: Duration,
}

impl Pool {
    pub fn new(retry_after_failure: Duration) -> Self {
        Self {
            endpoints: Mutex::new(Vec::new()),
            failures: DashMap::new(),
            next_index: AtomicUsize::new(0),
            retry_after_failure,
        }
    }

    /// Insert or replace the endpoint with the same private instance id.
    ///
    /// An update carrying a modification tag older than the stored one is
    /// dropped. Returns whether the pool changed.
    pub fn put(&self, endpoint: Endpoint) -> bool {
        let mut endpoints = self.endpoints.lock().unwrap();
        match endpoints
            .iter()
            .position(|e| e.private_instance_id == endpoint.private_instance_id)
        {
            Some(idx) => {
                if !endpoints[idx].modification_tag.succeeded_by(&endpoint.modification_tag) {
                    return false;
                }
                endpoints[idx] = Arc::new(endpoint);
                true
            }
            None => {
                endpoints.push(Arc::new(endpoint));
                true
            }
        }
    }

    /// Remove the endpoint with the given private instance id.
    pub fn remove(&self, private_instance_id: &str) -> bool {
        let mut endpoints = self.endpoints.lock().unwrap();
        let before = endpoints.len();
        endpoints.retain(|e| e.private_instance_id != private_instance_id);
        if endpoints.len() != before {
            self.failures.remove(private_instance_id);
            true
        } else {
            false
        }
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.lock().unwrap().is_empty()
    }

    pub fn len(&self) -> usize {
        self.endpoints.lock().unwrap().len()
    }

    /// Copy of the current endpoint set.
    pub fn snapshot(&self) -> Vec<Arc<Endpoint>> {
        self.endpoints.lock().unwrap().clone()
    }

    /// The route service protecting this route, taken from its endpoints.
    pub fn route_service_url(&self) -> Option<String> {
        self.endpoints
            .lock()
            .unwrap()
            .iter()
            .find_map(|e| e.route_service_url.clone())
    }

    /// Record a failure for the given instance, starting its cooldown.
    pub fn mark_failed(&self, private_instance_id: &str) {
        self.failures.insert(private_instance_id.to_string(), Instant::now());
    }

    /// Whether the instance failed within the cooldown window.
    pub fn is_failed(&self, private_instance_id: &str) -> bool {
        match self.failures.get(private_instance_id) {
            Some(at) => at.elapsed() < self.retry_after_failure,
            None => false,
        }
    }

    /// Build a per-request iterator over the current endpoint set.
    ///
    /// `sticky_instance_id` is honored on the first `next` call only, and
    /// only while that instance is present and not cooling down.
    pub fn endpoints(
        self: &Arc<Self>,
        strategy: LoadBalance,
        sticky_instance_id: Option<&str>,
    ) -> PoolIterator {
        PoolIterator::new(Arc::clone(self), strategy, sticky_instance_id)
    }

    pub(crate) fn advance_cursor(&self) -> usize {
        self.next_index.fetch_add(1, Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool").field("endpoints", &self.len()).finish()
    }
}
