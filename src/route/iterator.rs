//! Load-balancing iteration over a pool.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::route::endpoint::Endpoint;
use crate::route::pool::Pool;

/// Endpoint selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadBalance {
    #[default]
    RoundRobin,
    LeastConnection,
}

/// Stateful cursor over a pool snapshot, consumed by one request.
///
/// The retry loop drives it: `next` hands out the next candidate,
/// `endpoint_failed` feeds failures back to the pool, and the pre/post
/// hooks bracket each attempt for connection accounting.
pub trait EndpointIterator: Send {
    fn next(&mut self) -> Option<Arc<Endpoint>>;

    /// Mark the last endpoint returned by `next` as failed.
    fn endpoint_failed(&mut self);

    fn pre_request(&self, endpoint: &Endpoint);
    fn post_request(&self, endpoint: &Endpoint);
}

/// Iterator over one pool, ordered by strategy with failed endpoints last.
///
/// Endpoints cooling down after a failure sort behind healthy ones, so a
/// traversal visits every healthy endpoint before reconsidering failed
/// ones. Iteration is cyclic: once the snapshot is exhausted it wraps
/// around, which keeps the retry loop progressing on small pools.
pub struct PoolIterator {
    pool: Arc<Pool>,
    order: Vec<Arc<Endpoint>>,
    position: usize,
    last: Option<Arc<Endpoint>>,
}

impl PoolIterator {
    pub(crate) fn new(pool: Arc<Pool>, strategy: LoadBalance, sticky_instance_id: Option<&str>) -> Self {
        let snapshot = pool.snapshot();
        let (mut healthy, failed): (Vec<_>, Vec<_>) = snapshot
            .into_iter()
            .partition(|e| !pool.is_failed(&e.private_instance_id));

        match strategy {
            LoadBalance::RoundRobin => {
                if !healthy.is_empty() {
                    let offset = pool.advance_cursor() % healthy.len();
                    healthy.rotate_left(offset);
                }
            }
            LoadBalance::LeastConnection => {
                healthy.sort_by_key(|e| e.active_connections());
            }
        }

        // Sticky preference applies to the first `next` only, and never to
        // an instance that is cooling down.
        if let Some(sticky) = sticky_instance_id {
            if let Some(idx) = healthy.iter().position(|e| e.private_instance_id == sticky) {
                let preferred = healthy.remove(idx);
                healthy.insert(0, preferred);
            }
        }

        let mut order = healthy;
        order.extend(failed);

        Self { pool, order, position: 0, last: None }
    }
}

impl EndpointIterator for PoolIterator {
    fn next(&mut self) -> Option<Arc<Endpoint>> {
        if self.order.is_empty() {
            return None;
        }
        let endpoint = Arc::clone(&self.order[self.position % self.order.len()]);
        self.position += 1;
        self.last = Some(Arc::clone(&endpoint));
        Some(endpoint)
    }

    fn endpoint_failed(&mut self) {
        if let Some(last) = &self.last {
            self.pool.mark_failed(&last.private_instance_id);
        }
    }

    fn pre_request(&self, endpoint: &Endpoint) {
        endpoint.increment_connections();
    }

    fn post_request(&self, endpoint: &Endpoint) {
        endpoint.decrement_connections();
    }
}
