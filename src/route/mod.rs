//! Route domain model.
//!
//! # Data Flow
//! ```text
//! Registry lookup → Pool (all endpoints for one route)
//!     → pool.endpoints(strategy, sticky_id)
//!     → EndpointIterator (round-robin or least-connections cursor)
//!     → Endpoint (one backend instance, host:port + metadata)
//! ```
//!
//! # Design Decisions
//! - Endpoints are immutable and shared via `Arc`; the registry replaces
//!   them wholesale on updates
//! - Failure state lives on the pool, not the endpoint, so a replaced
//!   endpoint with the same instance id keeps its cooldown
//! - Iterators are per-request; cross-request state (round-robin cursor,
//!   connection counts) stays on the pool and endpoints

pub mod endpoint;
pub mod iterator;
pub mod pool;

pub use endpoint::{Endpoint, ModificationTag};
pub use iterator::{EndpointIterator, LoadBalance};
pub use pool::Pool;
