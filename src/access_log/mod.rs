//! Per-request access logging.
//!
//! # Data Flow
//! ```text
//! access-log stage creates the record (start time, request line)
//!     → later stages fill it in (endpoint, status, trace headers)
//!     → the response body is wrapped in CountingBody
//!     → when the body finishes (or the client goes away) the record is
//!       finalized and handed to the AccessLogger
//! ```
//!
//! # Design Decisions
//! - The record travels in request extensions behind `Arc<Mutex<_>>` so
//!   any stage and the iterator callback can update it
//! - Record formatting and delivery are behind the `AccessLogger` trait;
//!   the built-in implementation emits a structured tracing event

pub mod body;
pub mod record;

pub use body::CountingBody;
pub use record::{AccessLogRecord, AccessLogger, SharedRecord, TracingAccessLogger};
