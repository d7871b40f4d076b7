//! The access log record and its delivery trait.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use crate::route::Endpoint;

/// Mutable per-request record the handler chain fills in.
pub struct AccessLogRecord {
    pub started_at: SystemTime,
    start_instant: Instant,

    pub method: String,
    pub uri: String,
    pub host: String,
    pub remote_addr: Option<SocketAddr>,
    pub x_vcap_request_id: String,

    /// The endpoint the request was ultimately sent to; updated on every
    /// retry so the logged endpoint matches the one that answered.
    pub route_endpoint: Option<Arc<Endpoint>>,
    pub status: Option<u16>,
    pub bytes_received: u64,
    pub bytes_sent: u64,

    /// Extra request headers the access logger captures, as configured.
    pub extra_headers: Vec<(String, String)>,

    finished_after: Option<Duration>,
}

impl AccessLogRecord {
    pub fn new(
        method: String,
        uri: String,
        host: String,
        remote_addr: Option<SocketAddr>,
        x_vcap_request_id: String,
    ) -> Self {
        Self {
            started_at: SystemTime::now(),
            start_instant: Instant::now(),
            method,
            uri,
            host,
            remote_addr,
            x_vcap_request_id,
            route_endpoint: None,
            status: None,
            bytes_received: 0,
            bytes_sent: 0,
            extra_headers: Vec::new(),
            finished_after: None,
        }
    }

    /// Stamp the response-finished time. Later calls keep the first stamp.
    pub fn finish(&mut self) {
        if self.finished_after.is_none() {
            self.finished_after = Some(self.start_instant.elapsed());
        }
    }

    /// Wall time from request start to finish; up to now when unfinished.
    pub fn response_time(&self) -> Duration {
        self.finished_after.unwrap_or_else(|| self.start_instant.elapsed())
    }
}

/// Shared handle stages use to update the record.
pub type SharedRecord = Arc<Mutex<AccessLogRecord>>;

/// Delivery sink for completed records.
pub trait AccessLogger: Send + Sync {
    fn log(&self, record: &AccessLogRecord);
}

/// Logger that emits one structured tracing event per request.
pub struct TracingAccessLogger;

impl AccessLogger for TracingAccessLogger {
    fn log(&self, record: &AccessLogRecord) {
        let endpoint = record
            .route_endpoint
            .as_ref()
            .map(|e| e.address())
            .unwrap_or_else(|| "-".to_string());

        tracing::info!(
            target: "access_log",
            method = %record.method,
            uri = %record.uri,
            host = %record.host,
            remote_addr = ?record.remote_addr,
            status = record.status.unwrap_or(0),
            endpoint = %endpoint,
            bytes_received = record.bytes_received,
            bytes_sent = record.bytes_sent,
            response_time_ms = record.response_time().as_millis() as u64,
            vcap_request_id = %record.x_vcap_request_id,
            extra_headers = ?record.extra_headers,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_is_idempotent() {
        let mut record = AccessLogRecord::new(
            "GET".into(),
            "/".into(),
            "myapp.example.com".into(),
            None,
            "req-1".into(),
        );
        record.finish();
        let first = record.response_time();
        std::thread::sleep(Duration::from_millis(5));
        record.finish();
        assert_eq!(record.response_time(), first);
    }
}
