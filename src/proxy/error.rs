//! Pipeline error types and transport error classification.

use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Outbound transport failure, classified for the retry policy.
///
/// Only connect-phase failures and connection resets observed on read are
/// retriable; everything else ends the retry loop.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect to backend failed: {0}")]
    Connect(#[source] BoxError),

    #[error("backend connection reset: {0}")]
    ConnectionReset(#[source] BoxError),

    #[error("backend did not answer within the endpoint timeout")]
    Timeout,

    #[error("backend request failed: {0}")]
    Other(#[source] BoxError),
}

impl TransportError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, TransportError::Connect(_) | TransportError::ConnectionReset(_))
    }

    /// Classify a legacy-client error by walking its source chain.
    pub fn from_client_error(err: hyper_util::client::legacy::Error) -> Self {
        if err.is_connect() {
            return TransportError::Connect(Box::new(err));
        }
        if is_connection_reset(&err) {
            return TransportError::ConnectionReset(Box::new(err));
        }
        TransportError::Other(Box::new(err))
    }
}

/// Whether any error in the source chain is an ECONNRESET I/O error.
pub fn is_connection_reset(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionReset {
                return true;
            }
        }
        current = e.source();
    }
    false
}

/// Terminal request-pipeline error, mapped to an HTTP status at the chain
/// boundary.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The iterator ran dry before any attempt could be made.
    #[error("no endpoints available for route")]
    NoEndpointsAvailable,

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A required context value was not attached by an earlier stage;
    /// indicates a pipeline bug, not a client problem.
    #[error("request context incomplete: {0} not set")]
    MissingContext(&'static str),

    #[error("upgrade tunnel failed: {0}")]
    Tunnel(String),
}
