//! Route service forwarding contract.
//!
//! Routes can be protected by an external HTTPS middlebox. Requests for
//! such routes are first sent to the route service, carrying the original
//! destination in `X-CF-Forwarded-Url` plus a signed timestamp; the route
//! service then calls back into the proxy with those headers intact, which
//! is how the proxy recognizes a request that already made the detour.
//!
//! The signature scheme itself is pluggable: this module owns the header
//! contract and expiry policy, the [`RouteServiceSigner`] implementation
//! owns the cryptography.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::http::Uri;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Original destination URL, set when forwarding to a route service.
pub const ROUTE_SERVICE_FORWARDED_URL: &str = "x-cf-forwarded-url";
/// Signed proof that the proxy originated the forwarded request.
pub const ROUTE_SERVICE_SIGNATURE: &str = "x-cf-proxy-signature";
/// Opaque signer state accompanying the signature.
pub const ROUTE_SERVICE_METADATA: &str = "x-cf-proxy-metadata";

#[derive(Debug, Error)]
pub enum RouteServiceError {
    #[error("invalid route service url: {0}")]
    InvalidUrl(String),
    #[error("route service signature expired")]
    SignatureExpired,
    #[error("route service signature rejected: {0}")]
    SignatureInvalid(String),
}

/// The signed payload: where the request was originally headed, and when.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignatureContents {
    pub forwarded_url: String,
    pub requested_at_epoch_secs: u64,
}

impl SignatureContents {
    pub fn new(forwarded_url: impl Into<String>) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self { forwarded_url: forwarded_url.into(), requested_at_epoch_secs: now }
    }

    fn age(&self) -> Duration {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Duration::from_secs(now.saturating_sub(self.requested_at_epoch_secs))
    }
}

/// Cryptographic backend producing and verifying signatures.
///
/// Kept external to the proxy core; the pipeline only moves the resulting
/// opaque strings through headers.
pub trait RouteServiceSigner: Send + Sync {
    /// Returns `(signature, metadata)` for the payload.
    fn sign(&self, contents: &SignatureContents) -> Result<(String, String), RouteServiceError>;

    fn verify(&self, signature: &str, metadata: &str) -> Result<SignatureContents, RouteServiceError>;
}

/// Signer stand-in that carries the payload as plain JSON.
///
/// Integration point for a real AEAD-backed signer; the header contract
/// and expiry policy do not change with the backend.
#[derive(Default)]
pub struct PlainSigner;

impl RouteServiceSigner for PlainSigner {
    fn sign(&self, contents: &SignatureContents) -> Result<(String, String), RouteServiceError> {
        let signature = serde_json::to_string(contents)
            .map_err(|e| RouteServiceError::SignatureInvalid(e.to_string()))?;
        Ok((signature, String::new()))
    }

    fn verify(&self, signature: &str, _metadata: &str) -> Result<SignatureContents, RouteServiceError> {
        serde_json::from_str(signature).map_err(|e| RouteServiceError::SignatureInvalid(e.to_string()))
    }
}

/// Everything needed to send one request to a route service.
#[derive(Debug)]
pub struct RouteServiceRequest {
    pub uri: Uri,
    pub signature: String,
    pub metadata: String,
    pub forwarded_url: String,
}

/// Builds and validates route service forward requests.
pub struct RouteServiceConfig {
    signer: Arc<dyn RouteServiceSigner>,
    /// How long a signature stays acceptable on the way back in.
    signature_lifetime: Duration,
}

impl RouteServiceConfig {
    pub fn new(signer: Arc<dyn RouteServiceSigner>, signature_lifetime: Duration) -> Self {
        Self { signer, signature_lifetime }
    }

    /// Build the forward request for a route-service-protected route.
    pub fn request(
        &self,
        route_service_url: &str,
        forwarded_url: &str,
    ) -> Result<RouteServiceRequest, RouteServiceError> {
        let uri: Uri = route_service_url
            .parse()
            .map_err(|_| RouteServiceError::InvalidUrl(route_service_url.to_string()))?;
        if uri.authority().is_none() {
            return Err(RouteServiceError::InvalidUrl(route_service_url.to_string()));
        }

        let contents = SignatureContents::new(forwarded_url);
        let (signature, metadata) = self.signer.sign(&contents)?;

        Ok(RouteServiceRequest {
            uri,
            signature,
            metadata,
            forwarded_url: forwarded_url.to_string(),
        })
    }

    /// Validate the signature headers of a request arriving back from a
    /// route service, returning the original forwarded URL.
    pub fn validate(&self, signature: &str, metadata: &str) -> Result<String, RouteServiceError> {
        let contents = self.signer.verify(signature, metadata)?;
        if contents.age() > self.signature_lifetime {
            return Err(RouteServiceError::SignatureExpired);
        }
        Ok(contents.forwarded_url)
    }
}
