//! WebSocket and raw TCP upgrade tunneling.
//!
//! # Data Flow
//! ```text
//! dispatch detects an upgrade request
//!     → one endpoint from the iterator (single attempt, 502 on failure)
//!     → dial the backend (plain TCP, 5 s budget)
//!     → websocket: replay the request head, relay the handshake response,
//!       then splice both upgraded streams
//!     → tcp: answer 101 ourselves and splice immediately
//! ```
//!
//! # Design Decisions
//! - Both splice directions run inside one task via `copy_bidirectional`,
//!   which tears down both halves on the first EOF or error
//! - The websocket handshake response is parsed and relayed rather than
//!   passed through raw: the client connection only becomes a byte stream
//!   once a response has gone out
//! - Connection accounting brackets the tunnel's whole lifetime, so
//!   least-connections sees long-lived tunnels

use std::io;

use axum::body::Body;
use axum::http::header::{CONNECTION, UPGRADE};
use axum::http::{HeaderValue, Request, Response, StatusCode, Uri};
use bytes::Bytes;
use http_body_util::Empty;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use tokio::io::copy_bidirectional;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::proxy::round_tripper::DIAL_TIMEOUT;
use crate::proxy::{plain_response, ProxyState};
use crate::route::EndpointIterator;

/// Tunnel a WebSocket upgrade to a backend instance.
pub async fn websocket(
    state: ProxyState,
    mut req: Request<Body>,
    mut iterator: Box<dyn EndpointIterator>,
) -> Response<Body> {
    let Some(endpoint) = iterator.next() else {
        state.inner.reporter.capture_bad_gateway();
        return plain_response(StatusCode::BAD_GATEWAY, "Bad Gateway");
    };

    let Some(client_upgrade) = req.extensions_mut().remove::<OnUpgrade>() else {
        tracing::warn!("upgrade requested on a connection that cannot be hijacked");
        return plain_response(StatusCode::BAD_REQUEST, "Bad Request");
    };

    let stream = match dial(&endpoint.address()).await {
        Ok(stream) => stream,
        Err(err) => {
            tracing::warn!(endpoint = %endpoint.address(), error = %err, "websocket backend dial failed");
            iterator.endpoint_failed();
            state.inner.reporter.capture_bad_gateway();
            return plain_response(StatusCode::BAD_GATEWAY, "Bad Gateway");
        }
    };

    iterator.pre_request(&endpoint);

    let io = TokioIo::new(stream);
    let (mut sender, conn) = match hyper::client::conn::http1::handshake::<_, Empty<Bytes>>(io).await
    {
        Ok(pair) => pair,
        Err(err) => {
            tracing::warn!(endpoint = %endpoint.address(), error = %err, "websocket backend handshake failed");
            iterator.endpoint_failed();
            iterator.post_request(&endpoint);
            state.inner.reporter.capture_bad_gateway();
            return plain_response(StatusCode::BAD_GATEWAY, "Bad Gateway");
        }
    };
    tokio::spawn(async move {
        if let Err(err) = conn.with_upgrades().await {
            tracing::debug!(error = %err, "websocket backend connection ended");
        }
    });

    // Replay the original request head, upgrade headers guaranteed.
    let mut outbound = Request::builder()
        .method(req.method().clone())
        .uri(origin_form(req.uri()));
    if let Some(headers) = outbound.headers_mut() {
        *headers = req.headers().clone();
        headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
        headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
    }
    let outbound = match outbound.body(Empty::<Bytes>::new()) {
        Ok(outbound) => outbound,
        Err(err) => {
            tracing::error!(error = %err, "cannot build websocket replay request");
            iterator.post_request(&endpoint);
            return plain_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error");
        }
    };

    let mut response = match sender.send_request(outbound).await {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!(endpoint = %endpoint.address(), error = %err, "websocket backend refused the handshake");
            iterator.endpoint_failed();
            iterator.post_request(&endpoint);
            state.inner.reporter.capture_bad_gateway();
            return plain_response(StatusCode::BAD_GATEWAY, "Bad Gateway");
        }
    };

    if response.status() == StatusCode::SWITCHING_PROTOCOLS {
        let backend_upgrade = hyper::upgrade::on(&mut response);
        tokio::spawn(async move {
            match tokio::try_join!(client_upgrade, backend_upgrade) {
                Ok((client, backend)) => {
                    let mut client = TokioIo::new(client);
                    let mut backend = TokioIo::new(backend);
                    if let Err(err) = copy_bidirectional(&mut client, &mut backend).await {
                        tracing::debug!(error = %err, "websocket tunnel closed");
                    }
                }
                Err(err) => {
                    tracing::debug!(error = %err, "websocket upgrade never completed");
                }
            }
            iterator.post_request(&endpoint);
        });
    } else {
        // The backend declined the upgrade; its response goes back as-is.
        iterator.post_request(&endpoint);
    }

    response.map(Body::new)
}

/// Tunnel a raw TCP upgrade: no HTTP replay, splice immediately.
pub async fn tcp(
    state: ProxyState,
    mut req: Request<Body>,
    mut iterator: Box<dyn EndpointIterator>,
) -> Response<Body> {
    let Some(endpoint) = iterator.next() else {
        state.inner.reporter.capture_bad_gateway();
        return plain_response(StatusCode::BAD_GATEWAY, "Bad Gateway");
    };

    let Some(client_upgrade) = req.extensions_mut().remove::<OnUpgrade>() else {
        tracing::warn!("upgrade requested on a connection that cannot be hijacked");
        return plain_response(StatusCode::BAD_REQUEST, "Bad Request");
    };

    let mut backend = match dial(&endpoint.address()).await {
        Ok(stream) => stream,
        Err(err) => {
            tracing::warn!(endpoint = %endpoint.address(), error = %err, "tcp backend dial failed");
            iterator.endpoint_failed();
            state.inner.reporter.capture_bad_gateway();
            return plain_response(StatusCode::BAD_GATEWAY, "Bad Gateway");
        }
    };

    iterator.pre_request(&endpoint);
    tokio::spawn(async move {
        match client_upgrade.await {
            Ok(client) => {
                let mut client = TokioIo::new(client);
                if let Err(err) = copy_bidirectional(&mut client, &mut backend).await {
                    tracing::debug!(error = %err, "tcp tunnel closed");
                }
            }
            Err(err) => {
                tracing::debug!(error = %err, "tcp upgrade never completed");
            }
        }
        iterator.post_request(&endpoint);
    });

    match Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(CONNECTION, "Upgrade")
        .header(UPGRADE, "tcp")
        .body(Body::empty())
    {
        Ok(response) => response,
        Err(_) => plain_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error"),
    }
}

async fn dial(address: &str) -> io::Result<TcpStream> {
    match timeout(DIAL_TIMEOUT, TcpStream::connect(address)).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "backend dial timed out")),
    }
}

fn origin_form(uri: &Uri) -> String {
    uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/").to_string()
}
