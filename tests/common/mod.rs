//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Start a mock backend returning a fixed response body.
pub async fn start_mock_backend(response: &'static str) -> SocketAddr {
    start_raw_backend(move || {
        format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            response.len(),
            response
        )
    })
    .await
}

/// Start a mock backend answering with the given raw HTTP response.
pub async fn start_raw_backend<F>(response: F) -> SocketAddr
where
    F: Fn() -> String + Send + Sync + 'static,
{
    let (addr, _) = start_capturing_backend(response).await;
    addr
}

/// Start a mock backend that also records the raw request head it saw.
pub async fn start_capturing_backend<F>(response: F) -> (SocketAddr, Arc<Mutex<Vec<String>>>)
where
    F: Fn() -> String + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_in_task = seen.clone();
    let response = Arc::new(response);

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else { break };
            let seen = seen_in_task.clone();
            let response = response.clone();
            tokio::spawn(async move {
                let mut buffer = vec![0u8; 8192];
                let mut head = String::new();
                loop {
                    match socket.read(&mut buffer).await {
                        Ok(0) => break,
                        Ok(n) => {
                            head.push_str(&String::from_utf8_lossy(&buffer[..n]));
                            if head.contains("\r\n\r\n") {
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
                seen.lock().unwrap().push(head);
                let _ = socket.write_all(response().as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (addr, seen)
}

/// An address that refuses connections: bound once, then released.
pub async fn dead_backend_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}
