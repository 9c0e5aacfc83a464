// SPDX-License-Identifier: MIT

// Rust doesn't see that this is used in test binaries, so we need to allow dead code
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

/// `/slow` takes this long to answer.
pub const SLOW: Duration = Duration::from_millis(500);

/// Answers `ok`, or `slow ok` after [`SLOW`] on `/slow`. `started` is
/// notified once a slow request has reached the handler.
pub fn handler(started: Arc<Notify>) -> impl handover::Handler {
    move |req: Request<Incoming>| {
        let started = started.clone();
        async move {
            if req.uri().path() == "/slow" {
                started.notify_one();
                tokio::time::sleep(SLOW).await;
                return Response::new(Full::new(Bytes::from("slow ok")));
            }
            Response::new(Full::new(Bytes::from("ok")))
        }
    }
}

/// Send one `GET` with `Connection: close` and return status and body.
pub async fn get<S>(mut stream: S, path: &str) -> Result<(u16, String)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await?;
    parse_response(&String::from_utf8(response)?)
}

/// [`get`] on a fresh connection from a separate task.
pub fn spawn_get(
    addr: std::net::SocketAddr,
    path: &'static str,
) -> tokio::task::JoinHandle<std::result::Result<(u16, String), String>> {
    tokio::spawn(async move {
        let stream = tokio::net::TcpStream::connect(addr)
            .await
            .map_err(|e| e.to_string())?;
        get(stream, path).await.map_err(|e| e.to_string())
    })
}

pub fn parse_response(response: &str) -> Result<(u16, String)> {
    let status = response
        .split(' ')
        .nth(1)
        .ok_or("empty response")?
        .parse()?;
    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, body)| body.to_string())
        .unwrap_or_default();
    Ok((status, body))
}

/// Connect until the port refuses, which happens once the listening socket
/// is really closed.
pub async fn wait_until_refused(addr: std::net::SocketAddr) -> Result<()> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match tokio::net::TcpStream::connect(addr).await {
                Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => return,
                _ => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }
    })
    .await
    .map_err(|_| format!("{addr} still accepts connections").into())
}

pub async fn wait_for_live(handle: &handover::Handle, n: usize) {
    while handle.live_connections() != Some(n) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
