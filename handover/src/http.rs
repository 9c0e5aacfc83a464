// SPDX-License-Identifier: MIT

//! HTTP/1.1 serving engine on top of hyper.

use std::error::Error as _;
use std::future::Future;
use std::io;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio_util::sync::CancellationToken;

use crate::config::{Config, DEFAULT_READ_TIMEOUT, DEFAULT_WRITE_TIMEOUT};
use crate::engine::{Accept, Engine};
use crate::log_pid;

/// Backoff bounds after accept fails for lack of file descriptors.
const MIN_ACCEPT_BACKOFF: Duration = Duration::from_millis(5);
const MAX_ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

pub trait Handler: Send + Sync + 'static {
    fn call(&self, req: Request<Incoming>) -> impl Future<Output = Response<Full<Bytes>>> + Send;
}

impl<F, Fut> Handler for F
where
    F: Fn(Request<Incoming>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response<Full<Bytes>>> + Send,
{
    fn call(&self, req: Request<Incoming>) -> impl Future<Output = Response<Full<Bytes>>> + Send {
        self(req)
    }
}

#[derive(Clone, Copy, Debug)]
struct Timeouts {
    /// Time allowed for a client to send request headers.
    read: Duration,
    /// Time allowed for the handler to produce a response.
    write: Duration,
}

/// Serves HTTP/1.1 with keep-alive, one task per connection.
///
/// When the listener is closed, open connections finish the request they
/// are working on and are then closed; idle keep-alive connections are
/// closed right away.
pub struct Http<H> {
    handler: Arc<H>,
    timeouts: Timeouts,
}

impl<H: Handler> Http<H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
            timeouts: Timeouts {
                read: DEFAULT_READ_TIMEOUT,
                write: DEFAULT_WRITE_TIMEOUT,
            },
        }
    }

    pub fn from_config(config: &Config, handler: H) -> Self {
        Self::new(handler)
            .read_timeout(config.read_timeout)
            .write_timeout(config.write_timeout)
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.read = timeout;
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.write = timeout;
        self
    }
}

impl<H: Handler> Engine for Http<H> {
    async fn serve<L: Accept>(&self, listener: Arc<L>) -> io::Result<()> {
        let stopping = CancellationToken::new();
        let mut backoff = MIN_ACCEPT_BACKOFF;

        let err = loop {
            let connecting = match listener.next_connecting().await {
                Ok(connecting) => connecting,
                Err(e) if is_aborted_connection(&e) => continue,
                Err(e) if is_out_of_descriptors(&e) => {
                    log_pid!(warn, "accept error: {e}; retrying in {backoff:?}");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_ACCEPT_BACKOFF);
                    continue;
                }
                Err(e) => break e,
            };
            backoff = MIN_ACCEPT_BACKOFF;

            let handler = self.handler.clone();
            let timeouts = self.timeouts;
            let stopping = stopping.clone();
            tokio::spawn(async move {
                match connecting.await {
                    Ok(io) => serve_connection(io, handler, timeouts, stopping).await,
                    Err(e) => log_pid!(debug, "failed to set up connection: {e}"),
                }
            });
        };

        stopping.cancel();
        Err(err)
    }
}

async fn serve_connection<I, H>(
    io: I,
    handler: Arc<H>,
    timeouts: Timeouts,
    stopping: CancellationToken,
) where
    I: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin + 'static,
    H: Handler,
{
    let service = service_fn(move |req| {
        let handler = handler.clone();
        async move {
            tokio::time::timeout(timeouts.write, handler.call(req))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "handler timed out"))
        }
    });

    let mut builder = http1::Builder::new();
    builder
        .timer(TokioTimer::new())
        .keep_alive(true)
        .header_read_timeout(timeouts.read);
    let mut conn = pin!(builder.serve_connection(TokioIo::new(io), service));

    let mut shutting_down = false;
    let result = loop {
        tokio::select! {
            result = conn.as_mut() => break result,
            _ = stopping.cancelled(), if !shutting_down => {
                shutting_down = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    };

    if let Err(err) = result {
        if let Some(io_err) = err.source().and_then(|e| e.downcast_ref::<io::Error>()) {
            match io_err.kind() {
                io::ErrorKind::NotConnected | io::ErrorKind::ConnectionReset => {
                    log_pid!(debug, "connection closed by peer: {io_err}")
                }
                _ => log_pid!(warn, "error while serving: {io_err}"),
            }
        } else if err.is_incomplete_message() || err.is_timeout() {
            log_pid!(debug, "interrupted request: {err}");
        } else {
            log_pid!(warn, "failed to serve HTTP: {err}");
        }
    }
}

fn is_aborted_connection(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
    )
}

fn is_out_of_descriptors(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::EMFILE) | Some(libc::ENFILE) | Some(libc::ENOBUFS) | Some(libc::ENOMEM)
    )
}
