// SPDX-License-Identifier: MIT

//! Accepted connections that report their closure to the listener.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::watch;

/// Count of accepted connections that have not been closed yet.
///
/// Works like a wait-group: [`LiveConnections::register`] before a
/// connection is handed out, one release per connection, and
/// [`LiveConnections::wait_idle`] to block until the count reaches zero.
#[derive(Debug)]
pub(crate) struct LiveConnections {
    count: watch::Sender<usize>,
}

impl LiveConnections {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            count: watch::Sender::new(0),
        })
    }

    pub(crate) fn register(&self) {
        self.count.send_modify(|n| *n += 1);
    }

    fn release(&self) {
        self.count.send_modify(|n| {
            debug_assert!(*n > 0, "connection released more often than registered");
            *n = n.saturating_sub(1);
        });
    }

    pub(crate) fn get(&self) -> usize {
        *self.count.borrow()
    }

    pub(crate) async fn wait_idle(&self) {
        let mut rx = self.count.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

/// A TCP connection accepted by a [`Listener`](crate::Listener).
///
/// Closing it, explicitly or by dropping it, releases its slot in the
/// listener's live count exactly once.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    live: Arc<LiveConnections>,
    released: AtomicBool,
}

impl Connection {
    /// The caller must already have registered this connection with `live`.
    pub(crate) fn new(stream: TcpStream, live: Arc<LiveConnections>) -> Self {
        Self {
            stream,
            live,
            released: AtomicBool::new(false),
        }
    }

    /// Release the live-count slot and shut down the stream.
    ///
    /// Only the first call touches the count; every call is forwarded to
    /// the stream and returns its result.
    pub async fn close(&mut self) -> io::Result<()> {
        self.release();
        self.stream.shutdown().await
    }

    pub fn is_closed(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.stream.local_addr()
    }

    pub fn get_ref(&self) -> &TcpStream {
        &self.stream
    }

    fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.live.release();
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.release();
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.stream.is_write_vectored()
    }
}
