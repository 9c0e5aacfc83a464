// SPDX-License-Identifier: MIT

//! A TCP listener that keeps track of the connections it hands out.

use std::future::{Ready, ready};
use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsFd, OwnedFd};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use nix::sys::socket::{setsockopt, sockopt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio_util::sync::CancellationToken;

use crate::connection::{Connection, LiveConnections};
use crate::engine::{Accept, closed_error};
use crate::log_pid;

/// Probe period for TCP keep-alive on accepted connections, so dead peers
/// are noticed while a drain is in progress.
pub const KEEPALIVE_PERIOD: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct Listener {
    // `None` once closed. Pending accepts hold their own clone, which they
    // drop as soon as `closed` fires, so closing releases the socket promptly.
    socket: Mutex<Option<Arc<TcpListener>>>,
    closed: CancellationToken,
    live: Arc<LiveConnections>,
    local_addr: SocketAddr,
}

impl Listener {
    pub async fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        Self::from_tokio(TcpListener::bind(addr).await?)
    }

    /// Wrap a listener bound elsewhere, e.g. one inherited from a parent
    /// process. Must be called from within a tokio runtime.
    pub fn from_std(listener: std::net::TcpListener) -> io::Result<Self> {
        listener.set_nonblocking(true)?;
        Self::from_tokio(TcpListener::from_std(listener)?)
    }

    pub fn from_tokio(listener: TcpListener) -> io::Result<Self> {
        let local_addr = listener.local_addr()?;
        Ok(Self {
            socket: Mutex::new(Some(Arc::new(listener))),
            closed: CancellationToken::new(),
            live: LiveConnections::new(),
            local_addr,
        })
    }

    fn socket(&self) -> io::Result<Arc<TcpListener>> {
        self.socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(closed_error)
    }

    /// Accept the next connection and count it as live until it is closed.
    pub async fn accept(&self) -> io::Result<Connection> {
        let socket = self.socket()?;
        let (stream, peer) = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(closed_error()),
            accepted = socket.accept() => accepted?,
        };
        drop(socket);

        if let Err(e) = set_keepalive(&stream) {
            log_pid!(debug, "failed to enable keep-alive for {peer}: {e}");
        }
        self.live.register();
        Ok(Connection::new(stream, self.live.clone()))
    }

    /// Wait until every connection accepted so far has been closed.
    pub async fn wait(&self) {
        self.live.wait_idle().await
    }

    /// Number of accepted connections not closed yet.
    pub fn live(&self) -> usize {
        self.live.get()
    }

    /// Duplicate the listening socket's file descriptor, for handing it to a
    /// child process. The duplicate shares the socket with this listener.
    pub fn descriptor(&self) -> io::Result<OwnedFd> {
        self.socket()?.as_fd().try_clone_to_owned()
    }

    /// Close the socket. Wakes a pending [`Listener::accept`], and every
    /// later call fails. Idempotent.
    pub fn close(&self) {
        let socket = self
            .socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.closed.cancel();
        if socket.is_some() {
            log_pid!(debug, "closed listener on {}", self.local_addr);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Accept for Listener {
    type Io = Connection;
    type Connecting = Ready<io::Result<Connection>>;

    async fn next_connecting(&self) -> io::Result<Self::Connecting> {
        Listener::accept(self).await.map(|conn| ready(Ok(conn)))
    }

    fn close(&self) {
        Listener::close(self)
    }
}

fn set_keepalive(stream: &TcpStream) -> nix::Result<()> {
    setsockopt(stream, sockopt::KeepAlive, &true)?;
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        let secs = KEEPALIVE_PERIOD.as_secs() as u32;
        setsockopt(stream, sockopt::TcpKeepIdle, &secs)?;
        setsockopt(stream, sockopt::TcpKeepInterval, &secs)?;
    }
    #[cfg(target_vendor = "apple")]
    setsockopt(
        stream,
        sockopt::TcpKeepAlive,
        &(KEEPALIVE_PERIOD.as_secs() as u32),
    )?;
    Ok(())
}
