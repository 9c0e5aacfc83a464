// SPDX-License-Identifier: MIT

//! The seams between the lifecycle core and whatever serves requests.
//!
//! A serving engine only sees something that implements [`Accept`]: the
//! plain [`Listener`](crate::Listener) and the TLS-terminating
//! [`TlsListener`](crate::TlsListener) are interchangeable from its point of
//! view.

use std::fmt;
use std::future::Future;
use std::io;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};

/// A source of incoming connections that can be closed from another task.
pub trait Accept: Send + Sync + 'static {
    /// The stream handed to the engine once a connection is established.
    type Io: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Finishes setting up an accepted connection (e.g. a TLS handshake).
    /// Engines should drive it on the per-connection task so a slow peer
    /// never stalls the accept loop.
    type Connecting: Future<Output = io::Result<Self::Io>> + Send + 'static;

    /// Wait for the next connection. After [`Accept::close`] this fails
    /// with an error for which [`is_closed`] returns true.
    fn next_connecting(&self) -> impl Future<Output = io::Result<Self::Connecting>> + Send;

    /// Stop accepting. Connections accepted earlier are not affected.
    fn close(&self);
}

impl<L: Accept> Accept for Arc<L> {
    type Io = L::Io;
    type Connecting = L::Connecting;

    fn next_connecting(&self) -> impl Future<Output = io::Result<Self::Connecting>> + Send {
        (**self).next_connecting()
    }

    fn close(&self) {
        (**self).close()
    }
}

/// Serves connections from a listener until the listener is closed.
pub trait Engine: Send + Sync + 'static {
    /// Returns the error that stopped the accept loop. When the listener was
    /// closed on purpose that error satisfies [`is_closed`].
    fn serve<L: Accept>(&self, listener: Arc<L>) -> impl Future<Output = io::Result<()>> + Send;
}

#[derive(Debug)]
struct ListenerClosed;

impl fmt::Display for ListenerClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("use of closed listener")
    }
}

impl std::error::Error for ListenerClosed {}

/// The error returned by `accept` on a closed listener.
pub fn closed_error() -> io::Error {
    io::Error::other(ListenerClosed)
}

/// Whether `err` reports that the listener was closed.
pub fn is_closed(err: &io::Error) -> bool {
    err.get_ref()
        .is_some_and(|inner| inner.is::<ListenerClosed>())
}
