// SPDX-License-Identifier: MIT

use std::future::poll_fn;
use std::task::Poll;

use nix::sys::signal::Signal;
use tokio::signal::unix::{self, SignalKind};

use crate::config::Config;
use crate::error::{Error, Result};

/// What a received signal asks the server to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// Stop accepting, finish accepted connections, exit.
    Shutdown,
    /// Start a successor on the same socket, then shut down.
    Restart,
}

/// The signal handlers installed for one server.
pub struct SignalWatcher {
    handlers: Vec<(Signal, unix::Signal, Action)>,
}

impl SignalWatcher {
    /// Install handlers for the signals named in `config`. Must be called
    /// from within a tokio runtime.
    pub fn install(config: &Config) -> Result<Self> {
        let mut handlers = Vec::with_capacity(config.shutdown_signals.len() + 1);
        let mapping = config
            .shutdown_signals
            .iter()
            .map(|name| (name.0, Action::Shutdown))
            .chain(std::iter::once((config.restart_signal.0, Action::Restart)));
        for (signal, action) in mapping {
            let stream = unix::signal(SignalKind::from_raw(signal as i32))
                .map_err(|source| Error::Signal { signal, source })?;
            handlers.push((signal, stream, action));
        }
        Ok(Self { handlers })
    }

    /// Wait for the next signal from any installed handler.
    pub async fn recv(&mut self) -> Option<(Signal, Action)> {
        poll_fn(|cx| {
            let mut open = false;
            for (signal, stream, action) in &mut self.handlers {
                match stream.poll_recv(cx) {
                    Poll::Ready(Some(())) => return Poll::Ready(Some((*signal, *action))),
                    Poll::Ready(None) => {}
                    Poll::Pending => open = true,
                }
            }
            if open {
                Poll::Pending
            } else {
                Poll::Ready(None)
            }
        })
        .await
    }
}
