// SPDX-License-Identifier: MIT

//! The server lifecycle: obtain a socket, serve, and react to shutdown and
//! restart requests until every accepted connection has finished.
//!
//! ```text
//! Starting -> Serving -> ShuttingDown -> Draining -> Terminated
//! ```
//!
//! A restart starts a successor process on the same socket and then shuts
//! down exactly like a plain shutdown. If the successor cannot be started the
//! server keeps serving.

use std::ffi::OsString;
use std::sync::{Arc, OnceLock};

use rustls::ServerConfig;
use tokio::sync::{mpsc, watch};

use crate::config::Config;
use crate::engine::{Engine, is_closed};
use crate::error::{Error, Result};
use crate::http::{Handler, Http};
use crate::listener::Listener;
use crate::log_pid;
use crate::process::{self, INHERITED_FD};
use crate::signals::{Action, SignalWatcher};
use crate::tls::{TlsListener, load_tls_config};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    Starting,
    Serving,
    ShuttingDown,
    Draining,
    Terminated,
}

struct Shared {
    state: watch::Sender<State>,
    listener: OnceLock<Arc<Listener>>,
    actions: mpsc::UnboundedSender<Action>,
    /// Unset means this process's own `argv`.
    successor: OnceLock<(OsString, Vec<OsString>)>,
}

impl Shared {
    /// Move to `next` unless the server is already there or further along.
    fn advance(&self, next: State) -> bool {
        self.state.send_if_modified(|state| {
            if next > *state {
                *state = next;
                true
            } else {
                false
            }
        })
    }

    /// Close the listener. Once this reports `ShuttingDown`, accept has
    /// been stopped.
    fn shutdown(&self) {
        if let Some(listener) = self.listener.get() {
            listener.close();
        }
        self.advance(State::ShuttingDown);
    }

    fn start_successor(&self) -> Result<u32> {
        let listener = self.listener.get().ok_or_else(|| Error::Spawn {
            source: std::io::Error::other("server is not listening yet"),
        })?;
        let fd = listener
            .descriptor()
            .map_err(|source| Error::Spawn { source })?;
        match self.successor.get() {
            None => process::spawn_successor(fd),
            Some((program, args)) => process::spawn_with_listener(program, args.clone(), fd)
                .and_then(|child| {
                    child
                        .id()
                        .ok_or_else(|| std::io::Error::other("new process exited immediately"))
                }),
        }
        .map_err(|source| Error::Spawn { source })
    }

    fn restart(&self) {
        if *self.state.borrow() != State::Serving {
            log_pid!(warn, "not serving, ignoring restart request");
            return;
        }
        match self.start_successor() {
            Ok(pid) => {
                log_pid!(info, "started new process with pid {pid}, shutting down");
                self.shutdown();
            }
            Err(e) => log_pid!(error, "{e}, continuing to serve"),
        }
    }
}

/// A cloneable way to observe and drive a running [`Server`].
#[derive(Clone)]
pub struct Handle {
    shared: Arc<Shared>,
}

impl Handle {
    /// Same as receiving a shutdown signal.
    pub fn shutdown(&self) {
        let _ = self.shared.actions.send(Action::Shutdown);
    }

    /// Same as receiving the restart signal.
    pub fn restart(&self) {
        let _ = self.shared.actions.send(Action::Restart);
    }

    pub fn state(&self) -> State {
        *self.shared.state.borrow()
    }

    /// Wait until the server has reached `state` (or gone past it).
    pub async fn reached(&self, state: State) {
        let mut rx = self.shared.state.subscribe();
        let _ = rx.wait_for(|current| *current >= state).await;
    }

    /// Connections accepted and not yet closed, once the server is listening.
    pub fn live_connections(&self) -> Option<usize> {
        self.shared.listener.get().map(|listener| listener.live())
    }
}

pub struct Server<E> {
    config: Config,
    engine: E,
    shared: Arc<Shared>,
    actions: mpsc::UnboundedReceiver<Action>,
}

impl<H: Handler> Server<Http<H>> {
    /// A server running the HTTP engine with the timeouts from `config`.
    pub fn http(config: Config, handler: H) -> Self {
        let engine = Http::from_config(&config, handler);
        Self::new(config, engine)
    }
}

impl<E: Engine> Server<E> {
    pub fn new(config: Config, engine: E) -> Self {
        let (actions_tx, actions) = mpsc::unbounded_channel();
        Self {
            config,
            engine,
            shared: Arc::new(Shared {
                state: watch::Sender::new(State::Starting),
                listener: OnceLock::new(),
                actions: actions_tx,
                successor: OnceLock::new(),
            }),
            actions,
        }
    }

    /// Start successors with `program` and `args` instead of re-running
    /// this process's own command line. Only the first call has an effect.
    pub fn with_successor_command(
        self,
        program: impl Into<OsString>,
        args: impl IntoIterator<Item = impl Into<OsString>>,
    ) -> Self {
        let command = (program.into(), args.into_iter().map(Into::into).collect());
        let _ = self.shared.successor.set(command);
        self
    }

    pub fn handle(&self) -> Handle {
        Handle {
            shared: self.shared.clone(),
        }
    }

    /// Whether this process is a successor that inherits its socket.
    pub fn is_inherited(&self) -> bool {
        process::is_inherited()
    }

    /// Obtain the listening socket: inherited from the parent if this process
    /// is a successor, otherwise freshly bound to the configured address.
    pub async fn listen(&self) -> Result<Listener> {
        if self.is_inherited() {
            let listener = process::inherit_listener()
                .and_then(Listener::from_std)
                .map_err(|source| Error::Inherit {
                    fd: INHERITED_FD,
                    source,
                })?;
            log_pid!(info, "inherited listener on {}", listener.local_addr());
            Ok(listener)
        } else {
            let addr = self.config.bind_addr();
            let listener = Listener::bind(addr).await.map_err(|source| Error::Bind {
                addr: addr.to_string(),
                source,
            })?;
            log_pid!(info, "listening on {}", listener.local_addr());
            Ok(listener)
        }
    }

    /// Obtain the socket and serve until shut down or restarted.
    pub async fn listen_and_serve(self) -> Result<()> {
        self.config.validate()?;
        let tls = self.tls_config()?;
        let listener = self.listen().await?;
        self.run(listener, tls).await
    }

    /// Serve on an already open listener until shut down or restarted.
    pub async fn serve(self, listener: Listener) -> Result<()> {
        self.config.validate()?;
        let tls = self.tls_config()?;
        self.run(listener, tls).await
    }

    fn tls_config(&self) -> Result<Option<Arc<ServerConfig>>> {
        self.config
            .tls_paths()
            .map(|(cert, key)| load_tls_config(cert, key))
            .transpose()
    }

    async fn run(self, listener: Listener, tls: Option<Arc<ServerConfig>>) -> Result<()> {
        let Server {
            config,
            engine,
            shared,
            actions,
        } = self;

        let signals = SignalWatcher::install(&config)?;
        let listener = Arc::new(listener);
        let _ = shared.listener.set(listener.clone());
        shared.advance(State::Serving);

        let watcher = tokio::spawn(watch_signals(signals, actions, shared.clone()));

        let served = match tls {
            Some(tls) => {
                engine
                    .serve(Arc::new(TlsListener::new(listener.clone(), tls)))
                    .await
            }
            None => engine.serve(listener.clone()).await,
        };

        // The engine may also stop on an accept error nobody asked for; make
        // sure no more connections arrive before draining.
        shared.shutdown();

        shared.advance(State::Draining);
        log_pid!(info, "waiting for {} connection(s) to close", listener.live());
        match config.drain_timeout {
            Some(limit) => {
                if tokio::time::timeout(limit, listener.wait()).await.is_err() {
                    log_pid!(
                        warn,
                        "gave up waiting after {limit:?} with {} connection(s) still open",
                        listener.live()
                    );
                }
            }
            None => listener.wait().await,
        }
        log_pid!(info, "all connections closed");

        watcher.abort();
        shared.advance(State::Terminated);

        match served {
            Ok(()) => Ok(()),
            Err(e) if is_closed(&e) => Ok(()),
            Err(e) => Err(Error::Serve(e)),
        }
    }
}

async fn watch_signals(
    mut signals: SignalWatcher,
    mut actions: mpsc::UnboundedReceiver<Action>,
    shared: Arc<Shared>,
) {
    loop {
        let action = tokio::select! {
            Some((signal, action)) = signals.recv() => {
                log_pid!(info, "received {signal}, {}", describe(action));
                action
            }
            Some(action) = actions.recv() => action,
            else => return,
        };
        match action {
            Action::Shutdown => shared.shutdown(),
            Action::Restart => shared.restart(),
        }
    }
}

fn describe(action: Action) -> &'static str {
    match action {
        Action::Shutdown => "shutting down gracefully",
        Action::Restart => "restarting gracefully",
    }
}
