// SPDX-License-Identifier: MIT

//! Graceful shutdown and zero-downtime restart for TCP servers.
//!
//! A [`Server`] listens on one socket and serves it with an [`Engine`] until
//! it receives a shutdown or restart signal. On shutdown it stops accepting
//! and waits for every accepted connection to close. On restart it first
//! starts a new copy of the program that inherits the listening socket, so
//! clients never see a refused connection while generations change over.

pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod http;
pub mod listener;
pub mod process;
pub mod server;
pub mod signals;
pub mod tls;

use std::path::PathBuf;

pub use config::{Config, SignalName};
pub use connection::Connection;
pub use engine::{Accept, Engine, closed_error, is_closed};
pub use error::{ConfigError, Error, Result};
pub use http::{Handler, Http};
pub use listener::Listener;
pub use process::{GRACEFUL_ENV, INHERITED_FD};
pub use server::{Handle, Server, State};
pub use tls::{TlsListener, load_tls_config};

/// Log through the `log` crate with this process's pid in front, so the
/// output of two generations sharing a terminal can be told apart.
macro_rules! log_pid {
    ($level:ident, $($arg:tt)+) => {
        ::log::$level!("[pid {}] {}", ::std::process::id(), format_args!($($arg)+))
    };
}
pub(crate) use log_pid;

/// Serve plain HTTP on `addr` with default settings until shut down.
pub async fn listen_and_serve<H: Handler>(addr: impl Into<String>, handler: H) -> Result<()> {
    Server::http(Config::new(addr), handler)
        .listen_and_serve()
        .await
}

/// Serve HTTPS on `addr` with the given certificate chain and private key
/// (both PEM) until shut down.
pub async fn listen_and_serve_tls<H: Handler>(
    addr: impl Into<String>,
    cert_path: impl Into<PathBuf>,
    key_path: impl Into<PathBuf>,
    handler: H,
) -> Result<()> {
    let config = Config {
        tls_cert_path: Some(cert_path.into()),
        tls_key_path: Some(key_path.into()),
        ..Config::new(addr)
    };
    Server::http(config, handler).listen_and_serve().await
}
