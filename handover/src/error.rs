// SPDX-License-Identifier: MIT

use std::os::fd::RawFd;

use nix::sys::signal::Signal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to inherit listener from fd {fd}: {source}")]
    Inherit {
        fd: RawFd,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS setup failed: {reason}")]
    TlsConfig { reason: String },

    #[error("Failed to start new process: {source}")]
    Spawn {
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),

    #[error("Failed to install {signal} handler: {source}")]
    Signal {
        signal: Signal,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Unknown signal name: {name}")]
    InvalidSignal { name: String },

    #[error("Invalid configuration: {reason}")]
    Invalid { reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
