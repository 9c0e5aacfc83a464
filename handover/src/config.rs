// SPDX-License-Identifier: MIT

use std::fmt;
use std::fs::read_to_string;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use nix::sys::signal::Signal;
use serde::{Deserialize, Deserializer};

use crate::error::{ConfigError, Result};

pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_WRITE_TIMEOUT: Duration = DEFAULT_READ_TIMEOUT;

fn default_bind() -> String {
    "[::]:8080".into()
}

fn default_timeout() -> Duration {
    DEFAULT_READ_TIMEOUT
}

fn default_shutdown_signals() -> Vec<SignalName> {
    vec![SignalName(Signal::SIGTERM), SignalName(Signal::SIGINT)]
}

fn default_restart_signal() -> SignalName {
    SignalName(Signal::SIGUSR2)
}

fn seconds<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_secs)
}

fn optional_seconds<'de, D>(deserializer: D) -> std::result::Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_secs))
}

/// A signal given by name in the configuration, e.g. `"SIGUSR2"` or `"HUP"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct SignalName(pub Signal);

impl FromStr for SignalName {
    type Err = ConfigError;

    fn from_str(name: &str) -> std::result::Result<Self, Self::Err> {
        let upper = name.trim().to_ascii_uppercase();
        let full = if upper.starts_with("SIG") {
            upper
        } else {
            format!("SIG{upper}")
        };
        Signal::from_str(&full)
            .map(SignalName)
            .map_err(|_| ConfigError::InvalidSignal {
                name: name.to_string(),
            })
    }
}

impl TryFrom<String> for SignalName {
    type Error = ConfigError;

    fn try_from(name: String) -> std::result::Result<Self, Self::Error> {
        name.parse()
    }
}

impl fmt::Display for SignalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Address to bind when the listener is not inherited. An empty string
    /// means all interfaces on the scheme's default port.
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_timeout", deserialize_with = "seconds")]
    pub read_timeout: Duration,
    #[serde(default = "default_timeout", deserialize_with = "seconds")]
    pub write_timeout: Duration,

    #[serde(default)]
    pub tls_cert_path: Option<PathBuf>,
    #[serde(default)]
    pub tls_key_path: Option<PathBuf>,

    #[serde(default = "default_shutdown_signals")]
    pub shutdown_signals: Vec<SignalName>,
    #[serde(default = "default_restart_signal")]
    pub restart_signal: SignalName,

    /// Upper bound on how long to wait for accepted connections after the
    /// listener closed. Unset means wait for as long as it takes.
    #[serde(default, deserialize_with = "optional_seconds")]
    pub drain_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            tls_cert_path: None,
            tls_key_path: None,
            shutdown_signals: default_shutdown_signals(),
            restart_signal: default_restart_signal(),
            drain_timeout: None,
        }
    }
}

impl Config {
    pub fn new(bind: impl Into<String>) -> Self {
        Self {
            bind: bind.into(),
            ..Default::default()
        }
    }

    pub fn from_file(settings_file: &Path) -> Result<Config> {
        let contents = read_to_string(settings_file).map_err(|e| ConfigError::ReadFile {
            path: settings_file.display().to_string(),
            source: e,
        })?;
        let config: Config = toml::from_str(&contents).map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tls_cert_path.is_some() != self.tls_key_path.is_some() {
            return Err(ConfigError::Invalid {
                reason: "tls_cert_path and tls_key_path must be set together".to_string(),
            }
            .into());
        }
        if self.shutdown_signals.contains(&self.restart_signal) {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "{} cannot be both a shutdown and a restart signal",
                    self.restart_signal
                ),
            }
            .into());
        }
        if self.read_timeout.is_zero() || self.write_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                reason: "read_timeout and write_timeout must be greater than 0".to_string(),
            }
            .into());
        }
        Ok(())
    }

    pub fn tls_paths(&self) -> Option<(&Path, &Path)> {
        match (&self.tls_cert_path, &self.tls_key_path) {
            (Some(cert), Some(key)) => Some((cert, key)),
            _ => None,
        }
    }

    /// The address to bind, with the empty string mapped to the default
    /// HTTP or HTTPS port.
    pub fn bind_addr(&self) -> &str {
        match (self.bind.is_empty(), self.tls_paths().is_some()) {
            (false, _) => &self.bind,
            (true, false) => "0.0.0.0:80",
            (true, true) => "0.0.0.0:443",
        }
    }
}
