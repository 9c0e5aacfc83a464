// SPDX-License-Identifier: MIT

// Rust doesn't see that this is used in test binaries, so we need to allow dead code
#![allow(dead_code)]

use std::process::{Child, Command};
use std::time::Duration;

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{sleep, timeout};

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

/// Pick an unused port on localhost
pub fn pick_unused_port() -> Option<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").ok()?;
    let port = listener.local_addr().ok()?.port();
    drop(listener);
    Some(port)
}

pub fn write_toml_config(content: &str) -> Result<NamedTempFile> {
    use std::io::Write;
    let mut file = NamedTempFile::new()?;
    write!(file, "{content}")?;
    file.flush()?;
    Ok(file)
}

/// A demo process listening on `port`, stopped with SIGTERM when dropped.
pub struct Demo {
    pub port: u16,
    pub process: ProcessGuard,
    _config_file: NamedTempFile,
}

impl Demo {
    pub async fn start() -> Result<Demo> {
        let port = pick_unused_port().ok_or("no free port")?;
        let config_file = write_toml_config(&format!("bind = \"127.0.0.1:{port}\"\n"))?;

        let child = Command::new(env!("CARGO_BIN_EXE_handover-demo"))
            .env("CONFIG_FILE", config_file.path())
            .env("RUST_LOG", "debug")
            .spawn()?;
        let pid = child.id();
        println!("Started handover-demo process with PID: {pid}");
        let process = ProcessGuard::new(child);

        wait_for_service(port, pid, Duration::from_secs(30)).await?;
        Ok(Demo {
            port,
            process,
            _config_file: config_file,
        })
    }

    pub fn pid(&self) -> u32 {
        self.process.pid()
    }
}

pub fn send_signal(pid: u32, signal: Signal) -> Result<()> {
    kill(Pid::from_raw(pid as i32), signal)?;
    Ok(())
}

pub fn is_running(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

async fn wait_for_service(port: u16, pid: u32, timeout_duration: Duration) -> Result<()> {
    timeout(timeout_duration, async {
        loop {
            if !is_running(pid) {
                return Err(
                    format!("Process {pid} died while waiting for service to start").into(),
                );
            }
            if tokio::net::TcpStream::connect(("127.0.0.1", port))
                .await
                .is_ok()
            {
                return Ok(());
            }
            sleep(Duration::from_millis(100)).await;
        }
    })
    .await
    .map_err(|_| -> Box<dyn std::error::Error> {
        format!("Timeout waiting for service (PID {pid}) on port {port}").into()
    })?
}

/// Wait until connecting to `port` is refused.
pub async fn wait_until_refused(port: u16, timeout_duration: Duration) -> Result<()> {
    timeout(timeout_duration, async {
        loop {
            match tokio::net::TcpStream::connect(("127.0.0.1", port)).await {
                Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => return,
                _ => sleep(Duration::from_millis(50)).await,
            }
        }
    })
    .await
    .map_err(|_| format!("port {port} still accepts connections").into())
}

/// `GET path` with `Connection: close`; returns status and body.
pub async fn get(port: u16, path: &str) -> Result<(u16, String)> {
    let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port)).await?;
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await?;

    let response = String::from_utf8(response)?;
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

/// The pid at the end of a `/sleep/` response.
pub fn responder_pid(body: &str) -> Option<u32> {
    body.trim_end()
        .strip_suffix('.')?
        .rsplit(' ')
        .next()?
        .parse()
        .ok()
}

pub struct ProcessGuard {
    child: Option<Child>,
}

impl ProcessGuard {
    pub fn new(child: Child) -> Self {
        Self { child: Some(child) }
    }

    pub fn pid(&self) -> u32 {
        self.child.as_ref().map_or(0, Child::id)
    }

    /// Wait for the process to exit on its own and return its exit code.
    pub async fn wait_exit(&mut self, timeout_duration: Duration) -> Result<Option<i32>> {
        let child = self.child.as_mut().ok_or("process already reaped")?;
        let status = timeout(timeout_duration, async {
            loop {
                if let Some(status) = child.try_wait()? {
                    return Ok::<_, std::io::Error>(status);
                }
                sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .map_err(|_| "process did not exit in time")??;
        self.child = None;
        Ok(status.code())
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            // SIGTERM so the server drains instead of dying mid-request
            let _ = send_signal(child.id(), Signal::SIGTERM);

            for _ in 0..50 {
                match child.try_wait() {
                    Ok(Some(_)) => return,
                    Ok(None) => std::thread::sleep(Duration::from_millis(100)),
                    Err(_) => break,
                }
            }

            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Terminates a process that is not our child (e.g. a successor started by
/// the demo itself) when dropped.
pub struct PidGuard(pub u32);

impl Drop for PidGuard {
    fn drop(&mut self) {
        let _ = send_signal(self.0, Signal::SIGTERM);
        for _ in 0..50 {
            if !is_running(self.0) {
                return;
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        let _ = send_signal(self.0, Signal::SIGKILL);
    }
}
