// SPDX-License-Identifier: MIT

//! Passing the listening socket from one process generation to the next.
//!
//! The parent starts a copy of itself with the socket at descriptor
//! [`INHERITED_FD`] and [`GRACEFUL_ENV`] set. The child finds the variable and
//! rebuilds its listener from that descriptor instead of binding, so the
//! socket is never unbound between the two generations.

use std::env;
use std::ffi::{OsStr, OsString};
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::process::Command;

use nix::fcntl::{FcntlArg, FdFlag, fcntl};
use nix::sys::socket::{SockType, getsockopt, sockopt};

/// Set (non-empty) in the environment of a child that inherits its socket.
pub const GRACEFUL_ENV: &str = "IS_GRACEFUL";

/// Descriptor at which a child finds the inherited listening socket: the
/// first one after stdin, stdout and stderr.
pub const INHERITED_FD: RawFd = 3;

/// Whether this process was started by a parent handing over its socket.
pub fn is_inherited() -> bool {
    marks_inherited(env::var_os(GRACEFUL_ENV).as_deref())
}

fn marks_inherited(value: Option<&OsStr>) -> bool {
    value.is_some_and(|v| !v.is_empty())
}

/// Check that `fd` is a listening stream socket.
pub fn validate_listener(fd: BorrowedFd<'_>) -> io::Result<()> {
    let sock_type = getsockopt(&fd, sockopt::SockType)?;
    if sock_type != SockType::Stream {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("expected a stream socket, found {sock_type:?}"),
        ));
    }
    #[cfg(target_os = "linux")]
    if !getsockopt(&fd, sockopt::AcceptConn)? {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "socket is not listening",
        ));
    }
    Ok(())
}

/// Take ownership of the listening socket at [`INHERITED_FD`].
///
/// The descriptor is validated before it is adopted; if it is not a
/// listening socket it is left untouched.
#[allow(unsafe_code)]
pub fn inherit_listener() -> io::Result<std::net::TcpListener> {
    // SAFETY: the borrow only lives for the validation below, which fails
    // with EBADF if nothing is open at this descriptor.
    let borrowed = unsafe { BorrowedFd::borrow_raw(INHERITED_FD) };
    validate_listener(borrowed)?;

    // SAFETY: the descriptor was placed here for us by the parent and has
    // just been checked to be a listening socket. Nothing else in this
    // process owns it.
    let fd = unsafe { OwnedFd::from_raw_fd(INHERITED_FD) };
    // The exec that gave it to us cleared close-on-exec; set it again so it
    // does not leak into unrelated subprocesses.
    fcntl(&fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;

    let listener = std::net::TcpListener::from(fd);
    // Rejects non-IP sockets.
    listener.local_addr()?;
    Ok(listener)
}

/// The environment for the next generation: ours, with exactly one
/// `IS_GRACEFUL=1` entry.
pub fn child_environment(
    vars: impl IntoIterator<Item = (OsString, OsString)>,
) -> Vec<(OsString, OsString)> {
    let mut envs: Vec<_> = vars
        .into_iter()
        .filter(|(key, _)| key != GRACEFUL_ENV)
        .collect();
    envs.push((GRACEFUL_ENV.into(), "1".into()));
    envs
}

/// If [`INHERITED_FD`] is free in this process, move `fd` there.
///
/// Otherwise descriptors the standard library opens while spawning (the
/// exec error pipe) could take that slot, and the `dup2` in the child
/// would replace them.
#[allow(unsafe_code)]
fn claim_inherited_slot(fd: OwnedFd) -> io::Result<OwnedFd> {
    if fd.as_raw_fd() == INHERITED_FD {
        return Ok(fd);
    }
    // SAFETY: F_GETFD only inspects the descriptor table.
    if unsafe { libc::fcntl(INHERITED_FD, libc::F_GETFD) } != -1 {
        return Ok(fd);
    }
    // Lowest free descriptor >= 3, i.e. 3 unless another thread just took it.
    let moved = fcntl(&fd, FcntlArg::F_DUPFD_CLOEXEC(INHERITED_FD))?;
    // SAFETY: fcntl just created this descriptor and nothing else owns it.
    Ok(unsafe { OwnedFd::from_raw_fd(moved) })
}

/// Start `program` with the listening socket `listener_fd` at
/// [`INHERITED_FD`], stdio inherited and the environment from
/// [`child_environment`].
///
/// `listener_fd` is closed in this process once the child has been started.
#[allow(unsafe_code)]
pub fn spawn_with_listener(
    program: &OsStr,
    args: impl IntoIterator<Item = OsString>,
    listener_fd: OwnedFd,
) -> io::Result<tokio::process::Child> {
    use std::os::unix::process::CommandExt;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .env_clear()
        .envs(child_environment(env::vars_os()));

    let listener_fd = claim_inherited_slot(listener_fd)?;
    let raw = listener_fd.as_fd().as_raw_fd();
    // SAFETY: the hook runs in the forked child before exec and only calls
    // dup2(2) and fcntl(2), both async-signal-safe.
    unsafe {
        cmd.pre_exec(move || {
            if raw == INHERITED_FD {
                // dup2 onto itself would keep close-on-exec set.
                if libc::fcntl(raw, libc::F_SETFD, 0) == -1 {
                    return Err(io::Error::last_os_error());
                }
            } else if libc::dup2(raw, INHERITED_FD) == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    // Converting keeps the pre_exec hook and lets tokio reap the child if it
    // exits while we are still draining.
    let child = tokio::process::Command::from(cmd).spawn()?;
    drop(listener_fd);
    Ok(child)
}

/// Start a copy of the current process (same `argv[0]` and arguments)
/// that inherits `listener_fd`. Returns the child's pid.
pub fn spawn_successor(listener_fd: OwnedFd) -> io::Result<u32> {
    let mut args = env::args_os();
    let program = args
        .next()
        .ok_or_else(|| io::Error::other("cannot determine own executable: argv is empty"))?;
    let child = spawn_with_listener(&program, args, listener_fd)?;
    child
        .id()
        .ok_or_else(|| io::Error::other("new process exited immediately"))
}
