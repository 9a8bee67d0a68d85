// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Process creation and lifecycle control (spec.md §2 Design Notes, §4.4).
//!
//! The source ships a closure to a worker process for free via
//! `multiprocessing`'s pickling. Rust has no equivalent, so two modes are
//! offered instead, both named in the Design Notes:
//!
//! - [`LaunchMode::Fork`]: `libc::fork()`. Copy-on-write memory means the
//!   child already has the closure resident — no serialization needed.
//!   This is the default.
//! - [`LaunchMode::Spawn`]: re-exec the current binary and look the
//!   worker body up in a small static [`registry`] of named entry
//!   points, the "indexed registry" alternative.

use crate::error::{Error, Result};
use crate::pipe::DuplexPipe;
use libc::pid_t;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// `fork()` the current process; the child runs the supplied closure
    /// directly. Cheapest, and the platform default on Unix.
    Fork,
    /// Re-exec the current binary as a named [`registry`] worker slot.
    Spawn,
}

impl Default for LaunchMode {
    fn default() -> Self {
        LaunchMode::Fork
    }
}

pub const SLOT_ENV_VAR: &str = "COPROC_WORKER_SLOT";
pub const READ_FD_ENV_VAR: &str = "COPROC_WORKER_READ_FD";
pub const WRITE_FD_ENV_VAR: &str = "COPROC_WORKER_WRITE_FD";

pub type WorkerEntryPoint = fn(RawFd, RawFd);

static REGISTRY: Lazy<Mutex<HashMap<&'static str, WorkerEntryPoint>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Registers `entry` under `name` for [`LaunchMode::Spawn`]. Call during
/// startup, before [`dispatch_if_worker`], for every named worker body
/// the process may be re-exec'd to run.
pub fn register(name: &'static str, entry: WorkerEntryPoint) {
    REGISTRY.lock().unwrap().insert(name, entry);
}

/// Call at the very top of `main()`, before any other setup. If this
/// process was re-exec'd as a worker slot, runs that slot's entry point
/// to completion and exits; otherwise returns so `main` proceeds as the
/// supervisor.
pub fn dispatch_if_worker() {
    let Ok(slot) = std::env::var(SLOT_ENV_VAR) else {
        return;
    };
    let read_fd: RawFd = std::env::var(READ_FD_ENV_VAR)
        .ok()
        .and_then(|s| s.parse().ok())
        .expect("COPROC_WORKER_READ_FD missing or invalid");
    let write_fd: RawFd = std::env::var(WRITE_FD_ENV_VAR)
        .ok()
        .and_then(|s| s.parse().ok())
        .expect("COPROC_WORKER_WRITE_FD missing or invalid");
    let entry = {
        let registry = REGISTRY.lock().unwrap();
        *registry
            .get(slot.as_str())
            .unwrap_or_else(|| panic!("unregistered worker slot {slot:?}"))
    };
    debug!(slot = %slot, read_fd, write_fd, "dispatching spawned worker slot");
    entry(read_fd, write_fd);
    std::process::exit(0);
}

/// Forks the current process. The child runs `job(child_end)` and exits;
/// the parent drops its copy of `child_end` and returns the child pid.
pub fn fork_worker<F>(child_end: DuplexPipe, job: F) -> Result<pid_t>
where
    F: FnOnce(DuplexPipe),
{
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(Error::Os(io::Error::last_os_error()));
    }
    if pid == 0 {
        job(child_end);
        std::process::exit(0);
    }
    drop(child_end);
    Ok(pid)
}

/// Re-execs the current binary with `slot` and `child_end`'s fds passed
/// via environment variables, then drops the parent's copy of those fds.
pub fn spawn_worker(slot: &'static str, child_end: DuplexPipe) -> Result<pid_t> {
    let exe = std::env::current_exe().map_err(Error::Os)?;
    let child = std::process::Command::new(exe)
        .env(SLOT_ENV_VAR, slot)
        .env(READ_FD_ENV_VAR, child_end.read_fd().to_string())
        .env(WRITE_FD_ENV_VAR, child_end.write_fd().to_string())
        .spawn()
        .map_err(Error::Os)?;
    let pid = child.id() as pid_t;
    drop(child_end);
    Ok(pid)
}

/// Non-blocking liveness check: reaps `pid` if it has already exited.
pub fn has_exited(pid: pid_t) -> Result<bool> {
    let mut status: i32 = 0;
    let ret = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
    match ret {
        0 => Ok(false),
        n if n == pid => Ok(true),
        _ => Err(Error::Os(io::Error::last_os_error())),
    }
}

/// Blocks until `pid` exits, reaping it.
pub fn wait_blocking(pid: pid_t) -> Result<()> {
    let mut status: i32 = 0;
    let ret = unsafe { libc::waitpid(pid, &mut status, 0) };
    if ret < 0 {
        return Err(Error::Os(io::Error::last_os_error()));
    }
    Ok(())
}

fn send_signal(pid: pid_t, signal: i32) -> Result<()> {
    let ret = unsafe { libc::kill(pid, signal) };
    if ret != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            warn!(pid, "signal target already gone");
            return Ok(());
        }
        return Err(Error::Os(err));
    }
    Ok(())
}

pub fn terminate(pid: pid_t) -> Result<()> {
    send_signal(pid, libc::SIGTERM)
}

pub fn kill_hard(pid: pid_t) -> Result<()> {
    send_signal(pid, libc::SIGKILL)
}
