// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Single-worker process lifecycle: `NEW -> ALIVE -> DEAD` (spec.md §4.4).
//!
//! Grounded on the source's two historical resource implementations,
//! `concurrent/resourse/workerresource.py` and `conproc/workerresource.py`:
//! both wrap a spawned process and its messenger behind start/join/
//! terminate, refusing to double-start a live resource or act on a
//! worker that was never started.

use crate::error::{Error, LifecycleError, Result};
use crate::launch;
use crate::messenger::Messenger;
use crate::pipe::DuplexPipe;
use crate::queue::Queue;
use libc::pid_t;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::hash::Hash;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    New,
    Alive,
    Dead,
}

/// Owns one worker process and the messenger connected to it.
pub struct WorkerResource<T, C, Q> {
    state: State,
    pid: Option<pid_t>,
    messenger: Option<Messenger<T, C, Q>>,
}

impl<T, C, Q> WorkerResource<T, C, Q>
where
    T: Serialize + DeserializeOwned,
    C: Eq + Hash + Clone + Serialize + DeserializeOwned,
    Q: Queue<T, C> + Default,
{
    pub fn new() -> Self {
        Self {
            state: State::New,
            pid: None,
            messenger: None,
        }
    }

    /// `LaunchMode::Fork`: forks the process and runs `job` with the
    /// child's messenger end. `job` never returns to the caller's
    /// control flow — the child process exits when it does.
    pub fn start<F>(&mut self, job: F) -> Result<()>
    where
        F: FnOnce(Messenger<T, C, Q>) + 'static,
    {
        self.check_not_alive()?;
        let (parent_pipe, child_pipe) = DuplexPipe::pair()?;
        let pid = launch::fork_worker(child_pipe, move |pipe| {
            job(Messenger::from_pipe(pipe));
        })?;
        debug!(pid, "forked worker");
        self.pid = Some(pid);
        self.messenger = Some(Messenger::from_pipe(parent_pipe));
        self.state = State::Alive;
        Ok(())
    }

    /// `LaunchMode::Spawn`: re-execs the current binary as the named
    /// worker `slot`, previously registered with [`launch::register`].
    pub fn start_spawned(&mut self, slot: &'static str) -> Result<()> {
        self.check_not_alive()?;
        let (parent_pipe, child_pipe) = DuplexPipe::pair()?;
        let pid = launch::spawn_worker(slot, child_pipe)?;
        debug!(pid, slot, "spawned worker");
        self.pid = Some(pid);
        self.messenger = Some(Messenger::from_pipe(parent_pipe));
        self.state = State::Alive;
        Ok(())
    }

    fn check_not_alive(&self) -> Result<()> {
        if self.state == State::Alive {
            return Err(Error::Lifecycle(LifecycleError::AlreadyAlive));
        }
        Ok(())
    }

    /// Polls the OS for exit without blocking, transitioning to `DEAD`
    /// the moment the process is reaped.
    pub fn is_alive(&mut self) -> Result<bool> {
        match self.state {
            State::Alive => {
                let pid = self.pid.expect("ALIVE state always carries a pid");
                if launch::has_exited(pid)? {
                    debug!(pid, "worker process exited");
                    self.state = State::Dead;
                    Ok(false)
                } else {
                    Ok(true)
                }
            }
            _ => Ok(false),
        }
    }

    pub fn pid(&self) -> Result<pid_t> {
        self.pid.ok_or(Error::WorkerIsDead)
    }

    pub fn messenger(&self) -> Result<&Messenger<T, C, Q>> {
        self.messenger.as_ref().ok_or(Error::WorkerIsDead)
    }

    pub fn messenger_mut(&mut self) -> Result<&mut Messenger<T, C, Q>> {
        self.messenger.as_mut().ok_or(Error::WorkerIsDead)
    }

    /// Wraps `self` in an RAII guard that force-terminates the worker
    /// (ignoring whether it was already dead) when the guard drops.
    pub fn scoped(&mut self) -> Scoped<'_, T, C, Q> {
        Scoped { resource: self }
    }
}

impl<T, C, Q> WorkerResource<T, C, Q>
where
    T: Serialize + DeserializeOwned,
    C: Eq + Hash + Clone + Serialize + DeserializeOwned + Default,
    Q: Queue<T, C> + Default,
{
    /// Blocks until the worker process exits, reaping it. First drains
    /// the messenger on the default channel so a buffered `ERROR` frame
    /// surfaces synchronously, then sends `CLOSE` so a well-behaved
    /// worker gets a chance to exit on its own before the wait. If
    /// `check_alive` is true, erroring out on a resource that was never
    /// started or is already dead rather than treating it as a no-op —
    /// matches the source's strict/lenient variants.
    pub fn join(&mut self, check_alive: bool) -> Result<()> {
        match self.state {
            State::New | State::Dead if check_alive => {
                Err(Error::Lifecycle(LifecycleError::AlreadyDead))
            }
            State::New | State::Dead => Ok(()),
            State::Alive => {
                let pid = self.pid.expect("ALIVE state always carries a pid");
                let messenger = self
                    .messenger
                    .as_mut()
                    .expect("ALIVE state always carries a messenger");
                let default_channel = C::default();
                messenger.receive_available(&default_channel)?;
                let _ = messenger.send_close(default_channel);
                launch::wait_blocking(pid)?;
                self.state = State::Dead;
                Ok(())
            }
        }
    }

    /// Requests the worker exit (`CLOSE` best-effort, then `SIGTERM`) and
    /// blocks until it does. If `check_alive` is true, erroring out on a
    /// resource that was never started or is already dead rather than
    /// treating it as a no-op — matches the source's strict/lenient
    /// terminate variants.
    pub fn terminate(&mut self, check_alive: bool) -> Result<()> {
        match self.state {
            State::New | State::Dead if check_alive => {
                Err(Error::Lifecycle(LifecycleError::AlreadyDead))
            }
            State::New | State::Dead => Ok(()),
            State::Alive => {
                let pid = self.pid.expect("ALIVE state always carries a pid");
                let _ = self
                    .messenger_mut()
                    .and_then(|m| m.send_close(C::default()));
                if let Err(err) = launch::terminate(pid) {
                    warn!(pid, %err, "SIGTERM failed, escalating to SIGKILL");
                    launch::kill_hard(pid)?;
                }
                launch::wait_blocking(pid)?;
                self.state = State::Dead;
                Ok(())
            }
        }
    }
}

impl<T, C, Q> Default for WorkerResource<T, C, Q>
where
    T: Serialize + DeserializeOwned,
    C: Eq + Hash + Clone + Serialize + DeserializeOwned,
    Q: Queue<T, C> + Default,
{
    fn default() -> Self {
        Self::new()
    }
}

/// RAII scope over a [`WorkerResource`]: guarantees the worker process
/// is signaled and reaped even if the caller returns early or panics.
pub struct Scoped<'a, T, C, Q> {
    resource: &'a mut WorkerResource<T, C, Q>,
}

impl<T, C, Q> std::ops::Deref for Scoped<'_, T, C, Q> {
    type Target = WorkerResource<T, C, Q>;
    fn deref(&self) -> &Self::Target {
        self.resource
    }
}

impl<T, C, Q> std::ops::DerefMut for Scoped<'_, T, C, Q> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.resource
    }
}

impl<T, C, Q> Drop for Scoped<'_, T, C, Q>
where
    T: Serialize + DeserializeOwned,
    C: Eq + Hash + Clone + Serialize + DeserializeOwned + Default,
    Q: Queue<T, C> + Default,
{
    fn drop(&mut self) {
        let _ = self.resource.terminate(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::FifoQueue;

    type TestResource = WorkerResource<u32, (), FifoQueue<u32, ()>>;

    #[test]
    fn new_resource_has_no_pid() {
        let resource = TestResource::new();
        assert!(resource.pid().is_err());
    }

    #[test]
    fn double_start_is_rejected() {
        let mut resource = TestResource::new();
        resource.start(|_messenger| {}).unwrap();
        let err = resource.start(|_messenger| {}).unwrap_err();
        assert!(matches!(
            err,
            Error::Lifecycle(LifecycleError::AlreadyAlive)
        ));
        resource.terminate(true).unwrap();
    }

    #[test]
    fn start_then_join_reaps_the_child() {
        let mut resource = TestResource::new();
        resource
            .start(|mut messenger| {
                let _ = messenger.send((), 42);
            })
            .unwrap();
        resource.join(false).unwrap();
        assert!(!resource.is_alive().unwrap());
    }

    #[test]
    fn terminate_strict_on_never_started_errors() {
        let mut resource = TestResource::new();
        let err = resource.terminate(true).unwrap_err();
        assert!(matches!(err, Error::Lifecycle(LifecycleError::AlreadyDead)));
    }
}
