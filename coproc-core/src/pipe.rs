// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Raw duplex transport: two unidirectional OS pipes, length-prefixed
//! bincode framing (spec.md §2 Design Notes, §4.3).
//!
//! The source relies on `multiprocessing.Pipe`, a single duplex OS
//! primitive. Rust's `libc::pipe2` only gives unidirectional pipes, so a
//! duplex channel is built from two of them, same as the parent/child fd
//! wiring in a typical `fork`-based worker.

use crate::error::{Error, Result};
use crate::frame::Envelope;
use libc::c_void;
use serde::{de::DeserializeOwned, Serialize};
use std::io;
use std::os::unix::io::RawFd;

fn pipe2_pair() -> Result<(RawFd, RawFd)> {
    let mut fds = [0 as RawFd; 2];
    let ret = unsafe { libc::pipe2(fds.as_mut_ptr(), 0) };
    if ret != 0 {
        return Err(Error::Os(io::Error::last_os_error()));
    }
    Ok((fds[0], fds[1]))
}

fn set_nonblocking(fd: RawFd) -> Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags < 0 {
            return Err(Error::Os(io::Error::last_os_error()));
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(Error::Os(io::Error::last_os_error()));
        }
    }
    Ok(())
}

fn write_all(fd: RawFd, mut buf: &[u8]) -> Result<()> {
    while !buf.is_empty() {
        let n = unsafe { libc::write(fd, buf.as_ptr() as *const c_void, buf.len()) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(Error::Os(err));
        }
        buf = &buf[n as usize..];
    }
    Ok(())
}

/// One endpoint of a duplex pipe: a blocking write side and a
/// non-blocking read side, deliberately kept without `O_CLOEXEC` so a
/// `LaunchMode::Spawn` child can inherit the fd across `exec`.
pub struct DuplexPipe {
    read_fd: RawFd,
    write_fd: RawFd,
    buf: Vec<u8>,
}

impl DuplexPipe {
    /// Builds two cross-wired endpoints: endpoint A's write side feeds
    /// endpoint B's read side and vice versa.
    pub fn pair() -> Result<(DuplexPipe, DuplexPipe)> {
        let (a_read, a_write) = pipe2_pair()?;
        let (b_read, b_write) = pipe2_pair()?;
        set_nonblocking(a_read)?;
        set_nonblocking(b_read)?;
        let a = DuplexPipe {
            read_fd: a_read,
            write_fd: b_write,
            buf: Vec::new(),
        };
        let b = DuplexPipe {
            read_fd: b_read,
            write_fd: a_write,
            buf: Vec::new(),
        };
        Ok((a, b))
    }

    /// Rebuilds an endpoint from raw fds, used by a `Spawn`-mode child
    /// that inherited them across `exec` via an environment variable
    /// rather than across `fork`'s copied address space.
    pub fn from_raw_fds(read_fd: RawFd, write_fd: RawFd) -> Result<Self> {
        set_nonblocking(read_fd)?;
        Ok(Self {
            read_fd,
            write_fd,
            buf: Vec::new(),
        })
    }

    pub fn read_fd(&self) -> RawFd {
        self.read_fd
    }

    pub fn write_fd(&self) -> RawFd {
        self.write_fd
    }

    fn send_bytes(&self, payload: &[u8]) -> Result<()> {
        let header = (payload.len() as u32).to_le_bytes();
        write_all(self.write_fd, &header)?;
        write_all(self.write_fd, payload)?;
        Ok(())
    }

    /// Drains whatever is currently readable without blocking, then pulls
    /// out every complete length-prefixed frame it can assemble. A
    /// partial frame straddling two drains is held in `self.buf` until
    /// the rest arrives.
    fn try_recv_all_bytes(&mut self) -> Result<Vec<Vec<u8>>> {
        self.fill_buf()?;
        let mut frames = Vec::new();
        loop {
            if self.buf.len() < 4 {
                break;
            }
            let len = u32::from_le_bytes(self.buf[0..4].try_into().unwrap()) as usize;
            if self.buf.len() < 4 + len {
                break;
            }
            frames.push(self.buf[4..4 + len].to_vec());
            self.buf.drain(0..4 + len);
        }
        Ok(frames)
    }

    fn fill_buf(&mut self) -> Result<()> {
        let mut chunk = [0u8; 4096];
        loop {
            let n = unsafe {
                libc::read(self.read_fd, chunk.as_mut_ptr() as *mut c_void, chunk.len())
            };
            if n > 0 {
                self.buf.extend_from_slice(&chunk[..n as usize]);
                continue;
            } else if n == 0 {
                // Peer's write side is closed (process exited without
                // sending CLOSE/ERROR). Treated the same as "no data
                // right now": detecting a dead worker is `is_alive`'s
                // job, not the transport's, so complete frames already
                // buffered still decode normally and a drain never
                // errors merely because the peer is gone.
                return Ok(());
            } else {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::WouldBlock {
                    return Ok(());
                }
                return Err(Error::Os(err));
            }
        }
    }

    /// Serializes `envelope` with bincode and writes it length-prefixed.
    pub fn send_envelope<T: Serialize, C: Serialize>(
        &self,
        envelope: &Envelope<T, C>,
    ) -> Result<()> {
        let bytes = bincode::serialize(envelope)?;
        self.send_bytes(&bytes)
    }

    /// Non-blocking: returns every envelope that could be fully read and
    /// decoded right now, in wire order.
    pub fn try_recv_envelopes<T, C>(&mut self) -> Result<Vec<Envelope<T, C>>>
    where
        T: DeserializeOwned,
        C: DeserializeOwned,
    {
        let raw = self.try_recv_all_bytes()?;
        raw.into_iter()
            .map(|bytes| bincode::deserialize(&bytes).map_err(Error::from))
            .collect()
    }
}

impl Drop for DuplexPipe {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.read_fd);
            libc::close(self.write_fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Ping(u32);

    #[test]
    fn round_trips_an_envelope_through_the_pair() {
        let (a, mut b) = DuplexPipe::pair().unwrap();
        let env = Envelope::new((), crate::frame::Frame::data(Ping(7), false, false));
        a.send_envelope(&env).unwrap();
        let received: Vec<Envelope<Ping, ()>> = b.try_recv_envelopes().unwrap();
        assert_eq!(received.len(), 1);
        match &received[0].frame {
            crate::frame::Frame::Data { payload, .. } => assert_eq!(payload, &Ping(7)),
            _ => panic!("expected Data frame"),
        }
    }

    #[test]
    fn try_recv_is_empty_when_nothing_was_sent() {
        let (_a, mut b) = DuplexPipe::pair().unwrap();
        let received: Vec<Envelope<Ping, ()>> = b.try_recv_envelopes().unwrap();
        assert!(received.is_empty());
    }

    #[test]
    fn drain_sees_multiple_queued_frames_in_order() {
        let (a, mut b) = DuplexPipe::pair().unwrap();
        for i in 0..3u32 {
            let env = Envelope::new((), crate::frame::Frame::data(Ping(i), false, false));
            a.send_envelope(&env).unwrap();
        }
        let received: Vec<Envelope<Ping, ()>> = b.try_recv_envelopes().unwrap();
        let values: Vec<u32> = received
            .into_iter()
            .map(|e| match e.frame {
                crate::frame::Frame::Data { payload, .. } => payload.0,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(values, vec![0, 1, 2]);
    }
}
