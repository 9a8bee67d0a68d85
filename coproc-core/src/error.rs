// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for the messenger/resource/pool core (spec.md §7).

use std::fmt;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// The value carried by an `ERROR` frame.
///
/// A real `Box<dyn std::error::Error>` can't cross the wire, so the
/// sender's `Display` output is captured instead.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct WireError {
    pub message: String,
}

impl WireError {
    pub fn new(err: &(dyn std::error::Error + 'static)) -> Self {
        Self {
            message: err.to_string(),
        }
    }

    pub fn from_display(value: impl fmt::Display) -> Self {
        Self {
            message: value.to_string(),
        }
    }
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for WireError {}

/// Every way a `Messenger`, `WorkerResource`, or pool operation can fail.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Pipe read/write failed, or the peer process exited unexpectedly.
    #[error("transport broken: {0}")]
    TransportBroken(String),

    /// A `CLOSE` frame was read from the peer at a receive call.
    #[error("peer requested close")]
    ResourceRequestedClose,

    /// An `ERROR` frame was read from the peer at a receive call.
    #[error("peer reported error: {0}")]
    PeerError(#[from] WireError),

    /// `start()` on an ALIVE resource, or `join`/`terminate` on a DEAD one
    /// with `check_alive = true`.
    #[error("lifecycle violation: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// `.messenger()`/`.pid()` accessed on a NEW/DEAD resource.
    #[error("worker is dead: resource has no live process or messenger")]
    WorkerIsDead,

    /// A frame tag didn't decode to any known variant.
    #[error("unknown frame kind (decode error): {0}")]
    UnknownFrame(String),

    /// (de)serialization of a payload or frame failed.
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    /// A raw OS call (`fork`, `pipe2`, `waitpid`, `kill`) failed.
    #[error("os error: {0}")]
    Os(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("worker is already alive")]
    AlreadyAlive,
    #[error("worker is already dead")]
    AlreadyDead,
}

impl Error {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::TransportBroken(message.into())
    }
}
