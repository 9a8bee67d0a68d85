// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Supervised, multi-process worker fleets communicating over typed,
//! channel-multiplexed pipes.
//!
//! A [`Messenger`] multiplexes request/reply traffic for many logical
//! channels over one duplex OS pipe; a [`WorkerResource`] owns a single
//! forked or spawned worker process and its messenger; a
//! [`WorkerResourcePool`] keeps a fixed set of workers saturated while
//! running `map`/`map_unordered` over a batch of work.

pub mod counter;
pub mod error;
pub mod frame;
pub mod launch;
pub mod messenger;
pub mod pipe;
pub mod pool;
pub mod queue;
pub mod resource;

pub use error::{Error, LifecycleError, Result, WireError};
pub use frame::{Envelope, Frame, Prioritized};
pub use launch::LaunchMode;
pub use messenger::{Messenger, PlainMessenger, PriorityMessenger};
pub use pool::{MapUnordered, WorkerResourcePool};
pub use queue::{FifoQueue, PriorityQueue, Queue};
pub use resource::{Scoped, WorkerResource};
