// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The unit transferred across one pipe endpoint (spec.md §3, §4.3).
//!
//! Replaces the source's "various message classes with an `mtype` enum"
//! with an explicit tagged variant that decoders switch on directly.

use crate::error::WireError;
use serde::{Deserialize, Serialize};

/// `DATA` frames are queued; `CLOSE`/`ERROR` are classified and acted on
/// immediately at drain time and are never queued (spec.md invariant I3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Frame<T> {
    Data {
        payload: T,
        request_reply: bool,
        is_reply: bool,
    },
    Close,
    Error {
        cause: WireError,
    },
}

impl<T> Frame<T> {
    pub fn data(payload: T, request_reply: bool, is_reply: bool) -> Self {
        Self::Data {
            payload,
            request_reply,
            is_reply,
        }
    }
}

/// Every frame carries its channel tag alongside it on the wire so a
/// single duplex pipe can multiplex independent channels. Kept separate
/// from `Frame` so the priority lookup (`Envelope::priority`) doesn't need
/// to know about the `Data`/`Close`/`Error` split.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope<T, C> {
    pub channel: C,
    pub frame: Frame<T>,
}

impl<T, C> Envelope<T, C> {
    pub fn new(channel: C, frame: Frame<T>) -> Self {
        Self { channel, frame }
    }
}

/// A payload's priority: lower values are more urgent.
///
/// spec.md §4.3 describes this as duck-typed ("if the payload provides a
/// numeric `priority` attribute") — Rust has no such probing, so a payload
/// type opts in explicitly with `impl Prioritized for MyPayload {}` (using
/// the default) or overrides `priority()` to read a real field. Payload
/// [`crate::queue::PriorityQueue`] requires `T: Prioritized`; the plain
/// FIFO queue used by the non-priority messenger flavor has no such bound
/// at all, since it never consults a priority.
pub trait Prioritized {
    fn priority(&self) -> f64 {
        f64::INFINITY
    }
}
