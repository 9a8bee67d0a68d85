// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Channel-multiplexed request/reply messaging over a [`DuplexPipe`]
//! (spec.md §4.3), grounded on the source's `multimessenger.py` (plain
//! flavor) and `prioritymessenger.py` (priority flavor) drain protocol.

use crate::counter::RequestCounter;
use crate::error::{Error, Result, WireError};
use crate::frame::{Envelope, Frame};
use crate::pipe::DuplexPipe;
use crate::queue::{FifoQueue, PriorityQueue, Queue};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::hash::Hash;
use std::marker::PhantomData;
use std::time::Duration;
use tracing::trace;

/// A frame classified off the wire but not yet queued: `Close`/`Error`
/// don't carry a payload for [`Queue`], so they're tracked per channel
/// separately and surfaced the next time that channel is read.
#[derive(Clone, Debug)]
enum ChannelSignal {
    Closed,
    PeerError(WireError),
}

/// One end of a duplex channel-multiplexed pipe.
///
/// Generic over the queue discipline `Q` so the plain (FIFO) and
/// priority flavors share every send/receive primitive and differ only
/// in how queued payloads are ordered (spec.md §4.3: "differ only in the
/// queue implementation"). `T` is the payload type; `C` is the channel
/// tag used to multiplex independent conversations over one pipe.
pub struct Messenger<T, C, Q> {
    pipe: DuplexPipe,
    queue: Q,
    counter: RequestCounter<C>,
    signals: std::collections::HashMap<C, ChannelSignal>,
    _payload: PhantomData<T>,
}

/// Poll interval used by the blocking receive primitives between drains.
/// The source's `multimessenger.py` busy-waits with `time.sleep`; this
/// mirrors that rather than switching to OS-level readiness (`select`),
/// keeping the pipe abstraction a plain non-blocking fd.
const POLL_INTERVAL: Duration = Duration::from_micros(200);

impl<T, C, Q> Messenger<T, C, Q>
where
    T: Serialize + DeserializeOwned,
    C: Eq + Hash + Clone + Serialize + DeserializeOwned,
    Q: Queue<T, C> + Default,
{
    pub(crate) fn from_pipe(pipe: DuplexPipe) -> Self {
        Self {
            pipe,
            queue: Q::default(),
            counter: RequestCounter::new(),
            signals: std::collections::HashMap::new(),
            _payload: PhantomData,
        }
    }

    /// Builds a connected pair sharing one underlying duplex pipe — one
    /// end is kept by the caller, the other handed to a worker process
    /// (spec.md §4.4, used by [`crate::resource::WorkerResource::start`]).
    pub fn pair() -> Result<(Self, Self)> {
        let (a, b) = DuplexPipe::pair()?;
        Ok((Self::from_pipe(a), Self::from_pipe(b)))
    }

    // ---- sending ---------------------------------------------------

    /// Sends a one-way message with no reply expected.
    pub fn send(&mut self, channel: C, payload: T) -> Result<()> {
        let env = Envelope::new(channel.clone(), Frame::data(payload, false, false));
        self.pipe.send_envelope(&env)?;
        self.counter.record_sent(&channel);
        Ok(())
    }

    /// Sends a message flagged as awaiting a reply on `channel`.
    pub fn send_request(&mut self, channel: C, payload: T) -> Result<()> {
        let env = Envelope::new(channel.clone(), Frame::data(payload, true, false));
        self.pipe.send_envelope(&env)?;
        self.counter.record_sent_request(&channel);
        Ok(())
    }

    /// Sends one request per item in `payloads`, in order.
    pub fn send_request_multiple(
        &mut self,
        channel: C,
        payloads: impl IntoIterator<Item = T>,
    ) -> Result<()> {
        for payload in payloads {
            self.send_request(channel.clone(), payload)?;
        }
        Ok(())
    }

    /// Sends a message flagged as the reply to an earlier request.
    pub fn send_reply(&mut self, channel: C, payload: T) -> Result<()> {
        let env = Envelope::new(channel.clone(), Frame::data(payload, false, true));
        self.pipe.send_envelope(&env)?;
        self.counter.record_sent(&channel);
        Ok(())
    }

    /// Tells the peer no further messages are coming on `channel`.
    pub fn send_close(&mut self, channel: C) -> Result<()> {
        let env: Envelope<T, C> = Envelope::new(channel, Frame::Close);
        self.pipe.send_envelope(&env)
    }

    /// Reports a failure to the peer; surfaces as [`Error::PeerError`]
    /// the next time the peer reads `channel`.
    pub fn send_error(&mut self, channel: C, err: &(dyn std::error::Error + 'static)) -> Result<()> {
        let env: Envelope<T, C> = Envelope::new(channel, Frame::Error { cause: WireError::new(err) });
        self.pipe.send_envelope(&env)
    }

    // ---- draining ----------------------------------------------------

    /// Non-blocking: pulls every currently-readable frame off the pipe,
    /// queues `Data` payloads, and records `Close`/`Error` signals per
    /// channel for [`Self::check_signal`] to surface later. Never blocks
    /// and never itself raises `ResourceRequestedClose`/`PeerError` —
    /// those are the calling method's job, since a close on channel A
    /// shouldn't interrupt a caller waiting on channel B.
    fn drain(&mut self) -> Result<usize> {
        let envelopes: Vec<Envelope<T, C>> = self.pipe.try_recv_envelopes()?;
        let count = envelopes.len();
        for env in envelopes {
            match env.frame {
                Frame::Data { payload, is_reply, .. } => {
                    if is_reply {
                        self.counter.record_received_reply(&env.channel);
                    } else {
                        self.counter.record_received(&env.channel);
                    }
                    trace!(is_reply, "queuing received data frame");
                    self.queue.put(payload, env.channel);
                }
                Frame::Close => {
                    self.signals.insert(env.channel, ChannelSignal::Closed);
                }
                Frame::Error { cause } => {
                    self.signals.insert(env.channel, ChannelSignal::PeerError(cause));
                }
            }
        }
        Ok(count)
    }

    fn check_signal(&self, channel: &C) -> Result<()> {
        match self.signals.get(channel) {
            Some(ChannelSignal::Closed) => Err(Error::ResourceRequestedClose),
            Some(ChannelSignal::PeerError(cause)) => Err(Error::PeerError(cause.clone())),
            None => Ok(()),
        }
    }

    // ---- receiving ---------------------------------------------------

    /// Whether a queued payload is ready to read on `channel`, without
    /// draining the pipe first.
    pub fn available(&self, channel: &C) -> bool {
        !self.queue.empty(channel)
    }

    /// Drains the pipe, then returns a queued payload if one is ready;
    /// `None` if `channel`'s queue is still empty after draining.
    pub fn receive_available(&mut self, channel: &C) -> Result<Option<T>> {
        self.drain()?;
        if let Some(item) = self.queue.get(channel) {
            return Ok(Some(item));
        }
        self.check_signal(channel)?;
        Ok(None)
    }

    /// Drains the pipe, then returns every payload currently queued for
    /// `channel` (possibly empty), without blocking for more.
    pub fn receive_remaining(&mut self, channel: &C) -> Result<Vec<T>> {
        self.drain()?;
        let mut items = Vec::with_capacity(self.queue.size(channel));
        while let Some(item) = self.queue.get(channel) {
            items.push(item);
        }
        if items.is_empty() {
            self.check_signal(channel)?;
        }
        Ok(items)
    }

    /// Blocks, polling the pipe, until a payload is queued on `channel`
    /// or the channel is closed/errored.
    pub fn receive_blocking(&mut self, channel: &C) -> Result<T> {
        loop {
            self.drain()?;
            if let Some(item) = self.queue.get(channel) {
                return Ok(item);
            }
            self.check_signal(channel)?;
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Blocks until `channel` specifically has at least one payload
    /// queued, without consuming it.
    pub fn await_channel(&mut self, channel: &C) -> Result<()> {
        loop {
            self.drain()?;
            if self.available(channel) {
                return Ok(());
            }
            self.check_signal(channel)?;
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Blocks until at least one frame of any kind — on any channel, be
    /// it `Data`, `Close`, or `Error` — has been drained off the pipe.
    /// Unlike [`Self::await_channel`], this makes no promise about which
    /// channel produced it, matching spec.md §4.3's channel-agnostic
    /// `await_available`.
    pub fn await_available(&mut self) -> Result<()> {
        loop {
            if self.drain()? > 0 {
                return Ok(());
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    pub fn requests_sent(&self, channel: &C) -> u64 {
        self.counter.requests_sent(channel)
    }

    pub fn replies_received(&self, channel: &C) -> u64 {
        self.counter.replies_received(channel)
    }

    pub fn requests_outstanding(&self, channel: &C) -> u64 {
        self.counter.remaining(channel)
    }
}

/// Plain (FIFO) messenger flavor: no payload bound beyond what the wire
/// needs.
pub type PlainMessenger<T, C> = Messenger<T, C, FifoQueue<T, C>>;

/// Priority messenger flavor: payloads must implement
/// [`crate::frame::Prioritized`] so the queue can order them.
pub type PriorityMessenger<T, C> = Messenger<T, C, PriorityQueue<T, C>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
    struct Echo(String);

    #[test]
    fn send_then_receive_blocking_round_trips() {
        let (mut a, mut b): (PlainMessenger<Echo, String>, _) = Messenger::pair().unwrap();
        a.send("c".to_string(), Echo("hi".into())).unwrap();
        let got = b.receive_blocking(&"c".to_string()).unwrap();
        assert_eq!(got, Echo("hi".into()));
    }

    #[test]
    fn close_surfaces_on_receive() {
        let (mut a, mut b): (PlainMessenger<Echo, String>, _) = Messenger::pair().unwrap();
        a.send_close("c".to_string()).unwrap();
        let err = b.receive_blocking(&"c".to_string()).unwrap_err();
        assert!(matches!(err, Error::ResourceRequestedClose));
    }

    #[test]
    fn error_surfaces_with_cause() {
        let (mut a, mut b): (PlainMessenger<Echo, String>, _) = Messenger::pair().unwrap();
        let cause = Error::transport("boom");
        a.send_error("c".to_string(), &cause).unwrap();
        let err = b.receive_blocking(&"c".to_string()).unwrap_err();
        match err {
            Error::PeerError(wire) => assert!(wire.message.contains("boom")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn receive_available_does_not_block_when_empty() {
        let (_a, mut b): (PlainMessenger<Echo, String>, _) = Messenger::pair().unwrap();
        assert_eq!(b.receive_available(&"c".to_string()).unwrap(), None);
    }

    #[test]
    fn counters_track_requests_and_replies() {
        let (mut a, mut b): (PlainMessenger<Echo, String>, _) = Messenger::pair().unwrap();
        a.send_request("c".to_string(), Echo("req".into())).unwrap();
        assert_eq!(a.requests_sent(&"c".to_string()), 1);
        let _ = b.receive_blocking(&"c".to_string()).unwrap();
        b.send_reply("c".to_string(), Echo("resp".into())).unwrap();
        let _ = a.receive_blocking(&"c".to_string()).unwrap();
        assert_eq!(a.replies_received(&"c".to_string()), 1);
        assert_eq!(a.requests_outstanding(&"c".to_string()), 0);
    }

    #[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
    struct Job {
        priority: f64,
        label: String,
    }

    impl crate::frame::Prioritized for Job {
        fn priority(&self) -> f64 {
            self.priority
        }
    }

    #[test]
    fn priority_flavor_drains_lowest_priority_first() {
        let (mut a, mut b): (PriorityMessenger<Job, String>, _) = Messenger::pair().unwrap();
        a.send(
            "c".to_string(),
            Job {
                priority: 5.0,
                label: "slow".to_string(),
            },
        )
        .unwrap();
        a.send(
            "c".to_string(),
            Job {
                priority: 1.0,
                label: "urgent".to_string(),
            },
        )
        .unwrap();
        b.await_channel(&"c".to_string()).unwrap();
        let first = b.receive_blocking(&"c".to_string()).unwrap();
        assert_eq!(first.label, "urgent");
        let second = b.receive_blocking(&"c".to_string()).unwrap();
        assert_eq!(second.label, "slow");
    }
}
