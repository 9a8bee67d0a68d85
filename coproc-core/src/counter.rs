// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-channel request/reply/message accounting (spec.md §3, §4.2).
//!
//! Grounded on the source's `requestctr.py`: a messenger tracks, per
//! channel, how many requests it has sent awaiting a reply, and how many
//! messages have crossed in each direction — used by `Messenger::available`
//! and friends to decide whether a blocking receive should keep waiting.

use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    requests_sent: u64,
    replies_received: u64,
    messages_sent: u64,
    messages_received: u64,
}

/// Tracks counters independently per channel `C`.
#[derive(Debug)]
pub struct RequestCounter<C> {
    per_channel: HashMap<C, Counters>,
}

// Written by hand: `#[derive(Default)]` would require `C: Default`.
impl<C> Default for RequestCounter<C> {
    fn default() -> Self {
        Self {
            per_channel: HashMap::new(),
        }
    }
}

impl<C: Eq + Hash + Clone> RequestCounter<C> {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, channel: &C) -> &mut Counters {
        self.per_channel.entry(channel.clone()).or_default()
    }

    pub fn record_sent_request(&mut self, channel: &C) {
        let c = self.entry(channel);
        c.requests_sent += 1;
        c.messages_sent += 1;
    }

    pub fn record_sent(&mut self, channel: &C) {
        self.entry(channel).messages_sent += 1;
    }

    pub fn record_received_reply(&mut self, channel: &C) {
        let c = self.entry(channel);
        c.replies_received += 1;
        c.messages_received += 1;
    }

    pub fn record_received(&mut self, channel: &C) {
        self.entry(channel).messages_received += 1;
    }

    /// Outstanding requests on `channel`: requests sent minus replies seen.
    pub fn remaining(&self, channel: &C) -> u64 {
        let c = self.per_channel.get(channel).copied().unwrap_or_default();
        c.requests_sent.saturating_sub(c.replies_received)
    }

    pub fn requests_sent(&self, channel: &C) -> u64 {
        self.per_channel
            .get(channel)
            .map_or(0, |c| c.requests_sent)
    }

    pub fn replies_received(&self, channel: &C) -> u64 {
        self.per_channel
            .get(channel)
            .map_or(0, |c| c.replies_received)
    }

    pub fn messages_sent(&self, channel: &C) -> u64 {
        self.per_channel
            .get(channel)
            .map_or(0, |c| c.messages_sent)
    }

    pub fn messages_received(&self, channel: &C) -> u64 {
        self.per_channel
            .get(channel)
            .map_or(0, |c| c.messages_received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_tracks_outstanding_requests() {
        let mut ctr: RequestCounter<&str> = RequestCounter::new();
        ctr.record_sent_request(&"a");
        ctr.record_sent_request(&"a");
        assert_eq!(ctr.remaining(&"a"), 2);
        ctr.record_received_reply(&"a");
        assert_eq!(ctr.remaining(&"a"), 1);
        assert_eq!(ctr.messages_sent(&"a"), 2);
        assert_eq!(ctr.messages_received(&"a"), 1);
    }

    #[test]
    fn channels_do_not_share_state() {
        let mut ctr: RequestCounter<&str> = RequestCounter::new();
        ctr.record_sent_request(&"a");
        assert_eq!(ctr.remaining(&"b"), 0);
        assert_eq!(ctr.requests_sent(&"b"), 0);
    }
}
