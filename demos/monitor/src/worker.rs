// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The monitor worker body: samples its own process on an interval and
//! answers the host's requests, grounded on `MonitorWorkerProcess` in the
//! source's `concurrent/monitor.py`.

use crate::stats::{Sampler, Stat};
use coproc_core::PlainMessenger;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MonitorMessage {
    /// Host -> worker: attach a label to the next sample taken.
    AddNote(String),
    /// Host -> worker: answer with the latest sample immediately.
    RequestStats,
    /// Worker -> host: reply to `RequestStats`, or a periodic push.
    Stats { note: Option<String>, stat: Stat },
}

pub type MonitorMessenger = PlainMessenger<MonitorMessage, ()>;

/// Runs until the host closes the channel. Pushes a sample every
/// `interval`, and answers `RequestStats` immediately in between pushes
/// as well — the source's worker does both on a single sampling loop
/// rather than splitting push/pull into separate threads.
pub fn run(mut messenger: MonitorMessenger, interval: Duration) {
    let mut sampler = Sampler::for_current_process();
    let mut pending_note: Option<String> = None;
    let mut next_push = Instant::now() + interval;

    loop {
        match messenger.receive_available(&()) {
            Ok(Some(MonitorMessage::AddNote(note))) => {
                info!(%note, "monitor worker received note");
                pending_note = Some(note);
            }
            Ok(Some(MonitorMessage::RequestStats)) => {
                let stat = sampler.sample();
                let note = pending_note.take();
                if messenger
                    .send_reply((), MonitorMessage::Stats { note, stat })
                    .is_err()
                {
                    return;
                }
            }
            Ok(Some(MonitorMessage::Stats { .. })) => {
                // the worker never receives its own reply variant; ignore
            }
            Ok(None) => {}
            Err(_) => return,
        }

        if Instant::now() >= next_push {
            let stat = sampler.sample();
            let note = pending_note.take();
            if messenger
                .send((), MonitorMessage::Stats { note, stat })
                .is_err()
            {
                return;
            }
            next_push += interval;
        }

        std::thread::sleep(Duration::from_millis(10));
    }
}
