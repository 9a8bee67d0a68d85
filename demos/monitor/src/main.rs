// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Example client of `coproc-core`: forks one worker that samples its
//! own CPU/RSS and polls it for a handful of samples. No plotting, no
//! DataFrame export, no CLI flags beyond an env-var interval override —
//! those are out of scope for the core library this demonstrates.

mod stats;
mod worker;

use coproc_core::{FifoQueue, WorkerResource};
use std::time::Duration;
use tracing::{info, warn};
use worker::{MonitorMessage, MonitorMessenger};

fn sampling_interval() -> Duration {
    let millis = std::env::var("COPROC_MONITOR_INTERVAL_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(250);
    Duration::from_millis(millis)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let interval = sampling_interval();

    let mut resource: WorkerResource<MonitorMessage, (), FifoQueue<MonitorMessage, ()>> =
        WorkerResource::new();
    resource
        .start(move |messenger: MonitorMessenger| worker::run(messenger, interval))
        .expect("failed to start monitor worker");

    let mut scoped = resource.scoped();
    let messenger = scoped.messenger_mut().expect("worker was just started");

    messenger
        .send((), MonitorMessage::AddNote("startup".to_string()))
        .expect("failed to send note to monitor worker");

    for sample in 0..5 {
        messenger
            .send_request((), MonitorMessage::RequestStats)
            .expect("failed to request stats");
        match messenger.receive_blocking(&()) {
            Ok(MonitorMessage::Stats { note, stat }) => {
                info!(
                    sample,
                    ?note,
                    cpu_percent = stat.cpu_percent,
                    memory_bytes = stat.memory_bytes,
                    "monitor sample"
                );
            }
            Ok(_) => {}
            Err(err) => {
                warn!(%err, "monitor worker stopped responding");
                break;
            }
        }
        std::thread::sleep(interval);
    }
}
