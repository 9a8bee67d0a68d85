// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A single CPU/RSS sample, grounded on the source's `concurrent/monitor.py`
//! `Stat` record and on `netbench-collector`'s `procinfo::Proc` sampler.

use serde::{Deserialize, Serialize};
use sysinfo::{CpuRefreshKind, Pid, ProcessExt, RefreshKind, System, SystemExt};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Stat {
    pub cpu_percent: f32,
    /// Resident set size, in bytes.
    pub memory_bytes: u64,
    /// Virtual memory size, in bytes.
    pub virtual_memory_bytes: u64,
}

/// Samples one process's CPU/RSS, re-using a single `System` handle the
/// way `procinfo::Proc` does rather than rebuilding it per sample.
pub struct Sampler {
    pid: Pid,
    system: System,
}

impl Sampler {
    pub fn for_current_process() -> Self {
        let pid = Pid::from(std::process::id() as i32);
        let system = System::new_with_specifics(
            RefreshKind::new()
                .with_cpu(CpuRefreshKind::new().with_cpu_usage())
                .with_memory(),
        );
        Self { pid, system }
    }

    pub fn sample(&mut self) -> Stat {
        self.system.refresh_process(self.pid);
        match self.system.process(self.pid) {
            Some(proc) => Stat {
                cpu_percent: proc.cpu_usage(),
                memory_bytes: proc.memory() * 1000,
                virtual_memory_bytes: proc.virtual_memory() * 1000,
            },
            None => Stat::default(),
        }
    }
}
