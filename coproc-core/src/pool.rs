// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Saturating producer-consumer `map`/`map_unordered` over a fixed pool
//! of forked worker processes (spec.md §4.5, §3's `SliceMsg`/
//! `MapResultMsg`), grounded on the source's `workerresourcepool.py`
//! `_map_messages` scheduler: prime every worker with one chunk, then for
//! every result received push the next pending chunk to that same
//! worker, until the input is exhausted and every worker has drained its
//! last reply. Chunk size is caller-supplied, per `LazyPool.map`'s
//! `chunksize` parameter — this module never second-guesses it with an
//! internal heuristic.

use crate::error::{Error, Result, WireError};
use crate::queue::FifoQueue;
use crate::resource::WorkerResource;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{info, warn};

const POLL_INTERVAL: Duration = Duration::from_micros(200);

/// Identifies a chunk by its half-open range into the original input,
/// named to match spec.md §3's `SliceMsg { start, stop }` exactly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct ChunkRange {
    start: usize,
    stop: usize,
}

/// A chunk of work handed to one worker. Unlike the source — where
/// `fork`-ed workers already share the parent's memory and a `SliceMsg`
/// can carry bare indices — each worker here runs in its own address
/// space, so the slice's actual items travel with it.
#[derive(Debug, Serialize, Deserialize)]
struct SliceMsg<I> {
    slice: ChunkRange,
    items: Vec<I>,
}

#[derive(Debug, Serialize, Deserialize)]
enum MapOutcome<O> {
    Ok(O),
    Err(WireError),
}

#[derive(Debug, Serialize, Deserialize)]
struct MapResultMsg<O> {
    slice: ChunkRange,
    results: Vec<MapOutcome<O>>,
}

#[derive(Debug, Serialize, Deserialize)]
enum PoolFrame<I, O> {
    Work(SliceMsg<I>),
    Result(MapResultMsg<O>),
}

type PoolMessenger<I, O> =
    crate::messenger::Messenger<PoolFrame<I, O>, (), FifoQueue<PoolFrame<I, O>, ()>>;

fn worker_loop<I, O, F>(messenger: &mut PoolMessenger<I, O>, job: F)
where
    F: Fn(I) -> O,
{
    loop {
        match messenger.receive_blocking(&()) {
            Ok(PoolFrame::Work(msg)) => {
                let results = msg.items.into_iter().map(|item| MapOutcome::Ok(job(item))).collect();
                let reply = PoolFrame::Result(MapResultMsg {
                    slice: msg.slice,
                    results,
                });
                if messenger.send_reply((), reply).is_err() {
                    break;
                }
            }
            Ok(PoolFrame::Result(_)) => {
                // a worker never receives a Result frame; ignore defensively
            }
            Err(Error::ResourceRequestedClose) => break,
            Err(_) => break,
        }
    }
}

/// Splits `items` into chunks of exactly `chunksize` (the last one
/// possibly smaller), each tagged with its `ChunkRange` into the
/// original input. `chunksize` is caller-controlled (spec.md §4.5/§6,
/// `LazyPool.chunk_size_slice`'s `chunks(n, chunksize)`): `chunksize >=
/// len(items)` yields one chunk, `chunksize == 1` yields `len(items)`
/// chunks. A `chunksize` of zero is floored to one to avoid looping
/// forever on a zero-sized slice.
fn chunk_items<I>(items: Vec<I>, chunksize: usize) -> VecDeque<(ChunkRange, Vec<I>)> {
    let chunksize = chunksize.max(1);
    let mut remaining: VecDeque<I> = items.into_iter().collect();
    let mut next_start = 0usize;
    let mut chunks = VecDeque::new();
    while !remaining.is_empty() {
        let take = chunksize.min(remaining.len());
        let chunk: Vec<I> = remaining.drain(..take).collect();
        let range = ChunkRange {
            start: next_start,
            stop: next_start + take,
        };
        next_start += take;
        chunks.push_back((range, chunk));
    }
    chunks
}

/// A fixed-size pool of worker processes, each running the same closure,
/// fed through a saturating chunked scheduler so no worker sits idle
/// while chunks remain (spec.md §4.5).
pub struct WorkerResourcePool<I, O> {
    workers: Vec<WorkerResource<PoolFrame<I, O>, (), FifoQueue<PoolFrame<I, O>, ()>>>,
}

impl<I, O> WorkerResourcePool<I, O>
where
    I: Serialize + DeserializeOwned + 'static,
    O: Serialize + DeserializeOwned + 'static,
{
    /// Forks `num_workers` processes, each running `job` in a loop that
    /// answers one chunk of work at a time.
    pub fn new<F>(num_workers: usize, job: F) -> Result<Self>
    where
        F: Fn(I) -> O + Clone + 'static,
    {
        let mut workers = Vec::with_capacity(num_workers);
        for _ in 0..num_workers {
            let mut resource = WorkerResource::new();
            let job = job.clone();
            resource.start(move |mut messenger| {
                worker_loop(&mut messenger, job);
            })?;
            workers.push(resource);
        }
        info!(num_workers, "worker pool started");
        Ok(Self { workers })
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Applies the pool's job to every item, returning results in input
    /// order. Collects every `MapResult` before flattening, matching
    /// `LazyPool.map`'s "collect everything, then sort" contract.
    pub fn map(&mut self, items: Vec<I>, chunksize: usize) -> Result<Vec<O>> {
        let total = items.len();
        let mut results: Vec<(usize, O)> =
            self.map_unordered(items, chunksize)?.collect::<Result<Vec<_>>>()?;
        results.sort_by_key(|(index, _)| *index);
        debug_assert_eq!(results.len(), total);
        Ok(results.into_iter().map(|(_, value)| value).collect())
    }

    /// Applies the pool's job to every item, streaming `(original_index,
    /// result)` pairs in arrival order as they come back from workers —
    /// a caller can start using fast results before slow ones finish,
    /// matching `LazyPool.map_unordered`'s generator contract rather
    /// than `map`'s collect-then-flatten.
    pub fn map_unordered(
        &mut self,
        items: Vec<I>,
        chunksize: usize,
    ) -> Result<MapUnordered<'_, I, O>> {
        if self.workers.is_empty() {
            return Err(Error::transport("worker pool has no workers"));
        }
        let total = items.len();
        let mut pending_chunks = chunk_items(items, chunksize);

        // priming: hand every worker its first chunk, if there is one
        for worker in self.workers.iter_mut() {
            if let Some((slice, items)) = pending_chunks.pop_front() {
                worker
                    .messenger_mut()?
                    .send_request((), PoolFrame::Work(SliceMsg { slice, items }))?;
            }
        }

        Ok(MapUnordered {
            workers: &mut self.workers,
            pending_chunks,
            outbox: VecDeque::new(),
            resolved: 0,
            total,
        })
    }

    /// Signals every worker to close and waits for them to exit.
    pub fn shutdown(&mut self) -> Result<()> {
        for worker in self.workers.iter_mut() {
            if let Ok(messenger) = worker.messenger_mut() {
                let _ = messenger.send_close(());
            }
        }
        for worker in self.workers.iter_mut() {
            worker.terminate(false)?;
        }
        Ok(())
    }
}

impl<I, O> Drop for WorkerResourcePool<I, O> {
    fn drop(&mut self) {
        for worker in self.workers.iter_mut() {
            if let Ok(messenger) = worker.messenger_mut() {
                let _ = messenger.send_close(());
            }
            if let Err(err) = worker.terminate(false) {
                warn!(%err, "failed to terminate pool worker on drop");
            }
        }
    }
}

/// Streams `map_unordered`'s `(original_index, result)` pairs as workers
/// reply, re-feeding each worker its next pending chunk the moment it
/// answers. Borrows the pool's workers for its lifetime.
pub struct MapUnordered<'a, I, O> {
    workers: &'a mut [WorkerResource<PoolFrame<I, O>, (), FifoQueue<PoolFrame<I, O>, ()>>],
    pending_chunks: VecDeque<(ChunkRange, Vec<I>)>,
    outbox: VecDeque<(usize, O)>,
    resolved: usize,
    total: usize,
}

impl<'a, I, O> Iterator for MapUnordered<'a, I, O>
where
    I: Serialize + DeserializeOwned,
    O: Serialize + DeserializeOwned,
{
    type Item = Result<(usize, O)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.outbox.pop_front() {
                return Some(Ok(item));
            }
            if self.resolved >= self.total {
                return None;
            }
            let mut made_progress = false;
            for worker in self.workers.iter_mut() {
                let received = match worker.messenger_mut().and_then(|m| m.receive_available(&())) {
                    Ok(received) => received,
                    Err(err) => return Some(Err(err)),
                };
                let msg = match received {
                    Some(PoolFrame::Result(msg)) => msg,
                    Some(PoolFrame::Work(_)) | None => continue,
                };
                made_progress = true;
                for (offset, outcome) in msg.results.into_iter().enumerate() {
                    let index = msg.slice.start + offset;
                    match outcome {
                        MapOutcome::Ok(value) => {
                            self.outbox.push_back((index, value));
                            self.resolved += 1;
                        }
                        MapOutcome::Err(cause) => return Some(Err(Error::PeerError(cause))),
                    }
                }
                if let Some((slice, items)) = self.pending_chunks.pop_front() {
                    let reply = worker
                        .messenger_mut()
                        .and_then(|m| m.send_request((), PoolFrame::Work(SliceMsg { slice, items })));
                    if let Err(err) = reply {
                        return Some(Err(err));
                    }
                }
            }
            if !made_progress {
                std::thread::sleep(POLL_INTERVAL);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_preserves_input_order() {
        let mut pool = WorkerResourcePool::new(3, |x: u32| x * x).unwrap();
        let items: Vec<u32> = (0..10).collect();
        let squares = pool.map(items.clone(), 3).unwrap();
        let expected: Vec<u32> = items.iter().map(|x| x * x).collect();
        assert_eq!(squares, expected);
        pool.shutdown().unwrap();
    }

    #[test]
    fn map_unordered_covers_every_index_exactly_once() {
        let mut pool = WorkerResourcePool::new(4, |x: u32| x + 1).unwrap();
        let items: Vec<u32> = (0..20).collect();
        let mut results: Vec<(usize, u32)> = pool
            .map_unordered(items, 2)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        results.sort_by_key(|(index, _)| *index);
        let indices: Vec<usize> = results.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, (0..20).collect::<Vec<_>>());
        pool.shutdown().unwrap();
    }

    #[test]
    fn map_unordered_streams_results_as_they_arrive() {
        let mut pool = WorkerResourcePool::new(2, |x: u32| x).unwrap();
        let items: Vec<u32> = (0..4).collect();
        let mut seen = 0;
        for result in pool.map_unordered(items, 1).unwrap() {
            result.unwrap();
            seen += 1;
        }
        assert_eq!(seen, 4);
        pool.shutdown().unwrap();
    }

    #[test]
    fn empty_input_returns_empty_output() {
        let mut pool = WorkerResourcePool::new(2, |x: u32| x).unwrap();
        assert!(pool.map(Vec::new(), 4).unwrap().is_empty());
        pool.shutdown().unwrap();
    }

    #[test]
    fn chunk_items_respects_caller_chunksize() {
        let chunks = chunk_items(vec![1, 2, 3, 4, 5], 10);
        assert_eq!(chunks.len(), 1);
        let chunks = chunk_items(vec![1, 2, 3, 4, 5], 1);
        assert_eq!(chunks.len(), 5);
        let chunks = chunk_items(Vec::<u32>::new(), 3);
        assert!(chunks.is_empty());
    }
}
