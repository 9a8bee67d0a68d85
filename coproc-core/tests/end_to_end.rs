// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Cross-process scenarios exercising the full messenger/resource/pool
//! stack: a `Messenger::pair()` here is handed across a real `fork()`
//! via `WorkerResource`, not just used in-process.

use coproc_core::{Error, LifecycleError, Messenger, PlainMessenger, WorkerResource, WorkerResourcePool};

type EchoResource = WorkerResource<String, (), coproc_core::FifoQueue<String, ()>>;

#[test]
fn echo_worker_round_trips_a_message() {
    let mut resource = EchoResource::new();
    resource
        .start(|mut messenger: PlainMessenger<String, ()>| loop {
            match messenger.receive_blocking(&()) {
                Ok(payload) => {
                    if messenger.send_reply((), payload).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        })
        .unwrap();

    let mut scoped = resource.scoped();
    scoped
        .messenger_mut()
        .unwrap()
        .send_request((), "hello".to_string())
        .unwrap();
    let reply = scoped.messenger_mut().unwrap().receive_blocking(&()).unwrap();
    assert_eq!(reply, "hello");
}

#[test]
fn worker_close_surfaces_to_the_parent() {
    let mut resource = EchoResource::new();
    resource
        .start(|mut messenger: PlainMessenger<String, ()>| {
            let _ = messenger.send_close(());
        })
        .unwrap();

    let mut scoped = resource.scoped();
    // give the child a moment to write its CLOSE frame before polling
    std::thread::sleep(std::time::Duration::from_millis(20));
    let err = scoped
        .messenger_mut()
        .unwrap()
        .receive_blocking(&())
        .unwrap_err();
    assert!(matches!(err, Error::ResourceRequestedClose));
}

#[test]
fn worker_error_surfaces_with_cause_to_the_parent() {
    let mut resource = EchoResource::new();
    resource
        .start(|mut messenger: PlainMessenger<String, ()>| {
            let boom = Error::transport("division by zero");
            let _ = messenger.send_error((), &boom);
        })
        .unwrap();

    let mut scoped = resource.scoped();
    std::thread::sleep(std::time::Duration::from_millis(20));
    let err = scoped
        .messenger_mut()
        .unwrap()
        .receive_blocking(&())
        .unwrap_err();
    match err {
        Error::PeerError(cause) => assert!(cause.message.contains("division by zero")),
        other => panic!("expected PeerError, got {other:?}"),
    }
}

#[test]
fn priority_worker_answers_most_urgent_job_first() {
    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Job {
        priority: f64,
        label: String,
    }
    impl coproc_core::Prioritized for Job {
        fn priority(&self) -> f64 {
            self.priority
        }
    }

    type JobResource =
        WorkerResource<Job, (), coproc_core::PriorityQueue<Job, ()>>;

    let mut resource = JobResource::new();
    resource
        .start(|mut messenger: coproc_core::PriorityMessenger<Job, ()>| {
            // echo back labels in the order they were drained
            for _ in 0..2 {
                if let Ok(job) = messenger.receive_blocking(&()) {
                    let _ = messenger.send_reply((), job);
                }
            }
        })
        .unwrap();

    let mut scoped = resource.scoped();
    let messenger = scoped.messenger_mut().unwrap();
    messenger
        .send((), Job { priority: 9.0, label: "slow".into() })
        .unwrap();
    messenger
        .send((), Job { priority: 0.0, label: "urgent".into() })
        .unwrap();
    messenger.await_channel(&()).unwrap();

    let first = messenger.receive_blocking(&()).unwrap();
    assert_eq!(first.label, "urgent");
    let second = messenger.receive_blocking(&()).unwrap();
    assert_eq!(second.label, "slow");
}

#[test]
fn pool_map_squares_every_item_in_order() {
    let mut pool: WorkerResourcePool<i64, i64> = WorkerResourcePool::new(4, |x| x * x).unwrap();
    let items: Vec<i64> = (1..=20).collect();
    let squares = pool.map(items.clone(), 4).unwrap();
    let expected: Vec<i64> = items.iter().map(|x| x * x).collect();
    assert_eq!(squares, expected);
}

#[test]
fn scoped_resource_terminates_worker_on_drop() {
    let mut resource = EchoResource::new();
    resource
        .start(|mut messenger: PlainMessenger<String, ()>| loop {
            if messenger.receive_blocking(&()).is_err() {
                break;
            }
        })
        .unwrap();
    let pid = resource.pid().unwrap();
    {
        let _scoped = resource.scoped();
        assert!(coproc_core::LaunchMode::default() == coproc_core::LaunchMode::Fork);
    }
    // the guard's Drop impl sent SIGTERM and waited; a second terminate
    // with check_alive=true must now report the worker already dead
    let err = resource.terminate(true).unwrap_err();
    assert!(matches!(err, Error::Lifecycle(LifecycleError::AlreadyDead)));
    let _ = pid;
}

#[test]
fn pool_with_no_workers_is_rejected() {
    let mut pool: WorkerResourcePool<i32, i32> = WorkerResourcePool::new(0, |x| x).unwrap();
    let err = pool.map(vec![1, 2, 3], 1).unwrap_err();
    assert!(matches!(err, Error::TransportBroken(_)));
}

#[test]
fn unused_pair_does_not_block_on_construction() {
    let (a, b): (PlainMessenger<i32, ()>, PlainMessenger<i32, ()>) =
        Messenger::pair().unwrap();
    drop(a);
    drop(b);
}
