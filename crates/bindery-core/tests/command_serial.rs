//! Integration tests for serialized command execution.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use bindery_core::{CommandBuilder, CommandError, DispatchQueue, Exception, Task};
use crossbeam_channel::unbounded;
use parking_lot::Mutex;

const TIMEOUT: Duration = Duration::from_secs(5);

#[test]
fn overlapping_requests_run_in_fifo_order() {
    // A concurrent execute queue, so any overlap would be observable
    let executor = DispatchQueue::concurrent("fifo-exec");
    let callbacks = DispatchQueue::serial("fifo-callbacks");
    let (release, gate) = unbounded::<()>();
    let active = Arc::new(AtomicUsize::new(0));
    let overlapped = Arc::new(AtomicBool::new(false));
    let order = Arc::new(Mutex::new(Vec::new()));

    let (a, o, log) = (active.clone(), overlapped.clone(), order.clone());
    let command = CommandBuilder::new("fifo")
        .execute_on(&executor)
        .callback_on(&callbacks)
        .action(move |label: &'static str| {
            if a.fetch_add(1, Ordering::SeqCst) > 0 {
                o.store(true, Ordering::SeqCst);
            }
            gate.recv_timeout(TIMEOUT).unwrap();
            log.lock().push(label);
            a.fetch_sub(1, Ordering::SeqCst);
        });

    let first = command.execute("first").unwrap();
    let second = command.execute("second").unwrap();
    let third = command.execute("third").unwrap();
    assert_eq!(command.pending_count(), 2);

    for _ in 0..3 {
        release.send(()).unwrap();
    }
    for task in [first, second, third] {
        task.wait_timeout(TIMEOUT).unwrap().unwrap();
    }

    assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    assert!(!overlapped.load(Ordering::SeqCst));
    assert!(!command.is_executing());
}

#[test]
fn async_command_chains_with_tasks() {
    let io = DispatchQueue::serial("chain-io");
    let ui = DispatchQueue::serial("chain-ui");
    let fetched = Arc::new(AtomicUsize::new(0));

    let counter = fetched.clone();
    let worker = io.clone();
    let fetch = CommandBuilder::new("fetch")
        .execute_on(&io)
        .callback_on(&ui)
        .task(move |id: u32| {
            let counter = counter.clone();
            Task::new(&worker, move || {
                counter.fetch_add(1, Ordering::SeqCst);
                if id == 0 {
                    Err(Exception::new("no such record"))
                } else {
                    Ok(format!("record-{id}"))
                }
            })
        });

    let ok = fetch.execute(7).unwrap().map(|s| s.to_uppercase());
    assert_eq!(ok.wait().unwrap(), "RECORD-7");

    let recovered = fetch
        .execute(0)
        .unwrap()
        .chain_on_fail(|err| Task::value(format!("fallback after {err}")));
    assert_eq!(recovered.wait().unwrap(), "fallback after no such record");
    assert_eq!(fetched.load(Ordering::SeqCst), 2);
}

#[test]
fn source_dropped_while_queued_fails_with_source_is_nil() {
    struct Session;

    let executor = DispatchQueue::serial("queued-source-exec");
    let (release, gate) = unbounded::<()>();
    let session = Arc::new(Session);
    let calls = Arc::new(AtomicUsize::new(0));
    let (started, first_started) = unbounded::<()>();

    let counter = calls.clone();
    let command = CommandBuilder::new("queued-source")
        .execute_on(&executor)
        .callback_on(&DispatchQueue::serial("queued-source-ui"))
        .task_with_source(&session, |_, _: &()| true, move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            started.send(()).unwrap();
            let gate = gate.clone();
            Task::new(&DispatchQueue::serial("queued-source-work"), move || {
                gate.recv_timeout(TIMEOUT).map_err(|e| Exception::with_source("gate closed", e))
            })
        });

    let first = command.execute(()).unwrap();
    let second = command.execute(()).unwrap();
    first_started.recv_timeout(TIMEOUT).unwrap();
    drop(session);
    release.send(()).unwrap();

    first.wait_timeout(TIMEOUT).unwrap().unwrap();
    let err = second.wait_timeout(TIMEOUT).unwrap().unwrap_err();
    assert!(err.is::<CommandError>());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
