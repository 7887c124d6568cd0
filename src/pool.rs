//! Concurrent worker pool that drives the checks.
//!
//! A fixed number of worker threads pull usernames off a bounded input
//! queue, run the validity / cache / remote-check sequence, and push
//! results onto a bounded output queue. Results carry no ordering
//! guarantee across usernames; the pool guarantees exactly one result
//! per submitted username.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use thiserror::Error;

use crate::cache::Cache;
use crate::check::{Service, Status};

/// Capacity of the input and output queues.
const QUEUE_CAPACITY: usize = 100;

/// A classified username, as emitted on the pool's output queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    /// The username as submitted.
    pub username: String,
    /// Its final classification.
    pub status: Status,
}

/// Error from [`Pool::submit`] after every worker has exited.
///
/// Workers only exit early when the result receiver has been dropped,
/// so this surfaces "nobody is listening anymore" to the feeder.
#[derive(Debug, Error)]
#[error("worker pool has shut down; `{username}` was not checked")]
pub struct SubmitError {
    /// The username that could not be enqueued.
    pub username: String,
}

/// Handle to a running pool of checker workers.
///
/// Created by [`Pool::spawn`], which also hands back the receiving end
/// of the output queue. Drain results concurrently with submission: both
/// queues are bounded, so a submitter that outruns an absent consumer
/// will eventually block.
#[derive(Debug)]
pub struct Pool {
    input: SyncSender<String>,
    workers: Vec<JoinHandle<()>>,
}

impl Pool {
    /// Start `workers` threads checking usernames against `service`,
    /// consulting and populating `cache`.
    ///
    /// At least one worker is always started.
    pub fn spawn(
        service: Arc<dyn Service>,
        cache: Arc<dyn Cache>,
        workers: usize,
    ) -> (Self, Receiver<CheckResult>) {
        let (input_tx, input_rx) = sync_channel::<String>(QUEUE_CAPACITY);
        let (output_tx, output_rx) = sync_channel::<CheckResult>(QUEUE_CAPACITY);
        let input_rx = Arc::new(Mutex::new(input_rx));

        let workers = workers.max(1);
        let handles = (0..workers)
            .map(|_| {
                let input = Arc::clone(&input_rx);
                let output = output_tx.clone();
                let service = Arc::clone(&service);
                let cache = Arc::clone(&cache);
                thread::spawn(move || worker_loop(&input, &output, service.as_ref(), cache.as_ref()))
            })
            .collect();
        // Workers hold the only remaining output senders; once they all
        // exit, the receiver observes end-of-stream.
        drop(output_tx);

        tracing::debug!(workers, service = service.name(), "worker pool started");
        (
            Self {
                input: input_tx,
                workers: handles,
            },
            output_rx,
        )
    }

    /// Enqueue one username, blocking while the input queue is full.
    ///
    /// # Errors
    ///
    /// [`SubmitError`] if the pool is no longer accepting work.
    pub fn submit(&self, username: String) -> Result<(), SubmitError> {
        self.input
            .send(username)
            .map_err(|err| SubmitError { username: err.0 })
    }

    /// Shut down gracefully: stop accepting work, let the workers drain
    /// everything already queued, and join them.
    ///
    /// Returns once every in-flight check has been emitted; the output
    /// receiver then reports end-of-stream.
    pub fn shutdown(self) {
        drop(self.input);
        for handle in self.workers {
            if handle.join().is_err() {
                tracing::error!("checker worker panicked");
            }
        }
    }
}

fn worker_loop(
    input: &Mutex<Receiver<String>>,
    output: &SyncSender<CheckResult>,
    service: &dyn Service,
    cache: &dyn Cache,
) {
    loop {
        let username = {
            // A poisoned lock means a sibling died mid-receive; treat it
            // as shutdown.
            let Ok(queue) = input.lock() else { return };
            match queue.recv() {
                Ok(username) => username,
                Err(_) => return,
            }
        };

        let status = classify(service, cache, &username);
        if output.send(CheckResult { username, status }).is_err() {
            // Receiver dropped; no one wants further results.
            return;
        }
    }
}

/// Run one username through the check sequence: validity rule, then
/// cache, then the remote check (whose determinate outcomes are written
/// back to the cache).
fn classify(service: &dyn Service, cache: &dyn Cache, username: &str) -> Status {
    if !service.is_valid(username) {
        return Status::Invalid;
    }

    let cached = cache.get(service.name(), username);
    if cached != Status::Unknown {
        tracing::debug!(username, service = service.name(), "cache hit");
        return cached;
    }

    let status = guarded_check(service, username);
    if status != Status::Unknown {
        cache.put(service.name(), username, status);
    }
    status
}

/// Invoke the service's check, degrading a panicking adapter to
/// [`Status::Unknown`] so no fault crosses the worker boundary.
fn guarded_check(service: &dyn Service, username: &str) -> Status {
    match panic::catch_unwind(AssertUnwindSafe(|| service.check(username))) {
        Ok(status) => status,
        Err(_) => {
            tracing::error!(
                username,
                service = service.name(),
                "checker panicked; counting the result as unknown"
            );
            Status::Unknown
        }
    }
}
