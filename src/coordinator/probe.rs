// Copyright 2025 dentsusoken
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Bounded worker pool for connectivity probes.
//!
//! A probe that hangs on an unreachable service ties up one worker but never
//! the caller: the caller waits on a ticket with its own deadline and cancels
//! the ticket when the deadline passes.

use crate::error::{LockyardError, Result};
use crate::locking::cancellation::CancellationToken;
use log::{debug, warn};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool of probe threads fed by a bounded queue.
pub struct ProbeExecutor {
    sender: Mutex<Option<SyncSender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ProbeExecutor {
    pub fn new(workers: usize, queue_capacity: usize) -> Result<Self> {
        let (sender, receiver) = mpsc::sync_channel::<Job>(queue_capacity);
        let receiver = Arc::new(Mutex::new(receiver));

        let mut handles = Vec::with_capacity(workers.max(1));
        for index in 0..workers.max(1) {
            let receiver = Arc::clone(&receiver);
            let handle = thread::Builder::new()
                .name(format!("lockyard-probe-{index}"))
                .spawn(move || worker_loop(receiver))?;
            handles.push(handle);
        }

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(handles),
        })
    }

    /// Queues `task`. Fails with a connectivity error when the queue is full.
    pub fn submit<T, F>(&self, task: F) -> Result<ProbeTicket<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (result_tx, result_rx) = mpsc::sync_channel(1);
        let cancellation = CancellationToken::new();
        let job_cancellation = cancellation.clone();
        let job: Job = Box::new(move || {
            if job_cancellation.is_cancelled() {
                return;
            }
            let _ = result_tx.send(task());
        });

        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(sender) = sender.as_ref() else {
            return Err(LockyardError::Coordination(
                "probe executor has been shut down".to_string(),
            ));
        };

        match sender.try_send(job) {
            Ok(()) => Ok(ProbeTicket {
                receiver: result_rx,
                cancellation,
            }),
            Err(TrySendError::Full(_)) => Err(LockyardError::Connectivity(
                "connectivity probe queue is full".to_string(),
            )),
            Err(TrySendError::Disconnected(_)) => Err(LockyardError::Coordination(
                "probe workers have stopped".to_string(),
            )),
        }
    }

    /// Stops accepting probes and waits for the workers to drain the queue.
    pub fn shutdown(&self) {
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let workers = std::mem::take(
            &mut *self
                .workers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for worker in workers {
            if worker.join().is_err() {
                warn!("A connectivity probe worker panicked");
            }
        }
    }
}

impl Drop for ProbeExecutor {
    fn drop(&mut self) {
        // Workers exit once the queue is closed; a worker stuck on a hung
        // probe is left to finish on its own.
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }
}

fn worker_loop(receiver: Arc<Mutex<Receiver<Job>>>) {
    loop {
        let job = {
            let receiver = receiver
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            receiver.recv()
        };
        match job {
            Ok(job) => job(),
            Err(_) => break,
        }
    }
    debug!(
        "Probe worker {} exiting",
        thread::current().name().unwrap_or("unnamed")
    );
}

/// Pending result of a submitted probe.
pub struct ProbeTicket<T> {
    receiver: Receiver<T>,
    cancellation: CancellationToken,
}

impl<T> ProbeTicket<T> {
    /// Waits up to `timeout`. A probe that has not finished is cancelled and `None` returned.
    pub fn wait(self, timeout: Duration) -> Option<T> {
        match self.receiver.recv_timeout(timeout) {
            Ok(value) => Some(value),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                self.cancellation.cancel();
                None
            }
        }
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn probe_result_is_delivered() {
        let executor = ProbeExecutor::new(1, 4).unwrap();
        let ticket = executor.submit(|| 7).unwrap();
        assert_eq!(ticket.wait(Duration::from_secs(1)), Some(7));
        executor.shutdown();
    }

    #[test]
    fn slow_probe_times_out() {
        let executor = ProbeExecutor::new(1, 4).unwrap();
        let ticket = executor
            .submit(|| thread::sleep(Duration::from_millis(200)))
            .unwrap();
        assert!(ticket.wait(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn cancelled_probe_is_skipped() {
        let executor = ProbeExecutor::new(1, 4).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));

        let blocker = executor
            .submit(|| thread::sleep(Duration::from_millis(50)))
            .unwrap();
        let counter = Arc::clone(&ran);
        let skipped = executor
            .submit(move || counter.fetch_add(1, Ordering::SeqCst))
            .unwrap();
        skipped.cancel();

        assert!(blocker.wait(Duration::from_secs(1)).is_some());
        executor.shutdown();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn full_queue_is_a_connectivity_failure() {
        let executor = ProbeExecutor::new(1, 1).unwrap();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let _running = executor
            .submit(move || {
                let _ = release_rx.recv();
            })
            .unwrap();

        // One job may still be sitting in the queue before the worker picks it up.
        let mut failure = None;
        for _ in 0..3 {
            if let Err(err) = executor.submit(|| ()) {
                failure = Some(err);
                break;
            }
        }
        release_tx.send(()).unwrap();

        let err = failure.expect("queue should fill up");
        assert!(err.is_connectivity());
    }

    #[test]
    fn submit_after_shutdown_fails() {
        let executor = ProbeExecutor::new(2, 4).unwrap();
        executor.shutdown();
        assert!(matches!(
            executor.submit(|| ()),
            Err(LockyardError::Coordination(_))
        ));
    }
}
