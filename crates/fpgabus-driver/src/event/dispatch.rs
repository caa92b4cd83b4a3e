// SPDX-License-Identifier: AGPL-3.0-only

//! Deferred event dispatch
//!
//! Interrupt handlers hand events to a bounded queue and return; a single
//! worker thread performs the fan-out. The queue capacity is the dispatch
//! pool: when every slot is taken the event is dropped.

use super::{Event, EventSink, SubscriberRegistry};
use crate::error::{DriverError, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;

enum Job {
    Publish(Event),
    Flush(mpsc::Sender<()>),
}

/// Single-worker background publisher
#[derive(Debug)]
pub struct Dispatcher {
    sender: Option<SyncSender<Job>>,
    worker: Option<JoinHandle<()>>,
    pool_size: usize,
    dropped: AtomicU64,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Publish(e) => write!(f, "Publish({e})"),
            Self::Flush(_) => write!(f, "Flush"),
        }
    }
}

impl Dispatcher {
    /// Start the worker thread
    ///
    /// # Errors
    ///
    /// Returns error if `pool_size` is zero or the thread cannot be spawned.
    pub fn start(registry: Arc<SubscriberRegistry>, pool_size: usize) -> Result<Self> {
        if pool_size == 0 {
            return Err(DriverError::invalid_argument("dispatch pool size must be > 0"));
        }
        let (sender, receiver) = mpsc::sync_channel(pool_size);
        let worker = std::thread::Builder::new()
            .name("fpgabus-events".into())
            .spawn(move || run(&registry, &receiver))?;

        tracing::debug!("Event dispatcher started ({pool_size} slots)");
        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
            pool_size,
            dropped: AtomicU64::new(0),
        })
    }

    /// Queue an event for publication without blocking
    ///
    /// # Errors
    ///
    /// Returns `AllocationFailure` if every pool slot is in use or the
    /// worker has stopped; the event is dropped.
    pub fn dispatch(&self, event: Event) -> Result<()> {
        let Some(sender) = &self.sender else {
            return Err(DriverError::allocation_failure("event dispatcher stopped"));
        };
        match sender.try_send(Job::Publish(event)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(Job::Publish(event))) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Dispatch pool exhausted ({} slots), dropped {event}", self.pool_size);
                Err(DriverError::allocation_failure(format!(
                    "dispatch pool exhausted ({} slots)",
                    self.pool_size
                )))
            }
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Event dispatcher stopped, event dropped");
                Err(DriverError::allocation_failure("event dispatcher stopped"))
            }
        }
    }

    /// Block until every event queued so far has been published
    pub fn flush(&self) {
        let Some(sender) = &self.sender else {
            return;
        };
        let (done_tx, done_rx) = mpsc::channel();
        if sender.send(Job::Flush(done_tx)).is_ok() {
            let _ = done_rx.recv();
        }
    }

    /// Events dropped because the pool was exhausted
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Pool capacity
    pub const fn pool_size(&self) -> usize {
        self.pool_size
    }
}

impl EventSink for Dispatcher {
    fn emit(&self, event: Event) {
        // Failures are logged in dispatch()
        let _ = self.dispatch(event);
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain and exit
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("Event dispatcher worker panicked");
            }
        }
        tracing::debug!("Event dispatcher stopped");
    }
}

fn run(registry: &SubscriberRegistry, receiver: &Receiver<Job>) {
    for job in receiver {
        match job {
            Job::Publish(event) => {
                registry.publish(event);
            }
            Job::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}
