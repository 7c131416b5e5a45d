//! Bounded worker pool used by the fan-out executor.
//!
//! Core workers start eagerly and live as long as the pool. Jobs go through
//! a bounded queue; when it is full an overflow worker is spawned, up to
//! `max_pool_size`, and exits after `keep_alive` without work. Past that
//! submission fails with [`Rejected`] instead of queueing without bound.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::config::ExecutorConfig;
use crate::error::{Result, StoreError};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// The pool had no room for a job; the job was dropped unrun.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejected;

#[derive(Debug)]
pub struct WorkerPool {
    sender: Sender<Job>,
    receiver: Receiver<Job>,
    live_workers: Arc<AtomicUsize>,
    next_worker_id: AtomicUsize,
    max_workers: usize,
    keep_alive: Duration,
    name_prefix: String,
}

impl WorkerPool {
    pub fn new(config: &ExecutorConfig) -> Result<Self> {
        config.validate()?;
        let (sender, receiver) = crossbeam_channel::bounded(config.queue_capacity);
        let pool = Self {
            sender,
            receiver,
            live_workers: Arc::new(AtomicUsize::new(0)),
            next_worker_id: AtomicUsize::new(0),
            max_workers: config.max_pool_size,
            keep_alive: config.keep_alive(),
            name_prefix: config.thread_name_prefix.clone(),
        };
        for _ in 0..config.core_pool_size {
            pool.live_workers.fetch_add(1, Ordering::SeqCst);
            pool.spawn_worker(None, None).map_err(|error| {
                pool.live_workers.fetch_sub(1, Ordering::SeqCst);
                StoreError::Config(format!("cannot start fan-out worker: {error}"))
            })?;
        }
        log::debug!(
            "fan-out pool started core={} max={} queue={}",
            config.core_pool_size,
            config.max_pool_size,
            config.queue_capacity
        );
        Ok(pool)
    }

    /// Queues `job`, spawning an overflow worker if the queue is full.
    pub fn submit(&self, job: Job) -> std::result::Result<(), Rejected> {
        match self.sender.try_send(job) {
            Ok(()) => {
                if self.live_workers() == 0 {
                    self.spawn_idle_worker();
                }
                Ok(())
            }
            Err(TrySendError::Full(job)) | Err(TrySendError::Disconnected(job)) => {
                self.spawn_overflow(job)
            }
        }
    }

    /// Workers currently alive, core and overflow.
    pub fn live_workers(&self) -> usize {
        self.live_workers.load(Ordering::SeqCst)
    }

    /// Jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        self.sender.len()
    }

    fn spawn_overflow(&self, job: Job) -> std::result::Result<(), Rejected> {
        if !reserve_worker(&self.live_workers, self.max_workers) {
            return Err(Rejected);
        }
        match self.spawn_worker(Some(job), Some(self.keep_alive)) {
            Ok(()) => Ok(()),
            Err(error) => {
                self.live_workers.fetch_sub(1, Ordering::SeqCst);
                log::warn!("fan-out overflow worker failed to start: {error}");
                Err(Rejected)
            }
        }
    }

    /// Starts a worker for a job that was queued while no worker was alive,
    /// as happens with `core_pool_size = 0`. It exits after `keep_alive`.
    fn spawn_idle_worker(&self) {
        let reserved = self
            .live_workers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| {
                (live == 0).then_some(1)
            });
        if reserved.is_err() {
            return;
        }
        if let Err(error) = self.spawn_worker(None, Some(self.keep_alive)) {
            self.live_workers.fetch_sub(1, Ordering::SeqCst);
            log::warn!(
                "fan-out worker failed to start, {} job(s) queued: {error}",
                self.queued()
            );
        }
    }

    fn spawn_worker(
        &self,
        first: Option<Job>,
        idle_timeout: Option<Duration>,
    ) -> std::io::Result<()> {
        let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let receiver = self.receiver.clone();
        let live_workers = Arc::clone(&self.live_workers);
        let max_workers = self.max_workers;
        thread::Builder::new()
            .name(format!("{}{id}", self.name_prefix))
            .spawn(move || {
                if let Some(job) = first {
                    run_job(job);
                }
                loop {
                    // Err(true): pool dropped. Err(false): idle past keep-alive.
                    let next = match idle_timeout {
                        Some(timeout) => receiver
                            .recv_timeout(timeout)
                            .map_err(|e| e.is_disconnected()),
                        None => receiver.recv().map_err(|_| true),
                    };
                    match next {
                        Ok(job) => run_job(job),
                        Err(true) => break,
                        Err(false) => {
                            live_workers.fetch_sub(1, Ordering::SeqCst);
                            // A job queued after `submit` saw this worker alive
                            // would otherwise wait for the next submission.
                            if receiver.is_empty()
                                || !reserve_worker(&live_workers, max_workers)
                            {
                                return;
                            }
                        }
                    }
                }
                live_workers.fetch_sub(1, Ordering::SeqCst);
            })
            .map(|_| ())
    }
}

/// Claims one worker slot if fewer than `max` are alive.
fn reserve_worker(live_workers: &AtomicUsize, max: usize) -> bool {
    live_workers
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| {
            (live < max).then_some(live + 1)
        })
        .is_ok()
}

fn run_job(job: Job) {
    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
        log::warn!(
            "fan-out job panicked on {}",
            thread::current().name().unwrap_or("<unnamed>")
        );
    }
}
