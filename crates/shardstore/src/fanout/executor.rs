//! Runs one task against every partition on the worker pool and merges the
//! per-partition outputs.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;

use super::pool::WorkerPool;
use crate::error::{FanOutFailure, PartitionFailure, Result};
use crate::partition::PartitionId;

/// Work that can be executed independently for each partition.
///
/// Implementors are shared immutably by every partition's work item, so any
/// per-partition state must come from the `partition` argument.
pub trait PartitionTask: Send + Sync + 'static {
    type Output: Send + 'static;

    /// Short label used in logs and errors.
    fn name(&self) -> &'static str;

    fn process(&self, partition: PartitionId) -> Result<Self::Output>;
}

/// Accumulates per-partition outputs into one answer.
pub trait Consolidator<T> {
    type Output;

    fn add_result(&mut self, partial: T);

    fn finish(self) -> Self::Output;
}

/// Concatenates name lists from every partition.
#[derive(Debug, Default)]
pub struct SearchResults {
    names: Vec<String>,
}

impl Consolidator<Vec<String>> for SearchResults {
    type Output = Vec<String>;

    fn add_result(&mut self, partial: Vec<String>) {
        self.names.extend(partial);
    }

    fn finish(self) -> Vec<String> {
        self.names
    }
}

/// Immutable unit of work: the shared task plus the partition it targets.
struct PartitionWork<T> {
    partition: PartitionId,
    task: Arc<T>,
}

impl<T: PartitionTask> PartitionWork<T> {
    fn run(&self) -> std::result::Result<T::Output, String> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.task.process(self.partition))) {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(error)) => Err(error.to_string()),
            Err(payload) => Err(format!("panicked: {}", panic_message(payload.as_ref()))),
        }
    }
}

type Outcome<O> = (PartitionId, std::result::Result<O, String>);

#[derive(Debug)]
pub struct FanOutExecutor {
    pool: WorkerPool,
    partitions: usize,
}

impl FanOutExecutor {
    pub fn new(pool: WorkerPool, partitions: usize) -> Self {
        Self { pool, partitions }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Runs `task` once per partition and feeds every output to
    /// `consolidator` in completion order.
    ///
    /// Fails if the pool rejects any work item, if any partition errors or
    /// panics, or if `timeout` elapses first. On failure nothing gathered so
    /// far is returned. Work items already running are not interrupted.
    pub fn run_on_all_partitions<T, C>(
        &self,
        task: Arc<T>,
        mut consolidator: C,
        timeout: Duration,
    ) -> Result<C::Output>
    where
        T: PartitionTask,
        C: Consolidator<T::Output>,
    {
        let started = Instant::now();
        let deadline = started + timeout;
        let name = task.name();
        let (sender, receiver) = crossbeam_channel::bounded::<Outcome<T::Output>>(self.partitions);

        for index in 0..self.partitions {
            let work = PartitionWork {
                partition: PartitionId::new(index),
                task: Arc::clone(&task),
            };
            let sender = sender.clone();
            let job = Box::new(move || {
                let outcome = work.run();
                // The receiver is gone once the caller gave up; nothing to do.
                let _ = sender.send((work.partition, outcome));
            });
            if self.pool.submit(job).is_err() {
                log::warn!(
                    "{name} rejected at partition {index}: pool saturated \
                     live_workers={} queued={}",
                    self.pool.live_workers(),
                    self.pool.queued()
                );
                return Err(FanOutFailure::Rejected {
                    task: name,
                    partition: PartitionId::new(index),
                }
                .into());
            }
        }
        drop(sender);

        let mut failures = Vec::new();
        for completed in 0..self.partitions {
            match receiver.recv_deadline(deadline) {
                Ok((_, Ok(output))) => consolidator.add_result(output),
                Ok((partition, Err(message))) => {
                    failures.push(PartitionFailure { partition, message })
                }
                Err(RecvTimeoutError::Timeout) => {
                    log::warn!(
                        "{name} timed out after {}ms completed={completed}/{}",
                        started.elapsed().as_millis(),
                        self.partitions
                    );
                    return Err(FanOutFailure::TimedOut {
                        task: name,
                        elapsed_ms: started.elapsed().as_millis(),
                        completed,
                        expected: self.partitions,
                    }
                    .into());
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(FanOutFailure::Abandoned {
                        task: name,
                        missing: self.partitions - completed,
                    }
                    .into());
                }
            }
        }

        if !failures.is_empty() {
            failures.sort_by_key(|failure| failure.partition);
            log::warn!("{name} failed on {} partition(s)", failures.len());
            return Err(FanOutFailure::PartitionsFailed {
                task: name,
                failures,
            }
            .into());
        }

        log::debug!(
            "{name} completed partitions={} elapsed_ms={}",
            self.partitions,
            started.elapsed().as_millis()
        );
        Ok(consolidator.finish())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "partition task panicked".to_string()
    }
}
