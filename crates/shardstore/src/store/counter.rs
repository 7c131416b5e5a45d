//! Store-wide count of stored files.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};
use rayon::prelude::*;

use super::StorageLayout;
use crate::error::Result;

/// Number of payloads across all partitions.
///
/// Reads are lock-free snapshots. Updates require the counter lock, which
/// mutations take after their partition lock so that a payload write and
/// its count change are observed together by other mutators.
#[derive(Debug, Default)]
pub struct GlobalCounter {
    value: AtomicU64,
    lock: Mutex<()>,
}

impl GlobalCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock()
    }

    pub fn increment(&self, _held: &MutexGuard<'_, ()>) {
        self.value.fetch_add(1, Ordering::SeqCst);
    }

    pub fn decrement(&self, _held: &MutexGuard<'_, ()>) {
        let updated = self
            .value
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1));
        if updated.is_err() {
            log::warn!("file counter decremented below zero; left at 0");
        }
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }

    /// Recounts the files stored in every partition.
    pub fn rebuild(&self, layout: &StorageLayout) -> Result<u64> {
        let total: u64 = layout
            .ids()
            .collect::<Vec<_>>()
            .into_par_iter()
            .map(|partition| layout.count_files(partition))
            .collect::<Result<Vec<u64>>>()?
            .into_iter()
            .sum();
        let _held = self.lock();
        self.value.store(total, Ordering::SeqCst);
        Ok(total)
    }
}
