//! Deterministic name → partition routing and the per-partition locks.
//!
//! Partition assignment is `fnv1a_64(name) & (partitions - 1)`. FNV-1a is
//! fixed by its published constants, so a name lands in the same partition
//! on every run, build and platform; storage and indexes never need
//! rebalancing.

use std::fmt;
use std::hash::Hasher;

use fnv::FnvHasher;
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{Result, StoreError};

/// Partition count used when the configuration does not override it.
pub const DEFAULT_PARTITIONS: usize = 16;

/// Identity of one partition, `0..partitions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PartitionId(usize);

impl PartitionId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable 64-bit FNV-1a hash of a cleaned file name.
pub fn name_hash(name: &str) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(name.as_bytes());
    hasher.finish()
}

/// Maps names to partitions and hands out each partition's lock.
#[derive(Debug)]
pub struct PartitionRouter {
    mask: u64,
    locks: Box<[Mutex<()>]>,
}

impl PartitionRouter {
    /// Creates a router over `partitions` partitions.
    ///
    /// The count must be a non-zero power of two so that the bitmask is
    /// equivalent to `hash % partitions`.
    pub fn new(partitions: usize) -> Result<Self> {
        if !partitions.is_power_of_two() {
            return Err(StoreError::Config(format!(
                "partition count must be a power of two, got {partitions}"
            )));
        }
        let locks = (0..partitions).map(|_| Mutex::new(())).collect();
        Ok(Self {
            mask: partitions as u64 - 1,
            locks,
        })
    }

    pub fn partitions(&self) -> usize {
        self.locks.len()
    }

    /// Returns the partition owning `name`. `name` must already be cleaned.
    pub fn partition_of(&self, name: &str) -> PartitionId {
        // n % 2^i == n & (2^i - 1)
        PartitionId((name_hash(name) & self.mask) as usize)
    }

    /// The lock guarding payloads and both indexes of `partition`.
    ///
    /// Always the same instance for a given partition. Take it before the
    /// counter lock, never after.
    pub fn lock_for(&self, partition: PartitionId) -> &Mutex<()> {
        &self.locks[partition.0]
    }

    /// Iterates over every partition id in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = PartitionId> {
        (0..self.locks.len()).map(PartitionId)
    }
}
