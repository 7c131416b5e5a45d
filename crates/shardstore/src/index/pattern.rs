//! In-memory per-partition name sets answering regex filters.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::RwLock;
use rayon::prelude::*;
use regex::Regex;

use crate::error::Result;
use crate::fanout::PartitionTask;
use crate::partition::PartitionId;
use crate::store::StorageLayout;

/// File names per partition. A name is present iff its payload is present
/// in that partition's storage directory.
#[derive(Debug)]
pub struct PatternIndex {
    partitions: Vec<RwLock<BTreeSet<Box<str>>>>,
}

impl PatternIndex {
    pub fn new(partitions: usize) -> Self {
        Self {
            partitions: (0..partitions).map(|_| RwLock::new(BTreeSet::new())).collect(),
        }
    }

    /// Adds `name`; returns false if it was already indexed.
    pub fn index(&self, partition: PartitionId, name: &str) -> bool {
        self.partitions[partition.index()].write().insert(name.into())
    }

    /// Removes `name`; returns false if it was not indexed.
    pub fn remove(&self, partition: PartitionId, name: &str) -> bool {
        self.partitions[partition.index()].write().remove(name)
    }

    pub fn contains(&self, partition: PartitionId, name: &str) -> bool {
        self.partitions[partition.index()].read().contains(name)
    }

    pub fn len(&self, partition: PartitionId) -> usize {
        self.partitions[partition.index()].read().len()
    }

    /// Every name in `partition` with a match anywhere inside it.
    pub fn search_in_partition(&self, pattern: &Regex, partition: PartitionId) -> Vec<String> {
        self.partitions[partition.index()]
            .read()
            .iter()
            .filter(|name| pattern.is_match(name))
            .map(|name| name.to_string())
            .collect()
    }

    /// Replaces every partition's set with the names found on disk.
    pub fn rebuild(&self, layout: &StorageLayout) -> Result<usize> {
        let counts = self
            .partitions
            .par_iter()
            .enumerate()
            .map(|(index, slot)| {
                let partition = PartitionId::new(index);
                let names: BTreeSet<Box<str>> = layout
                    .list_files(partition)?
                    .into_iter()
                    .map(String::into_boxed_str)
                    .collect();
                let count = names.len();
                log::debug!("pattern index partition={partition} names={count}");
                *slot.write() = names;
                Ok(count)
            })
            .collect::<Result<Vec<usize>>>()?;
        Ok(counts.into_iter().sum())
    }
}

/// Regex filter over one partition's names. The pattern is compiled once
/// and shared by every partition's work item.
#[derive(Debug)]
pub struct RegexSearchTask {
    index: Arc<PatternIndex>,
    pattern: Regex,
}

impl RegexSearchTask {
    pub fn new(index: Arc<PatternIndex>, pattern: Regex) -> Self {
        Self { index, pattern }
    }
}

impl PartitionTask for RegexSearchTask {
    type Output = Vec<String>;

    fn name(&self) -> &'static str {
        "regex-search"
    }

    fn process(&self, partition: PartitionId) -> Result<Vec<String>> {
        Ok(self.index.search_in_partition(&self.pattern, partition))
    }
}
