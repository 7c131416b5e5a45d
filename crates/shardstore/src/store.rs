//! The partitioned file store.
//!
//! - `layout` - partition directories and payload I/O
//! - `counter` - store-wide file count
//!
//! Mutations take the owning partition's lock, and add/delete additionally
//! take the counter lock after it. Payload, pattern index and full-text
//! index of a partition change together under that lock. Searches take no
//! partition locks and may observe a mutation in progress.

mod counter;
mod layout;

pub use counter::GlobalCounter;
pub use layout::StorageLayout;

use std::fs;
use std::io::{ErrorKind, Read};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use regex::Regex;

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::fanout::{FanOutExecutor, SearchResults, WorkerPool};
use crate::index::{
    FullTextIndex, FullTextSearchTask, IndexMode, PatternIndex, RegexSearchTask,
};
use crate::name::clean_name;
use crate::partition::{PartitionId, PartitionRouter};
use crate::types::{FileHandle, PartitionStats, StoredFile, Upload, DEFAULT_CONTENT_TYPE};

#[derive(Debug)]
pub struct FileStore {
    config: StoreConfig,
    layout: StorageLayout,
    router: PartitionRouter,
    pattern_index: Arc<PatternIndex>,
    full_text: Arc<FullTextIndex>,
    counter: GlobalCounter,
    executor: FanOutExecutor,
}

impl FileStore {
    /// Opens the store rooted at `config.storage_root`.
    ///
    /// Creates missing partition directories, then rebuilds the pattern
    /// index, the full-text index and the counter from what is on disk.
    /// Any failure here is fatal; a store is never returned half-built.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let init_started = Instant::now();
        config.validate()?;

        let layout = StorageLayout::new(&config);
        let router = PartitionRouter::new(config.partitions)?;
        layout.create_directories()?;

        let started = Instant::now();
        let pattern_index = PatternIndex::new(config.partitions);
        let names = pattern_index.rebuild(&layout)?;
        log::info!(
            "pattern index rebuilt names={} elapsed_ms={}",
            names,
            started.elapsed().as_millis()
        );

        let started = Instant::now();
        let full_text = FullTextIndex::create(&layout)?;
        let documents = full_text.rebuild_all(&layout)?;
        log::info!(
            "full-text index rebuilt documents={} elapsed_ms={}",
            documents,
            started.elapsed().as_millis()
        );

        let started = Instant::now();
        let counter = GlobalCounter::new();
        let files = counter.rebuild(&layout)?;
        log::info!(
            "file counter rebuilt files={} elapsed_ms={}",
            files,
            started.elapsed().as_millis()
        );

        let pool = WorkerPool::new(&config.executor)?;
        let executor = FanOutExecutor::new(pool, config.partitions);

        log::info!(
            "file store open root={} partitions={} files={} total_init_ms={}",
            config.storage_root,
            config.partitions,
            files,
            init_started.elapsed().as_millis()
        );

        Ok(Self {
            config,
            layout,
            router,
            pattern_index: Arc::new(pattern_index),
            full_text: Arc::new(full_text),
            counter,
            executor,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Partition that owns `name` once cleaned.
    pub fn partition_of(&self, name: &str) -> Result<PartitionId> {
        Ok(self.router.partition_of(&clean_name(name)?))
    }

    /// Stores a new file. Fails with `AlreadyExists` if the name is taken,
    /// leaving the existing payload and indexes untouched.
    pub fn add(&self, name: &str, content: impl Read) -> Result<StoredFile> {
        self.add_with_type(name, None, content)
    }

    pub fn add_upload(&self, upload: &Upload) -> Result<StoredFile> {
        self.add_with_type(
            &upload.name,
            upload.content_type.as_deref(),
            upload.bytes.as_slice(),
        )
    }

    /// Adds each upload independently. Uploads to different partitions run
    /// in parallel; results are in input order.
    pub fn add_all(&self, uploads: &[Upload]) -> Vec<Result<StoredFile>> {
        uploads
            .par_iter()
            .map(|upload| self.add_upload(upload))
            .collect()
    }

    fn add_with_type(
        &self,
        raw_name: &str,
        content_type: Option<&str>,
        content: impl Read,
    ) -> Result<StoredFile> {
        let name = clean_name(raw_name)?;
        let partition = self.router.partition_of(&name);

        let _partition_guard = self.router.lock_for(partition).lock();
        if self.layout.contains(partition, &name)? {
            return Err(StoreError::AlreadyExists(name));
        }

        let counter_guard = self.counter.lock();
        let size = self.layout.write_new(partition, &name, content)?;
        self.pattern_index.index(partition, &name);
        if let Err(error) = self
            .full_text
            .index_doc(partition, &name, IndexMode::CreateOrUpdate)
        {
            self.undo_add(partition, &name);
            return Err(error);
        }
        self.counter.increment(&counter_guard);
        drop(counter_guard);

        log::debug!("added name={name} partition={partition} size={size}");
        Ok(receipt(name, partition, content_type, size))
    }

    /// Removes a payload whose full-text document could not be written.
    /// Caller holds the partition lock.
    fn undo_add(&self, partition: PartitionId, name: &str) {
        self.pattern_index.remove(partition, name);
        if let Err(error) = self.layout.remove(partition, name) {
            log::warn!("rollback of {name} in partition {partition} failed: {error}");
        }
    }

    /// Replaces the payload of an existing file. Fails with `NotFound`
    /// without side effects if the name is not stored.
    pub fn modify(&self, name: &str, content: impl Read) -> Result<StoredFile> {
        self.modify_with_type(name, None, content)
    }

    pub fn modify_upload(&self, upload: &Upload) -> Result<StoredFile> {
        self.modify_with_type(
            &upload.name,
            upload.content_type.as_deref(),
            upload.bytes.as_slice(),
        )
    }

    fn modify_with_type(
        &self,
        raw_name: &str,
        content_type: Option<&str>,
        content: impl Read,
    ) -> Result<StoredFile> {
        let name = clean_name(raw_name)?;
        let partition = self.router.partition_of(&name);

        let _partition_guard = self.router.lock_for(partition).lock();
        if !self.layout.contains(partition, &name)? {
            return Err(StoreError::NotFound(name));
        }

        let size = self.layout.write_replace(partition, &name, content)?;
        self.pattern_index.index(partition, &name);
        self.full_text
            .index_doc(partition, &name, IndexMode::CreateOrUpdate)?;

        log::debug!("modified name={name} partition={partition} size={size}");
        Ok(receipt(name, partition, content_type, size))
    }

    /// Deletes a stored file and its index entries.
    pub fn delete(&self, name: &str) -> Result<()> {
        let name = clean_name(name)?;
        let partition = self.router.partition_of(&name);

        let _partition_guard = self.router.lock_for(partition).lock();
        if !self.layout.contains(partition, &name)? {
            return Err(StoreError::NotFound(name));
        }

        let counter_guard = self.counter.lock();
        self.layout.remove(partition, &name)?;
        self.pattern_index.remove(partition, &name);
        self.counter.decrement(&counter_guard);
        drop(counter_guard);
        self.full_text.remove_doc(partition, &name)?;

        log::debug!("deleted name={name} partition={partition}");
        Ok(())
    }

    /// Locates a stored payload. Takes no locks.
    pub fn load(&self, name: &str) -> Result<FileHandle> {
        let name = clean_name(name)?;
        let partition = self.router.partition_of(&name);
        let path = self.layout.file_path(partition, &name);
        let metadata = match fs::metadata(&path) {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Err(StoreError::NotFound(name)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound(name));
            }
            Err(e) => return Err(StoreError::storage(path, e)),
        };
        Ok(FileHandle {
            name,
            partition,
            path,
            size: metadata.len(),
        })
    }

    /// Number of stored files.
    pub fn count(&self) -> u64 {
        self.counter.get()
    }

    /// Full-text search over file names in every partition. Each partition
    /// contributes at most [`crate::index::MAX_HITS`] names.
    pub fn search(&self, query: &str) -> Result<Vec<String>> {
        self.full_text.validate_query(query)?;
        let task = Arc::new(FullTextSearchTask::new(Arc::clone(&self.full_text), query));
        self.executor.run_on_all_partitions(
            task,
            SearchResults::default(),
            self.config.search_timeout(),
        )
    }

    /// Every stored name in which `pattern` finds a match.
    pub fn regex_search(&self, pattern: &str) -> Result<Vec<String>> {
        let regex = Regex::new(pattern)
            .map_err(|e| StoreError::InvalidQuery(format!("{pattern}: {e}")))?;
        let task = Arc::new(RegexSearchTask::new(Arc::clone(&self.pattern_index), regex));
        self.executor.run_on_all_partitions(
            task,
            SearchResults::default(),
            self.config.search_timeout(),
        )
    }

    pub fn partition_stats(&self) -> Result<Vec<PartitionStats>> {
        self.router
            .ids()
            .map(|partition| {
                Ok(PartitionStats {
                    partition,
                    files: self.pattern_index.len(partition),
                    documents: self.full_text.doc_count(partition)?,
                })
            })
            .collect()
    }
}

fn receipt(
    name: String,
    partition: PartitionId,
    content_type: Option<&str>,
    size: u64,
) -> StoredFile {
    StoredFile {
        name,
        partition,
        content_type: content_type.unwrap_or(DEFAULT_CONTENT_TYPE).to_string(),
        size,
    }
}
