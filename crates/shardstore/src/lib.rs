//! Partitioned file store with parallel name search.
//!
//! Files are routed by a stable hash of their name to one of a fixed number
//! of partitions. Each partition owns its payload directory, an in-memory
//! name set for regex filters and an on-disk full-text index over tokenized
//! names. Searches fan out over every partition on a bounded worker pool and
//! fail as a whole if any partition fails or the deadline passes.

pub mod config;
pub mod error;
pub mod fanout;
pub mod index;
pub mod name;
pub mod partition;
pub mod store;
pub mod types;

// Re-export main types
pub use config::{ExecutorConfig, StoreConfig};
pub use error::{FanOutFailure, IndexError, PartitionFailure, Result, StoreError};
pub use fanout::{Consolidator, FanOutExecutor, PartitionTask, SearchResults, WorkerPool};
pub use index::{FullTextIndex, IndexMode, PatternIndex, MAX_HITS};
pub use name::clean_name;
pub use partition::{name_hash, PartitionId, PartitionRouter, DEFAULT_PARTITIONS};
pub use store::{FileStore, GlobalCounter, StorageLayout};
pub use types::{FileHandle, PartitionStats, StoredFile, Upload, DEFAULT_CONTENT_TYPE};
