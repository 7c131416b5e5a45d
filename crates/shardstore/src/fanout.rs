//! Concurrent execution of one operation across every partition.
//!
//! - `pool` - bounded worker pool (core/max workers, bounded queue, rejection)
//! - `executor` - per-partition work items, deadline, fail-closed consolidation

mod executor;
mod pool;

pub use executor::{Consolidator, FanOutExecutor, PartitionTask, SearchResults};
pub use pool::{Job, Rejected, WorkerPool};
