use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::partition::PartitionId;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Invalid file name: {0}")]
    InvalidName(String),

    #[error("File already exists: {0}")]
    AlreadyExists(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Fan-out error: {0}")]
    FanOut(#[from] FanOutFailure),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// Wraps an I/O error with the path it happened on.
    pub fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }
}

/// Failures raised by the embedded full-text engine.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error(transparent)]
    Engine(#[from] tantivy::TantivyError),

    #[error("query parse error: {0}")]
    QueryParse(#[from] tantivy::query::QueryParserError),

    #[error("cannot open index directory: {0}")]
    OpenDirectory(#[from] tantivy::directory::error::OpenDirectoryError),

    #[error("no full-text index for partition {0}")]
    UnknownPartition(PartitionId),
}

impl From<tantivy::TantivyError> for StoreError {
    fn from(error: tantivy::TantivyError) -> Self {
        Self::Index(IndexError::Engine(error))
    }
}

impl From<tantivy::query::QueryParserError> for StoreError {
    fn from(error: tantivy::query::QueryParserError) -> Self {
        Self::Index(IndexError::QueryParse(error))
    }
}

/// Reasons a fan-out across partitions did not produce a complete answer.
///
/// Partial results are never returned alongside any of these.
#[derive(Debug, thiserror::Error)]
pub enum FanOutFailure {
    #[error("{task} timed out after {elapsed_ms}ms with {completed}/{expected} partitions done")]
    TimedOut {
        task: &'static str,
        elapsed_ms: u128,
        completed: usize,
        expected: usize,
    },

    #[error("{task} rejected at partition {partition}: worker pool saturated")]
    Rejected {
        task: &'static str,
        partition: PartitionId,
    },

    #[error("{task} failed on {} partition(s): {}", .failures.len(), FailureList(.failures))]
    PartitionsFailed {
        task: &'static str,
        failures: Vec<PartitionFailure>,
    },

    #[error("{task} lost {missing} partition result(s): worker pool shut down")]
    Abandoned { task: &'static str, missing: usize },
}

/// One partition task that returned an error or panicked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionFailure {
    pub partition: PartitionId,
    pub message: String,
}

struct FailureList<'a>(&'a [PartitionFailure]);

impl fmt::Display for FailureList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "[{}] {}", failure.partition, failure.message)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitions_failed_lists_every_partition() {
        let error = FanOutFailure::PartitionsFailed {
            task: "regex-search",
            failures: vec![
                PartitionFailure {
                    partition: PartitionId::new(2),
                    message: "disk gone".to_string(),
                },
                PartitionFailure {
                    partition: PartitionId::new(9),
                    message: "panicked".to_string(),
                },
            ],
        };
        let text = error.to_string();
        assert!(text.contains("2 partition(s)"));
        assert!(text.contains("[2] disk gone"));
        assert!(text.contains("[9] panicked"));
    }

    #[test]
    fn storage_error_keeps_source() {
        let error = StoreError::storage(
            "/tmp/x",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(std::error::Error::source(&error).is_some());
        assert!(error.to_string().contains("/tmp/x"));
    }
}
