//! Values handed to and returned from the file store.

use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{Result, StoreError};
use crate::partition::PartitionId;

/// Content type recorded when an upload does not name one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// One file to be added, as received from a client.
#[derive(Debug, Clone)]
pub struct Upload {
    pub name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content_type: None,
            bytes: bytes.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Receipt for a payload written by `add` or `modify`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredFile {
    /// Cleaned name the payload is stored under.
    pub name: String,
    pub partition: PartitionId,
    pub content_type: String,
    pub size: u64,
}

/// A stored payload located by `load`. Reading goes to disk each time, so
/// a concurrent delete shows up as `NotFound`.
#[derive(Debug, Clone)]
pub struct FileHandle {
    pub name: String,
    pub partition: PartitionId,
    pub path: PathBuf,
    pub size: u64,
}

impl FileHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn open(&self) -> Result<File> {
        File::open(&self.path).map_err(|e| self.io_error(e))
    }

    pub fn read_bytes(&self) -> Result<Vec<u8>> {
        fs::read(&self.path).map_err(|e| self.io_error(e))
    }

    fn io_error(&self, error: std::io::Error) -> StoreError {
        if error.kind() == ErrorKind::NotFound {
            StoreError::NotFound(self.name.clone())
        } else {
            StoreError::storage(&self.path, error)
        }
    }
}

/// Per-partition sizes reported by `FileStore::partition_stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PartitionStats {
    pub partition: PartitionId,
    /// Names in the pattern index.
    pub files: usize,
    /// Live documents in the full-text index.
    pub documents: u64,
}
