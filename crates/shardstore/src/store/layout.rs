//! On-disk layout of the partitions and the payload I/O on top of it.
//!
//! For partition `p`:
//! - `<storage_root><p>/<storage_dir>/<file name>` holds payloads
//! - `<storage_root><p>/<index_dir>/` holds the full-text index
//! - `<storage_root><p>/` itself is the staging area for in-flight writes,
//!   so a half-written payload is never visible under `<storage_dir>`

use std::fs;
use std::io::{self, ErrorKind, Read};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::partition::PartitionId;

#[derive(Debug, Clone)]
pub struct StorageLayout {
    storage_root: String,
    storage_dir: String,
    index_dir: String,
    partitions: usize,
}

impl StorageLayout {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            storage_root: config.storage_root.clone(),
            storage_dir: config.storage_dir.clone(),
            index_dir: config.index_dir.clone(),
            partitions: config.partitions,
        }
    }

    pub fn partitions(&self) -> usize {
        self.partitions
    }

    pub fn ids(&self) -> impl Iterator<Item = PartitionId> {
        (0..self.partitions).map(PartitionId::new)
    }

    /// `<storage_root><p>`; the number is appended to the prefix as-is.
    pub fn partition_root(&self, partition: PartitionId) -> PathBuf {
        PathBuf::from(format!("{}{}", self.storage_root, partition))
    }

    pub fn storage_location(&self, partition: PartitionId) -> PathBuf {
        self.partition_root(partition).join(&self.storage_dir)
    }

    pub fn index_location(&self, partition: PartitionId) -> PathBuf {
        self.partition_root(partition).join(&self.index_dir)
    }

    pub fn file_path(&self, partition: PartitionId, name: &str) -> PathBuf {
        self.storage_location(partition).join(name)
    }

    /// Creates the payload and index directories of every partition.
    pub fn create_directories(&self) -> Result<()> {
        for partition in self.ids() {
            for dir in [
                self.storage_location(partition),
                self.index_location(partition),
            ] {
                fs::create_dir_all(&dir).map_err(|e| StoreError::storage(&dir, e))?;
            }
        }
        Ok(())
    }

    /// Names of the regular files stored in `partition`.
    pub fn list_files(&self, partition: PartitionId) -> Result<Vec<String>> {
        let dir = self.storage_location(partition);
        let mut names = Vec::new();
        for entry in read_dir(&dir)? {
            let entry = entry.map_err(|e| StoreError::storage(&dir, e))?;
            let file_type = entry.file_type().map_err(|e| StoreError::storage(entry.path(), e))?;
            if !file_type.is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(raw) => log::warn!("skipping non UTF-8 file name {raw:?} in {}", dir.display()),
            }
        }
        Ok(names)
    }

    /// Number of regular files stored in `partition`.
    pub fn count_files(&self, partition: PartitionId) -> Result<u64> {
        let dir = self.storage_location(partition);
        let mut count = 0u64;
        for entry in read_dir(&dir)? {
            let entry = entry.map_err(|e| StoreError::storage(&dir, e))?;
            if entry
                .file_type()
                .map_err(|e| StoreError::storage(entry.path(), e))?
                .is_file()
            {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Whether `name` is stored in `partition`. I/O failures other than
    /// "missing" are surfaced rather than read as absence.
    pub fn contains(&self, partition: PartitionId, name: &str) -> Result<bool> {
        let path = self.file_path(partition, name);
        match fs::metadata(&path) {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::storage(path, e)),
        }
    }

    /// Writes a new payload; fails with `AlreadyExists` instead of replacing.
    pub fn write_new(
        &self,
        partition: PartitionId,
        name: &str,
        content: impl Read,
    ) -> Result<u64> {
        let target = self.file_path(partition, name);
        let (staged, size) = self.stage(partition, content)?;
        staged.persist_noclobber(&target).map_err(|e| {
            if e.error.kind() == ErrorKind::AlreadyExists {
                StoreError::AlreadyExists(name.to_string())
            } else {
                StoreError::storage(&target, e.error)
            }
        })?;
        Ok(size)
    }

    /// Atomically replaces the payload of `name`.
    pub fn write_replace(
        &self,
        partition: PartitionId,
        name: &str,
        content: impl Read,
    ) -> Result<u64> {
        let target = self.file_path(partition, name);
        let (staged, size) = self.stage(partition, content)?;
        staged
            .persist(&target)
            .map_err(|e| StoreError::storage(&target, e.error))?;
        Ok(size)
    }

    pub fn remove(&self, partition: PartitionId, name: &str) -> Result<()> {
        let path = self.file_path(partition, name);
        fs::remove_file(&path).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                StoreError::NotFound(name.to_string())
            } else {
                StoreError::storage(path, e)
            }
        })
    }

    fn stage(
        &self,
        partition: PartitionId,
        mut content: impl Read,
    ) -> Result<(NamedTempFile, u64)> {
        let root = self.partition_root(partition);
        let mut staged = NamedTempFile::new_in(&root).map_err(|e| StoreError::storage(&root, e))?;
        let size = io::copy(&mut content, &mut staged)
            .map_err(|e| StoreError::storage(staged.path(), e))?;
        staged
            .as_file()
            .sync_data()
            .map_err(|e| StoreError::storage(staged.path(), e))?;
        Ok((staged, size))
    }
}

fn read_dir(dir: &Path) -> Result<fs::ReadDir> {
    fs::read_dir(dir).map_err(|e| StoreError::storage(dir, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn layout(temp: &TempDir) -> StorageLayout {
        let root = temp.path().join("drive").to_string_lossy().to_string();
        let layout = StorageLayout::new(&StoreConfig {
            partitions: 4,
            ..StoreConfig::with_root(root)
        });
        layout.create_directories().unwrap();
        layout
    }

    #[test]
    fn paths_append_partition_number_to_prefix() {
        let temp = TempDir::new().unwrap();
        let layout = layout(&temp);
        let p = PartitionId::new(3);
        assert_eq!(layout.partition_root(p), temp.path().join("drive3"));
        assert_eq!(layout.storage_location(p), temp.path().join("drive3/files"));
        assert_eq!(layout.index_location(p), temp.path().join("drive3/index"));
        assert!(layout.storage_location(p).is_dir());
        assert!(layout.index_location(p).is_dir());
    }

    #[test]
    fn write_new_refuses_to_clobber() {
        let temp = TempDir::new().unwrap();
        let layout = layout(&temp);
        let p = PartitionId::new(1);
        assert_eq!(layout.write_new(p, "a.txt", &b"first"[..]).unwrap(), 5);
        let err = layout.write_new(p, "a.txt", &b"second"[..]).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
        assert_eq!(fs::read(layout.file_path(p, "a.txt")).unwrap(), b"first");
    }

    #[test]
    fn write_replace_overwrites() {
        let temp = TempDir::new().unwrap();
        let layout = layout(&temp);
        let p = PartitionId::new(0);
        layout.write_new(p, "a.txt", &b"first"[..]).unwrap();
        layout.write_replace(p, "a.txt", &b"2nd"[..]).unwrap();
        assert_eq!(fs::read(layout.file_path(p, "a.txt")).unwrap(), b"2nd");
    }

    #[test]
    fn staging_leaves_no_trace_in_storage_dir() {
        let temp = TempDir::new().unwrap();
        let layout = layout(&temp);
        let p = PartitionId::new(2);
        layout.write_new(p, "one.bin", &b"1"[..]).unwrap();
        layout.write_new(p, "two.bin", &b"2"[..]).unwrap();
        let mut names = layout.list_files(p).unwrap();
        names.sort();
        assert_eq!(names, vec!["one.bin", "two.bin"]);
        assert_eq!(layout.count_files(p).unwrap(), 2);
    }

    #[test]
    fn listing_skips_directories() {
        let temp = TempDir::new().unwrap();
        let layout = layout(&temp);
        let p = PartitionId::new(0);
        fs::create_dir(layout.storage_location(p).join("nested")).unwrap();
        fs::write(layout.file_path(p, "x"), b"x").unwrap();
        assert_eq!(layout.list_files(p).unwrap(), vec!["x"]);
        assert_eq!(layout.count_files(p).unwrap(), 1);
    }

    #[test]
    fn remove_missing_is_not_found() {
        let temp = TempDir::new().unwrap();
        let layout = layout(&temp);
        let err = layout.remove(PartitionId::new(0), "ghost").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(!layout.contains(PartitionId::new(0), "ghost").unwrap());
    }

    #[test]
    fn unreadable_partition_is_storage_error() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("missing").to_string_lossy().to_string();
        let layout = StorageLayout::new(&StoreConfig::with_root(root));
        let err = layout.list_files(PartitionId::new(0)).unwrap_err();
        assert!(matches!(err, StoreError::Storage { .. }));
    }
}
