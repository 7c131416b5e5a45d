#![allow(dead_code)]

use std::collections::HashSet;

use shardstore::{FileStore, StoreConfig};
use tempfile::TempDir;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn config_in(temp: &TempDir) -> StoreConfig {
    let root = temp.path().join("partition").to_string_lossy().to_string();
    StoreConfig::with_root(root)
}

pub fn open_store(temp: &TempDir) -> FileStore {
    init_logging();
    FileStore::open(config_in(temp)).unwrap()
}

/// Finds `count` names that land in pairwise distinct partitions.
pub fn names_in_distinct_partitions(store: &FileStore, count: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    for i in 0.. {
        let name = format!("file_{i}.dat");
        if seen.insert(store.partition_of(&name).unwrap()) {
            names.push(name);
            if names.len() == count {
                break;
            }
        }
    }
    names
}

pub fn sorted(mut names: Vec<String>) -> Vec<String> {
    names.sort();
    names
}
