//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use codecpack_rs::config::BaseSettings;
use codecpack_rs::writer::read_shard;
use std::path::{Path, PathBuf};

/// Settings sized for fast tests: no error backoff, tiny queue
pub fn test_settings(out_dir: &Path) -> BaseSettings {
    let mut settings = BaseSettings::new(out_dir);
    settings.num_readers = 2;
    settings.qsize = 4;
    settings.lines_per_file = 4;
    settings.error_backoff_ms = 0;
    settings.shutdown_grace_secs = 5;
    settings.progress_interval = 5;
    settings
}

/// Shard files in `dir` whose names start with `prefix`, sorted
pub fn shard_files(dir: &Path, prefix: &str) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| {
            let name = p.file_name().unwrap().to_string_lossy();
            name.starts_with(&format!("{}-worker", prefix)) && name.ends_with(".jsonl.gz")
        })
        .collect();
    files.sort();
    files
}

/// Number of records in one shard file
pub fn count_records(path: &Path) -> usize {
    read_shard(path).unwrap().map(|r| r.unwrap()).count()
}
