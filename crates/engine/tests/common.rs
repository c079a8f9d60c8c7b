//! Shared fixtures for engine integration tests
#![allow(dead_code)] // each test target uses a different subset

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use filebridge_core::WatchProfile;
use filebridge_engine::{LogStore, LogStoreConfig};

/// Store writing into `<dir>/logs`
pub fn test_store(dir: &Path) -> Arc<LogStore> {
  Arc::new(
    LogStore::new(LogStoreConfig {
      directory: dir.join("logs"),
      max_logs_per_file: 1000,
      retention_days: 0,
    })
    .expect("create store"),
  )
}

/// Fast-cadence profile whose child appends a line to `<file>.out`
pub fn echo_profile(name: &str, watch_dir: &Path) -> WatchProfile {
  WatchProfile {
    name: name.to_string(),
    watch_directory: watch_dir.to_path_buf(),
    polling_interval_seconds: 1,
    executable_path: PathBuf::from("/bin/sh"),
    arguments: "-c \"echo launched >> {FilePath}.out\"".to_string(),
    // The child's own output files must never feed back into the pipeline
    ignore_extensions: vec!["out".to_string()],
    size_check_interval_ms: 10,
    size_stability_check_count: 1,
    ..Default::default()
  }
}

pub fn count_lines(path: &Path) -> usize {
  std::fs::read_to_string(path).map(|s| s.lines().count()).unwrap_or(0)
}

/// Poll a sync condition until it holds or the timeout expires
pub async fn wait_until<F: Fn() -> bool>(what: &str, timeout: Duration, cond: F) {
  let deadline = tokio::time::Instant::now() + timeout;
  while tokio::time::Instant::now() < deadline {
    if cond() {
      return;
    }
    tokio::time::sleep(Duration::from_millis(25)).await;
  }
  panic!("timed out waiting for {what}");
}
