//! Shared fixtures for actor tests

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use filebridge_core::WatchProfile;

use crate::logstore::{LogStore, LogStoreConfig};

/// Store writing into `<dir>/logs`
pub(crate) fn test_store(dir: &Path) -> Arc<LogStore> {
  Arc::new(
    LogStore::new(LogStoreConfig {
      directory: dir.join("logs"),
      max_logs_per_file: 1000,
      retention_days: 0,
    })
    .expect("create store"),
  )
}

/// A fast-cadence profile pointed at `watch_dir`, launching `/bin/sh`
pub(crate) fn test_profile(name: &str, watch_dir: &Path) -> WatchProfile {
  WatchProfile {
    name: name.to_string(),
    watch_directory: watch_dir.to_path_buf(),
    polling_interval_seconds: 1,
    executable_path: PathBuf::from("/bin/sh"),
    arguments: String::new(),
    size_check_interval_ms: 10,
    size_stability_check_count: 1,
    ..Default::default()
  }
}

/// Poll an async condition until it holds or the timeout expires
pub(crate) async fn wait_until<F, Fut>(what: &str, timeout: Duration, cond: F)
where
  F: Fn() -> Fut,
  Fut: std::future::Future<Output = bool>,
{
  let deadline = tokio::time::Instant::now() + timeout;
  while tokio::time::Instant::now() < deadline {
    if cond().await {
      return;
    }
    tokio::time::sleep(Duration::from_millis(25)).await;
  }
  panic!("timed out waiting for {what}");
}
