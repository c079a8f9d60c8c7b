use std::path::Path;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use filebridge_core::{LogKind, WatchProfile};

use super::helpers::{test_profile, test_store, wait_until};
use crate::actor::profile::ProfileActor;
use crate::logstore::LogQuery;

/// Profile whose child appends a line to `<file>.out`, so launches are
/// observable and countable from the filesystem.
fn echo_profile(name: &str, watch_dir: &Path) -> WatchProfile {
  let mut profile = test_profile(name, watch_dir);
  profile.arguments = "-c \"echo launched >> {FilePath}.out\"".to_string();
  // The child's own output files must never feed back into the pipeline
  profile.ignore_extensions = vec!["out".to_string()];
  profile
}

fn count_lines(path: &Path) -> usize {
  std::fs::read_to_string(path).map(|s| s.lines().count()).unwrap_or(0)
}

#[tokio::test]
async fn test_single_write_launches_exactly_once() {
  let temp = tempfile::TempDir::new().unwrap();
  let watch = temp.path().join("watch");
  std::fs::create_dir(&watch).unwrap();
  let store = test_store(temp.path());

  let handle = ProfileActor::spawn(echo_profile("single", &watch), store, CancellationToken::new()).await;

  let file = watch.join("foo.bin");
  std::fs::write(&file, vec![0u8; 1024]).unwrap();

  let out = watch.join("foo.bin.out");
  wait_until("launch output", Duration::from_secs(5), || {
    let out = out.clone();
    async move { out.exists() }
  })
  .await;

  // No second dispatch: the active set deduplicates in-flight notifications
  // and the cooldown suppresses the following rescans
  tokio::time::sleep(Duration::from_millis(1500)).await;
  assert_eq!(count_lines(&out), 1);

  handle.shutdown().await;
}

#[tokio::test]
async fn test_in_progress_write_defers_the_launch() {
  let temp = tempfile::TempDir::new().unwrap();
  let watch = temp.path().join("watch");
  std::fs::create_dir(&watch).unwrap();
  let store = test_store(temp.path());

  let mut profile = echo_profile("growing", &watch);
  // Three equal samples 100 ms apart: a file written to more often than
  // every 300 ms can never pass the gate
  profile.size_check_interval_ms = 100;
  profile.size_stability_check_count = 3;
  let handle = ProfileActor::spawn(profile, store, CancellationToken::new()).await;

  let file = watch.join("big.dat");
  let writer = {
    let file = file.clone();
    tokio::spawn(async move {
      for _ in 0..8 {
        let mut current = std::fs::read(&file).unwrap_or_default();
        current.extend_from_slice(&[0u8; 4096]);
        std::fs::write(&file, current).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
      }
    })
  };

  // Still being written: the gate must be holding the file back
  tokio::time::sleep(Duration::from_millis(700)).await;
  let out = watch.join("big.dat.out");
  assert!(!out.exists(), "launch fired while the file was still growing");

  writer.await.unwrap();
  wait_until("launch after the writes settle", Duration::from_secs(10), || {
    let out = out.clone();
    async move { out.exists() }
  })
  .await;
  assert_eq!(count_lines(&out), 1);

  handle.shutdown().await;
}

#[tokio::test]
async fn test_marker_policy_launches_target_only_after_marker() {
  let temp = tempfile::TempDir::new().unwrap();
  let watch = temp.path().join("watch");
  std::fs::create_dir(&watch).unwrap();
  let store = test_store(temp.path());

  let mut profile = echo_profile("marker", &watch);
  profile.marker_file_patterns = vec!["*.ready".to_string()];
  let handle = ProfileActor::spawn(profile, store, CancellationToken::new()).await;

  // The data file alone triggers nothing
  let data = watch.join("data.bin");
  std::fs::write(&data, b"payload").unwrap();
  tokio::time::sleep(Duration::from_millis(1500)).await;
  let out = watch.join("data.bin.out");
  assert!(!out.exists(), "launch fired before the marker appeared");

  // The marker admits the stripped target
  std::fs::write(watch.join("data.bin.ready"), b"").unwrap();
  wait_until("target launch", Duration::from_secs(5), || {
    let out = out.clone();
    async move { out.exists() }
  })
  .await;
  assert_eq!(count_lines(&out), 1);

  handle.shutdown().await;
}

#[tokio::test]
async fn test_ignore_list_filters_launches() {
  let temp = tempfile::TempDir::new().unwrap();
  let watch = temp.path().join("watch");
  std::fs::create_dir(&watch).unwrap();
  let store = test_store(temp.path());

  let mut profile = echo_profile("ignores", &watch);
  profile.ignore_extensions.extend(["tmp".to_string(), ".part".to_string()]);
  let handle = ProfileActor::spawn(profile, store, CancellationToken::new()).await;

  for name in ["x.tmp", "x.PART", "x.done"] {
    std::fs::write(watch.join(name), b"data").unwrap();
  }

  wait_until("launch for x.done", Duration::from_secs(5), || {
    let out = watch.join("x.done.out");
    async move { out.exists() }
  })
  .await;
  tokio::time::sleep(Duration::from_millis(500)).await;
  assert!(!watch.join("x.tmp.out").exists());
  assert!(!watch.join("x.PART.out").exists());

  handle.shutdown().await;
}

#[tokio::test]
async fn test_manual_scan_bypasses_cooldown() {
  let temp = tempfile::TempDir::new().unwrap();
  let watch = temp.path().join("watch");
  std::fs::create_dir(&watch).unwrap();
  let store = test_store(temp.path());

  let handle = ProfileActor::spawn(echo_profile("rescan", &watch), store, CancellationToken::new()).await;

  let file = watch.join("foo.bin");
  std::fs::write(&file, b"payload").unwrap();
  let out = watch.join("foo.bin.out");
  wait_until("first launch", Duration::from_secs(5), || {
    let out = out.clone();
    async move { out.exists() }
  })
  .await;
  // Let the first dispatch fully finalize
  tokio::time::sleep(Duration::from_millis(300)).await;

  // The path is in cooldown now; a manual scan re-admits it anyway
  let admitted = handle.scan_now().await.unwrap();
  assert_eq!(admitted, 1);
  wait_until("second launch", Duration::from_secs(5), || {
    let out = out.clone();
    async move { count_lines(&out) == 2 }
  })
  .await;

  handle.shutdown().await;
}

#[tokio::test]
async fn test_missing_directory_installs_idle() {
  let temp = tempfile::TempDir::new().unwrap();
  let store = test_store(temp.path());

  let profile = echo_profile("idle", &temp.path().join("nonexistent"));
  let handle = ProfileActor::spawn(profile, store.clone(), CancellationToken::new()).await;

  // Idle profiles answer messages but admit nothing
  assert_eq!(handle.scan_now().await.unwrap(), 0);

  let page = store
    .query(&LogQuery {
      kind: Some(LogKind::WatcherError),
      ..Default::default()
    })
    .await;
  assert_eq!(page.total, 1);
  assert!(page.entries[0].message.contains("does not exist"));

  handle.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_terminates_running_children() {
  let temp = tempfile::TempDir::new().unwrap();
  let watch = temp.path().join("watch");
  std::fs::create_dir(&watch).unwrap();
  let store = test_store(temp.path());

  let mut profile = test_profile("longrun", &watch);
  profile.arguments = "-c \"sleep 30\"".to_string();
  let handle = ProfileActor::spawn(profile, store.clone(), CancellationToken::new()).await;

  std::fs::write(watch.join("slow.bin"), b"payload").unwrap();
  wait_until("child launch", Duration::from_secs(5), || {
    let store = store.clone();
    async move {
      store
        .query(&LogQuery {
          kind: Some(LogKind::ProcessLaunch),
          ..Default::default()
        })
        .await
        .total
        > 0
    }
  })
  .await;

  // Teardown must not wait the 30 seconds out
  let started = tokio::time::Instant::now();
  handle.shutdown().await;
  assert!(started.elapsed() < Duration::from_secs(15), "shutdown dragged on");

  let errors = store
    .query(&LogQuery {
      kind: Some(LogKind::ProcessError),
      ..Default::default()
    })
    .await;
  assert!(
    errors
      .entries
      .iter()
      .any(|e| e.message.contains("terminated during shutdown"))
  );
}
