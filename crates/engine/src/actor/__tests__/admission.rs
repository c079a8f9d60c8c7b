use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;

use filebridge_core::{DetectionMethod, FileEvent, FileEventKind, WatchProfile};

use super::helpers::{test_profile, test_store};
use crate::actor::admission::Admission;

fn candidate(path: &Path, detection: DetectionMethod) -> FileEvent {
  FileEvent::new(path.to_path_buf(), FileEventKind::Created, detection)
}

fn admission_for(profile: WatchProfile, dir: &Path, capacity: usize) -> (Admission, mpsc::Receiver<std::path::PathBuf>) {
  let (tx, rx) = mpsc::channel(capacity);
  let store = test_store(dir);
  (Admission::new(Arc::new(profile), store, tx), rx)
}

#[tokio::test]
async fn test_admission_is_idempotent_while_active() {
  let temp = tempfile::TempDir::new().unwrap();
  let file = temp.path().join("a.bin");
  std::fs::write(&file, b"payload").unwrap();

  let profile = test_profile("idem", temp.path());
  let (admission, mut rx) = admission_for(profile, temp.path(), 10);

  assert!(admission.offer(&candidate(&file, DetectionMethod::FileSystemEvent)).await);
  // A second notification for the same path is rejected by set membership
  assert!(!admission.offer(&candidate(&file, DetectionMethod::Polling)).await);
  assert!(admission.is_active(&file));

  assert_eq!(rx.recv().await.unwrap(), file);
  assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_directories_and_missing_files_are_rejected() {
  let temp = tempfile::TempDir::new().unwrap();
  let subdir = temp.path().join("sub");
  std::fs::create_dir(&subdir).unwrap();

  let profile = test_profile("reject", temp.path());
  let (admission, _rx) = admission_for(profile, temp.path(), 10);

  assert!(!admission.offer(&candidate(&subdir, DetectionMethod::Polling)).await);
  assert!(
    !admission
      .offer(&candidate(&temp.path().join("ghost.bin"), DetectionMethod::Polling))
      .await
  );
}

#[tokio::test]
async fn test_ignored_extensions_are_rejected() {
  let temp = tempfile::TempDir::new().unwrap();
  for name in ["x.tmp", "x.PART", "x.done"] {
    std::fs::write(temp.path().join(name), b"data").unwrap();
  }

  let mut profile = test_profile("ignore", temp.path());
  profile.ignore_extensions = vec!["tmp".to_string(), ".part".to_string()];
  let (admission, mut rx) = admission_for(profile, temp.path(), 10);

  assert!(
    !admission
      .offer(&candidate(&temp.path().join("x.tmp"), DetectionMethod::Polling))
      .await
  );
  assert!(
    !admission
      .offer(&candidate(&temp.path().join("x.PART"), DetectionMethod::Polling))
      .await
  );
  assert!(
    admission
      .offer(&candidate(&temp.path().join("x.done"), DetectionMethod::Polling))
      .await
  );
  assert_eq!(rx.recv().await.unwrap(), temp.path().join("x.done"));
}

#[tokio::test]
async fn test_marker_resolution_requires_existing_target() {
  let temp = tempfile::TempDir::new().unwrap();
  let target = temp.path().join("data.bin");
  let marker = temp.path().join("data.bin.ready");
  let orphan = temp.path().join("lost.bin.ready");
  std::fs::write(&target, b"payload").unwrap();
  std::fs::write(&marker, b"").unwrap();
  std::fs::write(&orphan, b"").unwrap();

  let mut profile = test_profile("marker", temp.path());
  profile.marker_file_patterns = vec!["*.ready".to_string()];
  let (admission, mut rx) = admission_for(profile, temp.path(), 10);

  // The data file itself is not a marker
  assert!(!admission.offer(&candidate(&target, DetectionMethod::Polling)).await);
  // A marker without its target admits nothing
  assert!(!admission.offer(&candidate(&orphan, DetectionMethod::Polling)).await);
  // The marker admits the stripped target
  assert!(admission.offer(&candidate(&marker, DetectionMethod::Polling)).await);
  assert_eq!(rx.recv().await.unwrap(), target);
}

#[tokio::test]
async fn test_cooldown_suppresses_until_manual_scan() {
  let temp = tempfile::TempDir::new().unwrap();
  let file = temp.path().join("a.bin");
  std::fs::write(&file, b"payload").unwrap();

  let profile = test_profile("cooldown", temp.path());
  let (admission, mut rx) = admission_for(profile, temp.path(), 10);

  assert!(admission.offer(&candidate(&file, DetectionMethod::Polling)).await);
  assert_eq!(rx.recv().await.unwrap(), file);

  // Worker finalization: release the slot and record completion
  admission.finish(&file);
  admission.record_cooldown(&file);

  // Automatic detection is suppressed within the horizon
  assert!(!admission.offer(&candidate(&file, DetectionMethod::FileSystemEvent)).await);
  assert!(!admission.offer(&candidate(&file, DetectionMethod::Polling)).await);
  // A manual scan is not
  assert!(admission.offer(&candidate(&file, DetectionMethod::ManualScan)).await);
  assert_eq!(rx.recv().await.unwrap(), file);
}

#[tokio::test]
async fn test_queue_full_releases_the_active_slot() {
  let temp = tempfile::TempDir::new().unwrap();
  let first = temp.path().join("first.bin");
  let second = temp.path().join("second.bin");
  std::fs::write(&first, b"1").unwrap();
  std::fs::write(&second, b"2").unwrap();

  let profile = test_profile("full", temp.path());
  let (admission, mut rx) = admission_for(profile, temp.path(), 1);

  assert!(admission.offer(&candidate(&first, DetectionMethod::Polling)).await);
  // Queue capacity exhausted: the drop must release the slot for a retry
  assert!(!admission.offer(&candidate(&second, DetectionMethod::Polling)).await);
  assert!(!admission.is_active(&second));

  // Once the queue drains, the same file is admissible again
  assert_eq!(rx.recv().await.unwrap(), first);
  assert!(admission.offer(&candidate(&second, DetectionMethod::Polling)).await);
}

#[tokio::test]
async fn test_closed_queue_rejects_everything() {
  let temp = tempfile::TempDir::new().unwrap();
  let file = temp.path().join("a.bin");
  std::fs::write(&file, b"payload").unwrap();

  let profile = test_profile("closed", temp.path());
  let (admission, _rx) = admission_for(profile, temp.path(), 10);

  admission.close_queue().await;
  assert!(!admission.offer(&candidate(&file, DetectionMethod::Polling)).await);
  assert!(!admission.is_active(&file));
}

#[tokio::test]
async fn test_cooldown_gc_keeps_fresh_entries() {
  let temp = tempfile::TempDir::new().unwrap();
  let file = temp.path().join("a.bin");
  std::fs::write(&file, b"payload").unwrap();

  let profile = test_profile("gc", temp.path());
  let (admission, _rx) = admission_for(profile, temp.path(), 10);

  admission.record_cooldown(&file);
  admission.gc_cooldown();
  assert_eq!(admission.cooldown_len(), 1);
}
