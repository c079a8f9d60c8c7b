use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use filebridge_core::{DetectionMethod, FileEvent, FileEventKind, LogKind};

use super::helpers::{test_profile, test_store, wait_until};
use crate::actor::launcher::{Launcher, expand_arguments, split_arguments};
use crate::logstore::{LogQuery, LogStore};

fn event_for(path: &Path) -> FileEvent {
  FileEvent::new(path.to_path_buf(), FileEventKind::Created, DetectionMethod::WorkQueue)
}

async fn entries_matching(store: &LogStore, kind: LogKind, needle: &str) -> usize {
  store
    .query(&LogQuery {
      kind: Some(kind),
      page_size: 1000,
      ..Default::default()
    })
    .await
    .entries
    .iter()
    .filter(|e| e.message.contains(needle))
    .count()
}

#[test]
fn test_split_arguments_respects_quotes() {
  assert_eq!(split_arguments("a b  c"), vec!["a", "b", "c"]);
  assert_eq!(
    split_arguments("--in \"{FilePath}\" --flag"),
    vec!["--in", "{FilePath}", "--flag"]
  );
  assert_eq!(split_arguments("\"two words\" three"), vec!["two words", "three"]);
  // Quotes may produce an empty token; whitespace alone produces none
  assert_eq!(split_arguments("\"\""), vec![""]);
  assert_eq!(split_arguments("   "), Vec::<String>::new());
  assert_eq!(split_arguments(""), Vec::<String>::new());
}

#[test]
fn test_expansion_happens_after_tokenization() {
  // A substituted value containing spaces must stay one argument
  let args = expand_arguments("--in \"{FilePath}\" --flag", Path::new("/abs/w/has space.dat"));
  assert_eq!(args, vec!["--in", "/abs/w/has space.dat", "--flag"]);

  let args = expand_arguments("{FolderPath} {FilePath}", Path::new("/abs/w/file.bin"));
  assert_eq!(args, vec!["/abs/w", "/abs/w/file.bin"]);
}

#[tokio::test]
async fn test_missing_executable_journals_process_error() {
  let temp = tempfile::TempDir::new().unwrap();
  let store = test_store(temp.path());

  let mut profile = test_profile("noexe", temp.path());
  profile.executable_path = PathBuf::from("/does/not/exist");
  let launcher = Launcher::new(Arc::new(profile), Arc::clone(&store), CancellationToken::new());

  let file = temp.path().join("a.bin");
  std::fs::write(&file, b"payload").unwrap();
  launcher.launch(&event_for(&file)).await.unwrap();

  assert_eq!(launcher.running(), 0);
  assert_eq!(
    entries_matching(&store, LogKind::ProcessError, "executable not found").await,
    1
  );
}

#[tokio::test]
async fn test_successful_exit_is_journaled_as_launch() {
  let temp = tempfile::TempDir::new().unwrap();
  let store = test_store(temp.path());

  let mut profile = test_profile("ok", temp.path());
  profile.arguments = "-c \"exit 0\"".to_string();
  let launcher = Launcher::new(Arc::new(profile), Arc::clone(&store), CancellationToken::new());

  let file = temp.path().join("a.bin");
  std::fs::write(&file, b"payload").unwrap();
  launcher.launch(&event_for(&file)).await.unwrap();

  wait_until("clean exit journal entry", Duration::from_secs(5), || async {
    entries_matching(&store, LogKind::ProcessLaunch, "completed successfully").await == 1
  })
  .await;
  assert_eq!(launcher.running(), 0);
}

#[tokio::test]
async fn test_nonzero_exit_is_journaled_with_the_code() {
  let temp = tempfile::TempDir::new().unwrap();
  let store = test_store(temp.path());

  let mut profile = test_profile("fail", temp.path());
  profile.arguments = "-c \"exit 3\"".to_string();
  let launcher = Launcher::new(Arc::new(profile), Arc::clone(&store), CancellationToken::new());

  let file = temp.path().join("a.bin");
  std::fs::write(&file, b"payload").unwrap();
  launcher.launch(&event_for(&file)).await.unwrap();

  wait_until("exit-code journal entry", Duration::from_secs(5), || async {
    entries_matching(&store, LogKind::ProcessError, "exited with code 3").await == 1
  })
  .await;
}

#[tokio::test]
async fn test_concurrency_bound_is_never_exceeded() {
  let temp = tempfile::TempDir::new().unwrap();
  let store = test_store(temp.path());

  let mut profile = test_profile("bounded", temp.path());
  profile.max_concurrent_processes = 2;
  profile.arguments = "-c \"sleep 0.4\"".to_string();
  let launcher = Arc::new(Launcher::new(
    Arc::new(profile),
    Arc::clone(&store),
    CancellationToken::new(),
  ));

  let mut tasks = Vec::new();
  for i in 0..5 {
    let file = temp.path().join(format!("file{i}.bin"));
    std::fs::write(&file, b"payload").unwrap();
    let launcher = Arc::clone(&launcher);
    tasks.push(tokio::spawn(async move {
      launcher.launch(&event_for(&file)).await.unwrap();
    }));
  }

  // Sample the running set while the batch works through the bound
  let mut max_seen = 0;
  let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
  while tokio::time::Instant::now() < deadline {
    max_seen = max_seen.max(launcher.running());
    if entries_matching(&store, LogKind::ProcessLaunch, "completed successfully").await == 5 {
      break;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }

  for task in tasks {
    task.await.unwrap();
  }
  assert!(max_seen <= 2, "observed {max_seen} concurrent children");
  assert_eq!(
    entries_matching(&store, LogKind::ProcessLaunch, "completed successfully").await,
    5
  );
}

#[tokio::test]
async fn test_cancellation_kills_running_children() {
  let temp = tempfile::TempDir::new().unwrap();
  let store = test_store(temp.path());
  let cancel = CancellationToken::new();

  let mut profile = test_profile("killed", temp.path());
  profile.arguments = "-c \"sleep 30\"".to_string();
  let launcher = Launcher::new(Arc::new(profile), Arc::clone(&store), cancel.clone());

  let file = temp.path().join("a.bin");
  std::fs::write(&file, b"payload").unwrap();
  launcher.launch(&event_for(&file)).await.unwrap();

  wait_until("child to start", Duration::from_secs(5), || async {
    launcher.running() == 1
  })
  .await;

  cancel.cancel();
  wait_until("child to be reaped", Duration::from_secs(5), || async {
    launcher.running() == 0
  })
  .await;
  assert_eq!(
    entries_matching(&store, LogKind::ProcessError, "terminated during shutdown").await,
    1
  );
}
