//! WatcherTask - merges filesystem notifications and periodic rescans into
//! a stream of admission candidates for one directory (non-recursive).
//!
//! # Design
//!
//! The task bridges notify's sync callbacks with the async pipeline:
//! 1. notify's callback forwards raw results into a bounded channel with
//!    `blocking_send`
//! 2. the task consumes that channel and offers create/modify paths to
//!    admission; delete notifications never produce a launch
//! 3. a single-shot rescan timer enumerates the directory every polling
//!    interval; it is rearmed only after the tick completes, so ticks never
//!    overlap. The first rescan fires immediately at start.
//!
//! # Failure recovery
//!
//! Notification errors are journaled, the notifier is dropped, and after a
//! short pause a fresh notifier is built. Rescans keep running while the
//! notifier is down, so no file is permanently missed. The notifier is owned
//! by this task alone, which serializes recreation.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use filebridge_core::{DetectionMethod, FileEvent, FileEventKind, LogEntry, LogKind, WatchProfile};

use super::admission::Admission;
use crate::logstore::LogStore;

/// Pause before rebuilding the notifier after an error
const NOTIFIER_REBUILD_DELAY: Duration = Duration::from_secs(1);

/// Buffer between notify's callback thread and the async task
const NOTIFY_CHANNEL_CAPACITY: usize = 256;

type NotifyChannel = (RecommendedWatcher, mpsc::Receiver<notify::Result<Event>>);

/// Errors that can occur while building the notifier
#[derive(Debug, thiserror::Error)]
pub(crate) enum WatcherError {
  #[error("Failed to initialize watcher: {0}")]
  Init(#[source] notify::Error),
  #[error("Failed to watch path: {0}")]
  Watch(#[source] notify::Error),
}

/// Async watcher feeding one profile's admission filter
pub(crate) struct WatcherTask {
  profile: Arc<WatchProfile>,
  admission: Arc<Admission>,
  store: Arc<LogStore>,
  cancel: CancellationToken,
}

impl WatcherTask {
  pub(crate) fn new(
    profile: Arc<WatchProfile>,
    admission: Arc<Admission>,
    store: Arc<LogStore>,
    cancel: CancellationToken,
  ) -> Self {
    Self {
      profile,
      admission,
      store,
      cancel,
    }
  }

  /// Spawn the watcher task
  pub(crate) fn spawn(
    profile: Arc<WatchProfile>,
    admission: Arc<Admission>,
    store: Arc<LogStore>,
    cancel: CancellationToken,
  ) -> JoinHandle<()> {
    tokio::spawn(Self::new(profile, admission, store, cancel).run())
  }

  /// Run until cancelled
  pub(crate) async fn run(self) {
    info!(
      profile = %self.profile.name,
      dir = %self.profile.watch_directory.display(),
      "WatcherTask started"
    );

    let mut channel = self.build_notifier().await;
    // First rescan fires immediately; subsequent ones are rearmed after each
    // tick completes
    let mut rescan = Box::pin(tokio::time::sleep(Duration::ZERO));

    loop {
      tokio::select! {
        biased;

        _ = self.cancel.cancelled() => {
          info!(profile = %self.profile.name, "WatcherTask shutting down (cancelled)");
          break;
        }

        () = &mut rescan => {
          self.rescan().await;
          self.admission.gc_cooldown();
          if channel.is_none() {
            channel = self.build_notifier().await;
          }
          rescan.set(tokio::time::sleep(self.profile.polling_interval()));
        }

        event = recv_notification(&mut channel) => {
          match event {
            Some(Ok(event)) => self.handle_event(event).await,
            Some(Err(e)) => channel = self.rebuild_after_error(&e).await,
            None => {
              // Callback sender dropped; treat like an error and rebuild
              warn!(profile = %self.profile.name, "Notification channel closed unexpectedly");
              channel = None;
            }
          }
        }
      }
    }

    info!(profile = %self.profile.name, "WatcherTask stopped");
  }

  /// Offer create/modify notifications to admission; deletes never launch
  async fn handle_event(&self, event: Event) {
    let kind = match event.kind {
      EventKind::Create(_) => FileEventKind::Created,
      EventKind::Modify(_) => FileEventKind::Changed,
      EventKind::Remove(_) => {
        trace!(paths = ?event.paths, "Ignoring delete notification");
        return;
      }
      EventKind::Access(_) | EventKind::Any | EventKind::Other => {
        trace!(kind = ?event.kind, "Ignoring notification");
        return;
      }
    };

    for path in event.paths {
      let candidate = FileEvent::new(path, kind, DetectionMethod::FileSystemEvent);
      self.admission.offer(&candidate).await;
    }
  }

  /// Enumerate the directory and offer every regular file
  async fn rescan(&self) {
    let admitted = scan_directory(
      &self.profile.watch_directory,
      &self.admission,
      &self.store,
      DetectionMethod::Polling,
    )
    .await;
    if admitted > 0 {
      debug!(profile = %self.profile.name, admitted, "Rescan admitted files");
    }
  }

  async fn build_notifier(&self) -> Option<NotifyChannel> {
    match self.try_build_notifier() {
      Ok(channel) => {
        debug!(profile = %self.profile.name, "Filesystem notifier ready");
        Some(channel)
      }
      Err(e) => {
        warn!(
          profile = %self.profile.name,
          error = %e,
          "Failed to initialize filesystem notifications, relying on rescans"
        );
        let entry = LogEntry::new(
          LogKind::WatcherError,
          format!(
            "Profile '{}': filesystem notifications unavailable ({}); polling continues",
            self.profile.name, e
          ),
        );
        if let Err(e) = self.store.append(entry).await {
          warn!(error = %e, "Failed to journal notifier failure");
        }
        None
      }
    }
  }

  fn try_build_notifier(&self) -> Result<NotifyChannel, WatcherError> {
    let (event_tx, event_rx) = mpsc::channel(NOTIFY_CHANNEL_CAPACITY);

    let mut watcher = RecommendedWatcher::new(
      move |result| {
        // Runs on notify's thread; if the channel is full the event is
        // dropped and the next rescan picks the file up
        let _ = event_tx.blocking_send(result);
      },
      notify::Config::default(),
    )
    .map_err(WatcherError::Init)?;

    watcher
      .watch(&self.profile.watch_directory, RecursiveMode::NonRecursive)
      .map_err(WatcherError::Watch)?;

    Ok((watcher, event_rx))
  }

  /// Journal a notification failure, pause briefly, and build a fresh
  /// notifier. Rescans are unaffected.
  async fn rebuild_after_error(&self, error: &notify::Error) -> Option<NotifyChannel> {
    warn!(
      profile = %self.profile.name,
      error = %error,
      "Filesystem notification error, rebuilding notifier"
    );
    let entry = LogEntry::new(
      LogKind::WatcherError,
      format!("Profile '{}': notification error: {}", self.profile.name, error),
    );
    if let Err(e) = self.store.append(entry).await {
      warn!(error = %e, "Failed to journal notification error");
    }

    tokio::time::sleep(NOTIFIER_REBUILD_DELAY).await;
    self.build_notifier().await
  }
}

/// Receive from the notifier channel, or park forever when there is none
/// (rescans and cancellation still drive the loop).
async fn recv_notification(channel: &mut Option<NotifyChannel>) -> Option<notify::Result<Event>> {
  match channel.as_mut() {
    Some((_watcher, rx)) => rx.recv().await,
    None => std::future::pending().await,
  }
}

/// Enumerate `dir` and offer every regular file to admission.
///
/// Used by the rescan tick (`Polling`) and by manual scans (`ManualScan`,
/// which bypasses the cooldown). Returns the number of files admitted.
pub(crate) async fn scan_directory(
  dir: &Path,
  admission: &Admission,
  store: &LogStore,
  detection: DetectionMethod,
) -> usize {
  let mut entries = match tokio::fs::read_dir(dir).await {
    Ok(entries) => entries,
    Err(e) => {
      warn!(dir = %dir.display(), error = %e, "Failed to enumerate watch directory");
      let entry = LogEntry::new(
        LogKind::WatcherError,
        format!("Failed to enumerate {}: {}", dir.display(), e),
      );
      if let Err(e) = store.append(entry).await {
        warn!(error = %e, "Failed to journal enumeration failure");
      }
      return 0;
    }
  };

  let mut admitted = 0;
  loop {
    match entries.next_entry().await {
      Ok(Some(dir_entry)) => {
        let is_file = dir_entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        if !is_file {
          continue;
        }
        let candidate = FileEvent::new(dir_entry.path(), FileEventKind::Created, detection);
        if admission.offer(&candidate).await {
          admitted += 1;
        }
      }
      Ok(None) => break,
      Err(e) => {
        warn!(dir = %dir.display(), error = %e, "Directory enumeration aborted");
        break;
      }
    }
  }
  admitted
}
