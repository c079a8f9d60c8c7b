//! ProfileActor - owns the whole pipeline for one watch profile.
//!
//! The actor owns the watcher task, the bounded work queue, the worker pool,
//! and the launcher. It processes requests (manual scan, shutdown) until
//! cancelled and then tears the pipeline down in stages:
//!
//! 1. cancel the watcher and rescan timer
//! 2. close the work queue so workers finish their current item and drain
//! 3. wait up to 5 seconds for the workers, then cancel them
//! 4. terminate still-running children (kill + reap)
//!
//! A profile whose watch directory does not exist at start journals the
//! error and stays installed but idle: it still answers messages, and a
//! manual scan on it admits nothing.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use filebridge_core::{DetectionMethod, LogEntry, LogKind, WatchProfile};

use super::admission::Admission;
use super::handle::ProfileHandle;
use super::launcher::Launcher;
use super::message::ProfileMessage;
use super::watcher::{WatcherTask, scan_directory};
use super::worker::spawn_workers;
use crate::logstore::LogStore;

/// Capacity of the bounded work queue between admission and the workers
pub(crate) const WORK_QUEUE_CAPACITY: usize = 1000;

/// How long workers get to drain after the queue closes
const WORKER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait for children to be reaped at teardown
const CHILD_REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// The running pipeline of an active profile
struct Pipeline {
  admission: Arc<Admission>,
  launcher: Arc<Launcher>,
  watcher_cancel: CancellationToken,
  watcher_handle: JoinHandle<()>,
  worker_cancel: CancellationToken,
  worker_handles: Vec<JoinHandle<()>>,
  launcher_cancel: CancellationToken,
}

/// Per-profile actor owning watcher, queue, workers, and launcher
pub(crate) struct ProfileActor {
  profile: Arc<WatchProfile>,
  store: Arc<LogStore>,
  pipeline: Option<Pipeline>,
  request_rx: mpsc::Receiver<ProfileMessage>,
  cancel: CancellationToken,
}

impl ProfileActor {
  /// Spawn the actor and return a handle for requests.
  ///
  /// Never fails: a profile with a missing watch directory is journaled and
  /// installed idle so sibling profiles are unaffected.
  pub(crate) async fn spawn(profile: WatchProfile, store: Arc<LogStore>, cancel: CancellationToken) -> ProfileHandle {
    let profile = Arc::new(profile);
    let pipeline = build_pipeline(&profile, &store).await;
    let (tx, request_rx) = mpsc::channel(32);

    let actor = Self {
      profile,
      store,
      pipeline,
      request_rx,
      cancel,
    };
    tokio::spawn(actor.run());

    ProfileHandle::new(tx)
  }

  async fn run(mut self) {
    info!(
      profile = %self.profile.name,
      dir = %self.profile.watch_directory.display(),
      idle = self.pipeline.is_none(),
      "ProfileActor started"
    );

    loop {
      tokio::select! {
        biased;

        _ = self.cancel.cancelled() => {
          info!(profile = %self.profile.name, "ProfileActor shutting down (cancelled)");
          break;
        }

        msg = self.request_rx.recv() => {
          match msg {
            Some(ProfileMessage::ScanNow { reply }) => {
              let admitted = self.scan_now().await;
              let _ = reply.send(admitted).await;
            }
            Some(ProfileMessage::Shutdown) => {
              info!(profile = %self.profile.name, "ProfileActor shutting down (requested)");
              break;
            }
            None => {
              info!(profile = %self.profile.name, "ProfileActor shutting down (channel closed)");
              break;
            }
          }
        }
      }
    }

    self.cleanup().await;
    info!(profile = %self.profile.name, "ProfileActor stopped");
  }

  /// Enumerate the watch directory with the cooldown bypassed
  async fn scan_now(&self) -> usize {
    let Some(pipeline) = &self.pipeline else {
      debug!(profile = %self.profile.name, "Profile is idle, manual scan admits nothing");
      return 0;
    };
    let admitted = scan_directory(
      &self.profile.watch_directory,
      &pipeline.admission,
      &self.store,
      DetectionMethod::ManualScan,
    )
    .await;
    info!(profile = %self.profile.name, admitted, "Manual scan complete");
    admitted
  }

  /// Staged teardown; safe to call with the pipeline already gone
  async fn cleanup(&mut self) {
    let Some(pipeline) = self.pipeline.take() else {
      return;
    };

    // 1. Stop producing candidates
    pipeline.watcher_cancel.cancel();
    if tokio::time::timeout(Duration::from_secs(5), pipeline.watcher_handle)
      .await
      .is_err()
    {
      warn!(profile = %self.profile.name, "Watcher did not stop in time");
    }

    // 2. Close the queue; workers finish their current item and drain
    pipeline.admission.close_queue().await;

    // 3. Bounded drain, then hard-cancel stragglers
    let drain = futures::future::join_all(pipeline.worker_handles);
    if tokio::time::timeout(WORKER_DRAIN_TIMEOUT, drain).await.is_err() {
      warn!(
        profile = %self.profile.name,
        "Workers did not drain within {WORKER_DRAIN_TIMEOUT:?}, cancelling"
      );
      pipeline.worker_cancel.cancel();
    }

    // 4. Terminate children and wait for the exit tasks to reap them
    pipeline.launcher_cancel.cancel();
    let reap_deadline = tokio::time::Instant::now() + CHILD_REAP_TIMEOUT;
    while pipeline.launcher.running() > 0 && tokio::time::Instant::now() < reap_deadline {
      tokio::time::sleep(Duration::from_millis(25)).await;
    }
    if pipeline.launcher.running() > 0 {
      warn!(profile = %self.profile.name, "Some children were not reaped before teardown finished");
    }
  }
}

/// Assemble admission, launcher, workers, and watcher for a profile, or
/// `None` (idle) when the watch directory is missing.
async fn build_pipeline(profile: &Arc<WatchProfile>, store: &Arc<LogStore>) -> Option<Pipeline> {
  if !profile.watch_directory.is_dir() {
    error!(
      profile = %profile.name,
      dir = %profile.watch_directory.display(),
      "Watch directory does not exist, profile stays idle"
    );
    let entry = LogEntry::new(
      LogKind::WatcherError,
      format!(
        "Watch directory {} for profile '{}' does not exist; profile is idle",
        profile.watch_directory.display(),
        profile.name
      ),
    );
    if let Err(e) = store.append(entry).await {
      warn!(error = %e, "Failed to journal idle profile");
    }
    return None;
  }

  let (queue_tx, queue_rx) = mpsc::channel(WORK_QUEUE_CAPACITY);
  let admission = Arc::new(Admission::new(Arc::clone(profile), Arc::clone(store), queue_tx));

  let launcher_cancel = CancellationToken::new();
  let launcher = Arc::new(Launcher::new(
    Arc::clone(profile),
    Arc::clone(store),
    launcher_cancel.clone(),
  ));

  let worker_cancel = CancellationToken::new();
  let worker_handles = spawn_workers(
    Arc::clone(profile),
    Arc::clone(&admission),
    Arc::clone(&launcher),
    Arc::clone(store),
    queue_rx,
    worker_cancel.clone(),
  );

  let watcher_cancel = CancellationToken::new();
  let watcher_handle = WatcherTask::spawn(
    Arc::clone(profile),
    Arc::clone(&admission),
    Arc::clone(store),
    watcher_cancel.clone(),
  );

  Some(Pipeline {
    admission,
    launcher,
    watcher_cancel,
    watcher_handle,
    worker_cancel,
    worker_handles,
    launcher_cancel,
  })
}
