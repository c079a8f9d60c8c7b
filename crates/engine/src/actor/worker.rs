//! Worker pool - dequeues admitted targets, runs the readiness gate, and
//! hands ready files to the launcher.
//!
//! Workers share the queue receiver behind an async mutex. A dequeued path
//! is processed to completion by exactly one worker; the active-set guard
//! releases the path on every exit path so a later event can re-admit it.
//!
//! Readiness outcomes:
//! - missing file: skipped silently, no cooldown (retryable)
//! - locked file: skipped, no cooldown (retryable)
//! - size never stabilized: journaled warning, no cooldown (retryable)
//! - ready: journaled, dispatched, cooldown recorded after the hand-off
//!
//! Any error inside an iteration is journaled as a `WatcherError` and the
//! worker moves on to the next item.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use filebridge_core::{DetectionMethod, FileEvent, FileEventKind, LogEntry, LogKind, WatchProfile};

use super::admission::{ActiveGuard, Admission};
use super::launcher::{LaunchError, Launcher};
use crate::logstore::LogStore;

/// Hard ceiling on how long a single file may take to become size-stable
const STABILITY_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors inside a worker iteration
#[derive(Debug, thiserror::Error)]
pub(crate) enum WorkerError {
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
  #[error("{0}")]
  Launch(#[from] LaunchError),
}

/// Result of the readiness gate
#[derive(Debug, PartialEq, Eq)]
enum GateOutcome {
  Ready,
  Missing,
  Locked,
  Unstable,
}

/// Spawn the worker pool for one profile.
///
/// Pool size is `max(2, MaxConcurrentProcesses)`. Workers exit when the
/// queue closes and drains, or promptly when `cancel` fires.
pub(crate) fn spawn_workers(
  profile: Arc<WatchProfile>,
  admission: Arc<Admission>,
  launcher: Arc<Launcher>,
  store: Arc<LogStore>,
  queue_rx: mpsc::Receiver<std::path::PathBuf>,
  cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
  let queue_rx = Arc::new(Mutex::new(queue_rx));
  (0..profile.worker_count())
    .map(|id| {
      let worker = Worker {
        id,
        profile: Arc::clone(&profile),
        admission: Arc::clone(&admission),
        launcher: Arc::clone(&launcher),
        store: Arc::clone(&store),
        queue_rx: Arc::clone(&queue_rx),
        cancel: cancel.clone(),
      };
      tokio::spawn(worker.run())
    })
    .collect()
}

struct Worker {
  id: usize,
  profile: Arc<WatchProfile>,
  admission: Arc<Admission>,
  launcher: Arc<Launcher>,
  store: Arc<LogStore>,
  queue_rx: Arc<Mutex<mpsc::Receiver<std::path::PathBuf>>>,
  cancel: CancellationToken,
}

impl Worker {
  async fn run(self) {
    debug!(profile = %self.profile.name, worker = self.id, "Worker started");

    loop {
      let next = {
        let mut queue_rx = self.queue_rx.lock().await;
        tokio::select! {
          biased;
          _ = self.cancel.cancelled() => None,
          item = queue_rx.recv() => item,
        }
      };
      let Some(path) = next else { break };
      self.process(&path).await;
    }

    debug!(profile = %self.profile.name, worker = self.id, "Worker stopped");
  }

  /// Gate and dispatch one target. The guard releases the active-set slot
  /// whichever way this returns.
  async fn process(&self, path: &Path) {
    let _guard = ActiveGuard::new(&self.admission, path);

    match self.gate(path).await {
      Ok(GateOutcome::Ready) => {
        let event = FileEvent::new(path.to_path_buf(), FileEventKind::Created, DetectionMethod::WorkQueue);
        let entry = LogEntry::new(
          LogKind::FileEvent,
          format!("{} {} detected via {}", event.kind, path.display(), event.detection),
        );
        if let Err(e) = self.store.append(entry).await {
          warn!(error = %e, "Failed to journal dispatch");
        }

        match self.launcher.launch(&event).await {
          Ok(()) => self.admission.record_cooldown(path),
          Err(e) => self.report_failure(path, &WorkerError::from(e)).await,
        }
      }
      Ok(GateOutcome::Missing) => {
        // File vanished before processing; a later event re-admits it
        trace!(path = %path.display(), "Target no longer exists, skipping");
      }
      Ok(GateOutcome::Locked) => {
        debug!(path = %path.display(), "Target is locked, will retry on the next event");
      }
      Ok(GateOutcome::Unstable) => {
        // Warning already journaled by the stability wait
        debug!(path = %path.display(), "Target never stabilized, will retry on the next event");
      }
      Err(e) => self.report_failure(path, &e).await,
    }
  }

  async fn report_failure(&self, path: &Path, error: &WorkerError) {
    warn!(profile = %self.profile.name, path = %path.display(), error = %error, "Worker iteration failed");
    let entry = LogEntry::new(
      LogKind::WatcherError,
      format!("Error processing {}: {}", path.display(), error),
    );
    if let Err(e) = self.store.append(entry).await {
      warn!(error = %e, "Failed to journal worker failure");
    }
  }

  /// The per-file readiness checks preceding dispatch
  async fn gate(&self, path: &Path) -> Result<GateOutcome, WorkerError> {
    if !path.exists() {
      return Ok(GateOutcome::Missing);
    }

    match probe_lock(path) {
      LockProbe::Locked => return Ok(GateOutcome::Locked),
      LockProbe::Missing => return Ok(GateOutcome::Missing),
      LockProbe::Free => {}
    }

    if self.profile.size_check_interval_ms > 0
      && self.profile.size_stability_check_count > 0
      && !self.wait_for_stable_size(path).await?
    {
      return Ok(GateOutcome::Unstable);
    }

    Ok(GateOutcome::Ready)
  }

  /// Sample the file size until `size_stability_check_count` consecutive
  /// samples match the previous one, or the hard ceiling is hit.
  async fn wait_for_stable_size(&self, path: &Path) -> Result<bool, WorkerError> {
    let interval = self.profile.size_check_interval();
    let required = self.profile.size_stability_check_count;
    let deadline = tokio::time::Instant::now() + STABILITY_TIMEOUT;

    let mut last_size: Option<u64> = None;
    let mut matches: u32 = 0;

    loop {
      let size = match tokio::fs::metadata(path).await {
        Ok(meta) => meta.len(),
        // Vanished mid-check: retry on the next event
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
      };

      if last_size == Some(size) {
        matches += 1;
        if matches >= required {
          trace!(path = %path.display(), size, "Size stable");
          return Ok(true);
        }
      } else {
        last_size = Some(size);
        matches = 0;
      }

      if tokio::time::Instant::now() >= deadline {
        warn!(path = %path.display(), "Size did not stabilize within {STABILITY_TIMEOUT:?}");
        let entry = LogEntry::new(
          LogKind::WatcherError,
          format!(
            "Size of {} did not stabilize within {}s; will retry on the next event",
            path.display(),
            STABILITY_TIMEOUT.as_secs()
          ),
        );
        if let Err(e) = self.store.append(entry).await {
          warn!(error = %e, "Failed to journal stability timeout");
        }
        return Ok(false);
      }

      tokio::select! {
        biased;
        _ = self.cancel.cancelled() => return Ok(false),
        _ = tokio::time::sleep(interval) => {}
      }
    }
  }
}

enum LockProbe {
  Free,
  Locked,
  Missing,
}

/// Open the file read-only and try to take an exclusive advisory lock.
/// A holder elsewhere means the producer is still writing.
fn probe_lock(path: &Path) -> LockProbe {
  match std::fs::File::open(path) {
    Ok(file) => match fs2::FileExt::try_lock_exclusive(&file) {
      Ok(()) => {
        let _ = fs2::FileExt::unlock(&file);
        LockProbe::Free
      }
      Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => LockProbe::Locked,
      // Lock support varies by filesystem; fall through to the size check
      Err(_) => LockProbe::Free,
    },
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => LockProbe::Missing,
    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => LockProbe::Locked,
    Err(_) => LockProbe::Free,
  }
}
