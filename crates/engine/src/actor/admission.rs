//! Admission filter - decides whether a candidate path becomes queued work.
//!
//! For every candidate the filter either rejects it or admits exactly one
//! derived target path, in this order: directory/existence check, ignored
//! extensions, marker resolution, active-set membership, cooldown, atomic
//! active-set insertion, non-blocking enqueue.
//!
//! The active set guarantees at most one worker per path at any time; the
//! cooldown map suppresses automatic re-dispatch of a path that was just
//! processed. Manual scans bypass the cooldown only.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, trace, warn};

use filebridge_core::{DetectionMethod, FileEvent, LogEntry, LogKind, WatchProfile};

use crate::logstore::LogStore;

/// Shared admission state for one watch profile
pub(crate) struct Admission {
  profile: Arc<WatchProfile>,
  store: Arc<LogStore>,
  /// Paths currently queued or held by a worker
  active: DashSet<PathBuf>,
  /// Path -> completion time of the last successful dispatch
  cooldown: DashMap<PathBuf, DateTime<Utc>>,
  /// Sender half of the work queue; `None` once the profile is stopping
  queue: Mutex<Option<mpsc::Sender<PathBuf>>>,
}

impl Admission {
  pub(crate) fn new(profile: Arc<WatchProfile>, store: Arc<LogStore>, queue_tx: mpsc::Sender<PathBuf>) -> Self {
    Self {
      profile,
      store,
      active: DashSet::new(),
      cooldown: DashMap::new(),
      queue: Mutex::new(Some(queue_tx)),
    }
  }

  /// Run a candidate through the admission pipeline.
  ///
  /// Returns `true` when the derived target was enqueued.
  pub(crate) async fn offer(&self, event: &FileEvent) -> bool {
    let candidate = event.path.as_path();

    if candidate.is_dir() {
      return false;
    }
    if !candidate.exists() && !self.profile.matches_marker(candidate) {
      return false;
    }
    if self.profile.is_ignored(candidate) {
      trace!(path = %candidate.display(), "Ignored extension, rejecting");
      return false;
    }

    let target = if self.profile.has_marker_patterns() {
      match self.profile.resolve_marker_target(candidate) {
        Some(target) if target.is_file() => target,
        Some(target) => {
          trace!(marker = %candidate.display(), target = %target.display(), "Marker target missing, rejecting");
          return false;
        }
        None => {
          trace!(path = %candidate.display(), "Not a marker file, rejecting");
          return false;
        }
      }
    } else {
      candidate.to_path_buf()
    };

    if self.active.contains(&target) {
      trace!(path = %target.display(), "Already queued or processing, rejecting");
      return false;
    }
    if event.detection != DetectionMethod::ManualScan && self.in_cooldown(&target) {
      trace!(path = %target.display(), "Within cooldown window, rejecting");
      return false;
    }
    if !self.active.insert(target.clone()) {
      // Lost a race with a simultaneous notification for the same target
      return false;
    }

    let queue_tx = self.queue.lock().await.clone();
    let Some(queue_tx) = queue_tx else {
      self.active.remove(&target);
      return false;
    };

    match queue_tx.try_send(target.clone()) {
      Ok(()) => {
        debug!(
          profile = %self.profile.name,
          path = %target.display(),
          detection = %event.detection,
          "Admitted file"
        );
        let entry = LogEntry::new(
          LogKind::FileEvent,
          format!(
            "{} {} detected via {}",
            event.kind,
            target.display(),
            event.detection
          ),
        );
        if let Err(e) = self.store.append(entry).await {
          warn!(error = %e, "Failed to journal file admission");
        }
        true
      }
      Err(mpsc::error::TrySendError::Full(_)) => {
        self.active.remove(&target);
        warn!(
          profile = %self.profile.name,
          path = %target.display(),
          "Work queue full, dropping candidate until the next rescan"
        );
        let entry = LogEntry::new(
          LogKind::WatcherError,
          format!(
            "Work queue full for profile '{}', dropped {} (the next rescan will retry)",
            self.profile.name,
            target.display()
          ),
        );
        if let Err(e) = self.store.append(entry).await {
          warn!(error = %e, "Failed to journal queue-full drop");
        }
        false
      }
      Err(mpsc::error::TrySendError::Closed(_)) => {
        self.active.remove(&target);
        false
      }
    }
  }

  /// Whether `path` completed recently enough to be suppressed
  fn in_cooldown(&self, path: &Path) -> bool {
    let horizon = self.profile.cooldown_horizon_secs() as i64;
    self
      .cooldown
      .get(path)
      .is_some_and(|completed| (Utc::now() - *completed).num_seconds() < horizon)
  }

  /// Record a successful dispatch so automatic re-admission is suppressed
  pub(crate) fn record_cooldown(&self, path: &Path) {
    self.cooldown.insert(path.to_path_buf(), Utc::now());
  }

  /// Drop cooldown entries past twice the horizon; called each polling tick
  pub(crate) fn gc_cooldown(&self) {
    let horizon = self.profile.cooldown_horizon_secs() as i64;
    let now = Utc::now();
    self
      .cooldown
      .retain(|_, completed| (now - *completed).num_seconds() < horizon * 2);
  }

  /// Release a path from the active set (worker finalization)
  pub(crate) fn finish(&self, path: &Path) {
    self.active.remove(path);
  }

  /// Stop accepting work; the queue drains and closes once in-flight
  /// receivers finish.
  pub(crate) async fn close_queue(&self) {
    self.queue.lock().await.take();
  }

  #[cfg(test)]
  pub(crate) fn is_active(&self, path: &Path) -> bool {
    self.active.contains(path)
  }

  #[cfg(test)]
  pub(crate) fn cooldown_len(&self) -> usize {
    self.cooldown.len()
  }
}

/// Removes a path from the active set when dropped, so release happens on
/// every worker exit path.
pub(crate) struct ActiveGuard<'a> {
  admission: &'a Admission,
  path: &'a Path,
}

impl<'a> ActiveGuard<'a> {
  pub(crate) fn new(admission: &'a Admission, path: &'a Path) -> Self {
    Self { admission, path }
  }
}

impl Drop for ActiveGuard<'_> {
  fn drop(&mut self) {
    self.admission.finish(self.path);
  }
}
