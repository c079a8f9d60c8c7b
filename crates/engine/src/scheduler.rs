//! Background retention scheduler.
//!
//! Deletes expired journal files once per day and once at startup. Runs as
//! its own task until cancelled.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::logstore::LogStore;

const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 3600);

/// Daily journal retention sweep
pub struct RetentionScheduler {
  store: Arc<LogStore>,
}

impl RetentionScheduler {
  pub fn new(store: Arc<LogStore>) -> Self {
    Self { store }
  }

  /// Run until cancelled.
  pub async fn run(self, cancel: CancellationToken) {
    // Startup pass so a long-stopped daemon catches up immediately
    let removed = self.store.prune_expired().await;
    if removed > 0 {
      info!(removed, "Pruned expired journal files at startup");
    }

    let mut timer = tokio::time::interval(RETENTION_SWEEP_INTERVAL);
    timer.tick().await; // consume the immediate tick

    info!("Retention scheduler started");

    loop {
      tokio::select! {
        biased;

        _ = cancel.cancelled() => {
          info!("Retention scheduler shutting down (cancelled)");
          break;
        }

        _ = timer.tick() => {
          let removed = self.store.prune_expired().await;
          if removed > 0 {
            info!(removed, "Pruned expired journal files");
          }
        }
      }
    }
  }
}
