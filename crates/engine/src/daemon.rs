//! Daemon supervisor - wires the shared journal store, the profile manager,
//! and the retention scheduler together and runs until interrupted.
//!
//! # Lifecycle
//!
//! 1. Create the master `CancellationToken`
//! 2. Open the shared `LogStore`
//! 3. Install every configured profile (a bad profile is journaled and
//!    skipped; its siblings run)
//! 4. Spawn the retention scheduler
//! 5. Wait for ctrl-c (or external cancellation)
//! 6. Graceful shutdown: tear down all profiles, stop the scheduler

use std::sync::Arc;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use filebridge_core::{Config, LogEntry, LogKind};

use crate::actor::ProfileManager;
use crate::logstore::{LogStore, LogStoreConfig, LogStoreError};
use crate::scheduler::RetentionScheduler;

/// Errors that prevent the daemon from starting
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
  #[error("Journal store error: {0}")]
  LogStore(#[from] LogStoreError),
}

/// The FileBridge daemon - owns every watch profile for one configuration
pub struct Daemon {
  config: Config,
}

impl Daemon {
  pub fn new(config: Config) -> Self {
    Self { config }
  }

  /// Run until ctrl-c, then shut down gracefully.
  pub async fn run(self) -> Result<(), DaemonError> {
    let cancel = CancellationToken::new();

    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
      if let Err(e) = signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {}", e);
        return;
      }
      info!("Received ctrl-c, shutting down...");
      cancel_for_signal.cancel();
    });

    self.run_until(cancel).await
  }

  /// Run until `cancel` fires. Split out so embedders and tests can drive
  /// the shutdown themselves.
  pub async fn run_until(self, cancel: CancellationToken) -> Result<(), DaemonError> {
    info!("Starting FileBridge daemon");

    let store = Arc::new(LogStore::new(LogStoreConfig::from(&self.config))?);
    info!(dir = %store.directory().display(), "Journal store ready");

    let manager = Arc::new(ProfileManager::new(Arc::clone(&store), cancel.child_token()));
    for profile in &self.config.apps {
      let name = profile.name.clone();
      if let Err(e) = manager.install(profile.clone()).await {
        error!(profile = %name, error = %e, "Failed to install watch profile");
        let entry = LogEntry::new(
          LogKind::WatcherError,
          format!("Failed to install profile '{name}': {e}"),
        );
        if let Err(e) = store.append(entry).await {
          warn!(error = %e, "Failed to journal profile installation failure");
        }
      }
    }
    info!(profiles = manager.list().len(), "Watch profiles installed");

    let scheduler_handle = {
      let store = Arc::clone(&store);
      let cancel = cancel.clone();
      tokio::spawn(async move {
        RetentionScheduler::new(store).run(cancel).await;
      })
    };

    cancel.cancelled().await;

    info!("Shutting down...");
    manager.shutdown_all().await;
    let _ = scheduler_handle.await;

    info!("Daemon shutdown complete");
    Ok(())
  }
}
