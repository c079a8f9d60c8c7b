//! ProfileManager - installs and removes watch profiles at runtime.
//!
//! The manager maps profile names to actor handles in a `DashMap` for
//! lock-free concurrent access. Profiles are immutable once installed;
//! `replace` is remove + install. All profiles share one journal store.

use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use filebridge_core::{ConfigError, WatchProfile};

use super::handle::{ProfileHandle, SendError};
use super::profile::ProfileActor;
use crate::logstore::LogStore;

/// Errors from profile management operations
#[derive(Debug, thiserror::Error)]
pub enum ProfileManagerError {
  #[error("Invalid profile configuration: {0}")]
  Invalid(#[from] ConfigError),
  #[error("A profile named '{0}' is already installed")]
  AlreadyInstalled(String),
  #[error("No profile named '{0}' is installed")]
  NotFound(String),
  #[error(transparent)]
  Send(#[from] SendError),
}

/// Owns zero-to-many independent watch pipelines, one per named profile
pub struct ProfileManager {
  profiles: DashMap<String, ProfileHandle>,
  store: Arc<LogStore>,
  cancel: CancellationToken,
}

impl ProfileManager {
  /// Create a manager sharing `store` across every profile it installs.
  /// Cancelling `cancel` tears every profile down.
  pub fn new(store: Arc<LogStore>, cancel: CancellationToken) -> Self {
    Self {
      profiles: DashMap::new(),
      store,
      cancel,
    }
  }

  pub fn store(&self) -> &Arc<LogStore> {
    &self.store
  }

  /// Validate and install a profile, spawning its pipeline.
  ///
  /// A profile whose watch directory is missing installs successfully but
  /// stays idle (the condition is journaled); static configuration errors
  /// are rejected here.
  pub async fn install(&self, profile: WatchProfile) -> Result<(), ProfileManagerError> {
    profile.validate()?;
    let name = profile.name.clone();
    if self.profiles.contains_key(&name) {
      return Err(ProfileManagerError::AlreadyInstalled(name));
    }

    let handle = ProfileActor::spawn(profile, Arc::clone(&self.store), self.cancel.child_token()).await;

    match self.profiles.entry(name.clone()) {
      dashmap::mapref::entry::Entry::Occupied(_) => {
        // Lost a race with a concurrent install of the same name
        handle.shutdown().await;
        Err(ProfileManagerError::AlreadyInstalled(name))
      }
      dashmap::mapref::entry::Entry::Vacant(vacant) => {
        vacant.insert(handle);
        info!(profile = %name, "Installed watch profile");
        Ok(())
      }
    }
  }

  /// Remove a profile and wait for its clean teardown
  pub async fn remove(&self, name: &str) -> Result<(), ProfileManagerError> {
    let Some((_, handle)) = self.profiles.remove(name) else {
      return Err(ProfileManagerError::NotFound(name.to_string()));
    };
    info!(profile = %name, "Removing watch profile");
    handle.shutdown().await;
    Ok(())
  }

  /// Reconfigure a profile: tear the old pipeline down, then install the new
  /// one under the same name.
  pub async fn replace(&self, profile: WatchProfile) -> Result<(), ProfileManagerError> {
    profile.validate()?;
    match self.remove(&profile.name).await {
      Ok(()) | Err(ProfileManagerError::NotFound(_)) => {}
      Err(e) => return Err(e),
    }
    self.install(profile).await
  }

  /// Trigger a manual scan on a profile; returns the number admitted
  pub async fn scan_now(&self, name: &str) -> Result<usize, ProfileManagerError> {
    let handle = self
      .profiles
      .get(name)
      .map(|entry| entry.value().clone())
      .ok_or_else(|| ProfileManagerError::NotFound(name.to_string()))?;
    Ok(handle.scan_now().await?)
  }

  /// Names of the currently installed profiles
  pub fn list(&self) -> Vec<String> {
    self.profiles.iter().map(|entry| entry.key().clone()).collect()
  }

  /// Tear down every profile, waiting for clean teardown of each
  pub async fn shutdown_all(&self) {
    let names = self.list();
    if names.is_empty() {
      return;
    }
    info!(count = names.len(), "Shutting down all watch profiles");

    let handles: Vec<ProfileHandle> = names
      .iter()
      .filter_map(|name| self.profiles.remove(name).map(|(_, handle)| handle))
      .collect();
    let shutdowns: Vec<_> = handles
      .iter()
      .map(|handle| async move { handle.shutdown().await })
      .collect();
    futures::future::join_all(shutdowns).await;

    debug!("All watch profiles stopped");
  }
}
