//! Configuration document for the FileBridge daemon.
//!
//! The configuration is a JSON document with a top-level `Apps` array, one
//! element per watch profile, plus journal settings. Field names are
//! PascalCase on disk. Missing optional fields take the documented defaults.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ============================================================================
// Watch Profiles
// ============================================================================

/// One independent (directory -> executable) watch configuration.
///
/// Profiles are immutable once installed; reconfiguring a profile is a
/// remove + add. Validation happens at install time via [`WatchProfile::validate`];
/// runtime conditions (missing directory, missing executable) are reported
/// through the journal instead of failing installation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct WatchProfile {
  /// Unique, non-empty profile identifier
  pub name: String,

  /// Absolute path of the directory to watch (non-recursive)
  pub watch_directory: PathBuf,

  /// Rescan cadence in seconds (minimum 1)
  pub polling_interval_seconds: u64,

  /// Executable to launch for each ready file
  pub executable_path: PathBuf,

  /// Argument template; `{FilePath}` and `{FolderPath}` are expanded per token
  pub arguments: String,

  /// File name suffixes to reject, case-insensitive, leading dot optional
  pub ignore_extensions: Vec<String>,

  /// Marker patterns of shape `*.SUFFIX`. When non-empty, only marker files
  /// are admitted and the launch target is the marker path with the suffix
  /// stripped, provided that target exists.
  pub marker_file_patterns: Vec<String>,

  /// Interval between size samples in milliseconds (0 disables the check)
  pub size_check_interval_ms: u64,

  /// Consecutive equal-size samples required before a file counts as stable
  pub size_stability_check_count: u32,

  /// Upper bound on concurrently running children (0 = unbounded)
  pub max_concurrent_processes: usize,
}

fn default_polling_interval_seconds() -> u64 {
  30
}
fn default_size_check_interval_ms() -> u64 {
  100
}
fn default_size_stability_check_count() -> u32 {
  2
}

impl Default for WatchProfile {
  fn default() -> Self {
    Self {
      name: String::new(),
      watch_directory: PathBuf::new(),
      polling_interval_seconds: default_polling_interval_seconds(),
      executable_path: PathBuf::new(),
      arguments: String::new(),
      ignore_extensions: Vec::new(),
      marker_file_patterns: Vec::new(),
      size_check_interval_ms: default_size_check_interval_ms(),
      size_stability_check_count: default_size_stability_check_count(),
      max_concurrent_processes: 0,
    }
  }
}

impl WatchProfile {
  /// Check the static constraints of a profile.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.name.trim().is_empty() {
      return Err(ConfigError::EmptyName);
    }
    if !self.watch_directory.is_absolute() {
      return Err(ConfigError::RelativeWatchDirectory {
        name: self.name.clone(),
        path: self.watch_directory.clone(),
      });
    }
    if self.polling_interval_seconds < 1 {
      return Err(ConfigError::PollingIntervalTooShort { name: self.name.clone() });
    }
    Ok(())
  }

  /// Rescan cadence as a [`Duration`]
  pub fn polling_interval(&self) -> Duration {
    Duration::from_secs(self.polling_interval_seconds)
  }

  /// Interval between size-stability samples
  pub fn size_check_interval(&self) -> Duration {
    Duration::from_millis(self.size_check_interval_ms)
  }

  /// Suppression window after a successful dispatch, in seconds
  ///
  /// Twice the polling interval, floored at 60 seconds, so at least one
  /// rescan passes before the same path can be dispatched again.
  pub fn cooldown_horizon_secs(&self) -> u64 {
    (self.polling_interval_seconds * 2).max(60)
  }

  /// Number of worker tasks to run for this profile
  pub fn worker_count(&self) -> usize {
    self.max_concurrent_processes.max(2)
  }

  /// Whether the basename of `path` ends with one of the ignored extensions
  ///
  /// Comparison is case-insensitive; a missing leading dot in the
  /// configuration is tolerated.
  pub fn is_ignored(&self, path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
      return false;
    };
    let name = name.to_ascii_lowercase();
    self.ignore_extensions.iter().any(|ext| {
      let ext = ext.trim().to_ascii_lowercase();
      if ext.is_empty() {
        return false;
      }
      if let Some(stripped) = ext.strip_prefix('.') {
        name.ends_with(&format!(".{stripped}"))
      } else {
        name.ends_with(&format!(".{ext}"))
      }
    })
  }

  /// Whether marker resolution is in effect for this profile
  pub fn has_marker_patterns(&self) -> bool {
    !self.marker_file_patterns.is_empty()
  }

  /// Whether `path` looks like a marker file under any configured pattern
  pub fn matches_marker(&self, path: &Path) -> bool {
    self.marker_suffix_for(path).is_some()
  }

  /// Derive the launch target for a marker file.
  ///
  /// Returns the marker path with the matched suffix stripped, or `None`
  /// when no pattern matches or stripping would leave an empty basename.
  /// Existence of the target is the caller's concern.
  pub fn resolve_marker_target(&self, path: &Path) -> Option<PathBuf> {
    let suffix = self.marker_suffix_for(path)?;
    let name = path.file_name()?.to_str()?;
    let stripped = &name[..name.len() - suffix.len()];
    if stripped.is_empty() {
      return None;
    }
    Some(path.with_file_name(stripped))
  }

  fn marker_suffix_for(&self, path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    self
      .marker_file_patterns
      .iter()
      .map(|pattern| pattern.strip_prefix('*').unwrap_or(pattern))
      .filter(|suffix| !suffix.is_empty() && suffix.len() < name.len())
      .find(|suffix| name.ends_with(*suffix))
      .map(str::to_string)
  }
}

// ============================================================================
// Top-Level Document
// ============================================================================

/// The FileBridge configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Config {
  /// Watch profiles, one per independent directory -> executable mapping
  pub apps: Vec<WatchProfile>,

  /// Directory holding the journal files (default: "logs")
  pub log_directory: PathBuf,

  /// Journal files older than this many days are deleted (0 = keep forever)
  pub log_retention_days: u32,

  /// Entries per journal file before rotating to the next numbered file
  pub max_logs_per_file: usize,
}

fn default_log_directory() -> PathBuf {
  PathBuf::from("logs")
}
fn default_log_retention_days() -> u32 {
  30
}
fn default_max_logs_per_file() -> usize {
  10_000
}

impl Default for Config {
  fn default() -> Self {
    Self {
      apps: Vec::new(),
      log_directory: default_log_directory(),
      log_retention_days: default_log_retention_days(),
      max_logs_per_file: default_max_logs_per_file(),
    }
  }
}

impl Config {
  /// Load and parse a configuration file.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Validate every profile and reject duplicate names.
  pub fn validate(&self) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for profile in &self.apps {
      profile.validate()?;
      if !seen.insert(profile.name.as_str()) {
        return Err(ConfigError::DuplicateName(profile.name.clone()));
      }
    }
    Ok(())
  }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors produced while loading or validating configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("Failed to read config file {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Failed to parse config file {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
  #[error("Profile name must not be empty")]
  EmptyName,
  #[error("Duplicate profile name: {0}")]
  DuplicateName(String),
  #[error("Profile '{name}': watch directory must be an absolute path (got {path:?})")]
  RelativeWatchDirectory { name: String, path: PathBuf },
  #[error("Profile '{name}': polling interval must be at least 1 second")]
  PollingIntervalTooShort { name: String },
}
