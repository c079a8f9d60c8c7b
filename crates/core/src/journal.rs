//! Journal entry types.
//!
//! Entries are serialized camelCase into date-partitioned JSON array files
//! (`filebridge_monitor_YYYYMMDD.json`); the engine's log store owns the
//! on-disk layout, rotation, and retention.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The taxonomy of journal entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogKind {
  /// Informational file arrival / admission / dispatch
  FileEvent,
  /// Spawn success and clean exits
  ProcessLaunch,
  /// Missing executable, spawn failure, or a non-zero exit
  ProcessError,
  /// I/O or notification failures in the watcher, readiness checks, or polling
  WatcherError,
}

impl fmt::Display for LogKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      LogKind::FileEvent => write!(f, "FileEvent"),
      LogKind::ProcessLaunch => write!(f, "ProcessLaunch"),
      LogKind::ProcessError => write!(f, "ProcessError"),
      LogKind::WatcherError => write!(f, "WatcherError"),
    }
  }
}

impl FromStr for LogKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "fileevent" => Ok(LogKind::FileEvent),
      "processlaunch" => Ok(LogKind::ProcessLaunch),
      "processerror" => Ok(LogKind::ProcessError),
      "watchererror" => Ok(LogKind::WatcherError),
      _ => Err(format!("Unknown log kind: {s}")),
    }
  }
}

/// One journal entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
  pub id: Uuid,
  pub timestamp: DateTime<Utc>,
  pub log_type: LogKind,
  pub message: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub details: Option<String>,
}

impl LogEntry {
  /// Create an entry stamped with a fresh id and the current UTC time
  pub fn new(log_type: LogKind, message: impl Into<String>) -> Self {
    Self {
      id: Uuid::new_v4(),
      timestamp: Utc::now(),
      log_type,
      message: message.into(),
      details: None,
    }
  }

  pub fn with_details(mut self, details: impl Into<String>) -> Self {
    self.details = Some(details.into());
    self
  }
}
