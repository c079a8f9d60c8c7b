//! Domain events flowing through the watch pipeline.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened to a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileEventKind {
  Created,
  Changed,
  Deleted,
}

impl fmt::Display for FileEventKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      FileEventKind::Created => write!(f, "Created"),
      FileEventKind::Changed => write!(f, "Changed"),
      FileEventKind::Deleted => write!(f, "Deleted"),
    }
  }
}

/// How a candidate was detected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectionMethod {
  /// Native filesystem notification
  FileSystemEvent,
  /// Periodic directory rescan
  Polling,
  /// Operator-initiated scan (bypasses the cooldown)
  ManualScan,
  /// Re-stamped by a worker when the file clears the readiness checks
  WorkQueue,
}

impl fmt::Display for DetectionMethod {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      DetectionMethod::FileSystemEvent => write!(f, "FileSystemEvent"),
      DetectionMethod::Polling => write!(f, "Polling"),
      DetectionMethod::ManualScan => write!(f, "ManualScan"),
      DetectionMethod::WorkQueue => write!(f, "WorkQueue"),
    }
  }
}

/// A candidate file observed by the pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct FileEvent {
  /// Absolute path of the observed file
  pub path: PathBuf,
  pub kind: FileEventKind,
  pub detection: DetectionMethod,
  pub timestamp: DateTime<Utc>,
}

impl FileEvent {
  /// Create an event stamped with the current UTC time
  pub fn new(path: PathBuf, kind: FileEventKind, detection: DetectionMethod) -> Self {
    Self {
      path,
      kind,
      detection,
      timestamp: Utc::now(),
    }
  }
}
