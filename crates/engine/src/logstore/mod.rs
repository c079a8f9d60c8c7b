//! Append-only rotating journal, partitioned by UTC date.
//!
//! File layout: `filebridge_monitor_YYYYMMDD.json` holds the first
//! `max_logs_per_file` entries of a date; overflow rotates to
//! `filebridge_monitor_YYYYMMDD_NNNN.json` with a 4-digit, monotonically
//! increasing number. Every append rewrites the current file as a complete,
//! pretty-printed JSON array, so a crash at any point leaves valid JSON on
//! disk.
//!
//! Appends are serialized by a single async mutex; concurrent writers wait.
//! Each date keys a cache of the current file's entries and number so an
//! append touches disk exactly once. Reads never hold the write lock - a
//! read racing a rewrite parses a torn file as empty, which the retrieval
//! contract permits.
//!
//! An optional asynchronous post-append hook receives every entry after it
//! is durable. The hook is the integration point for realtime consumers; it
//! runs outside the write lock and its failure never fails the append.

use std::io;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use filebridge_core::{Config, LogEntry, LogKind};

const FILE_PREFIX: &str = "filebridge_monitor_";
const FILE_SUFFIX: &str = ".json";

/// Hook invoked with each entry after a successful append
pub type PostAppendHook = Arc<dyn Fn(LogEntry) -> BoxFuture<'static, ()> + Send + Sync>;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the journal store
#[derive(Debug, Clone)]
pub struct LogStoreConfig {
  /// Directory holding the journal files (created if absent)
  pub directory: PathBuf,
  /// Entries per file before rotation
  pub max_logs_per_file: usize,
  /// Files older than this many days are pruned (0 = keep forever)
  pub retention_days: u32,
}

impl From<&Config> for LogStoreConfig {
  fn from(config: &Config) -> Self {
    Self {
      directory: config.log_directory.clone(),
      max_logs_per_file: config.max_logs_per_file,
      retention_days: config.log_retention_days,
    }
  }
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors surfaced by the append path
///
/// Read-side failures do not appear here: retrieval returns empty results on
/// unreadable or unparseable files instead of propagating.
#[derive(Debug, thiserror::Error)]
pub enum LogStoreError {
  #[error("Failed to create log directory {path}: {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
  #[error("Failed to write log file {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
  #[error("Failed to encode log entries: {0}")]
  Encode(#[from] serde_json::Error),
}

// ============================================================================
// Retrieval Types
// ============================================================================

/// Filter and pagination for journal retrieval
#[derive(Debug, Clone, Default)]
pub struct LogQuery {
  /// Only entries at or after this instant
  pub from: Option<DateTime<Utc>>,
  /// Only entries at or before this instant
  pub to: Option<DateTime<Utc>>,
  /// Only entries of this kind
  pub kind: Option<LogKind>,
  /// 0-based page index
  pub page: usize,
  /// Page size (0 falls back to 50)
  pub page_size: usize,
}

/// One page of journal entries, newest first
#[derive(Debug, Clone)]
pub struct LogPage {
  pub entries: Vec<LogEntry>,
  /// Total matching entries across all pages
  pub total: usize,
}

// ============================================================================
// LogStore
// ============================================================================

struct DateCache {
  entries: Vec<LogEntry>,
  file_number: u32,
}

/// Date-partitioned, rotating journal shared by every watch profile
pub struct LogStore {
  config: LogStoreConfig,
  cache: DashMap<String, DateCache>,
  write_lock: Mutex<()>,
  post_append: RwLock<Option<PostAppendHook>>,
}

impl LogStore {
  /// Create a store, creating the journal directory if needed.
  pub fn new(config: LogStoreConfig) -> Result<Self, LogStoreError> {
    std::fs::create_dir_all(&config.directory).map_err(|source| LogStoreError::CreateDir {
      path: config.directory.clone(),
      source,
    })?;
    Ok(Self {
      config,
      cache: DashMap::new(),
      write_lock: Mutex::new(()),
      post_append: RwLock::new(None),
    })
  }

  pub fn directory(&self) -> &Path {
    &self.config.directory
  }

  /// Install the realtime hook. At most one hook is active; installing
  /// replaces the previous one.
  pub fn set_post_append(&self, hook: PostAppendHook) {
    if let Ok(mut guard) = self.post_append.write() {
      *guard = Some(hook);
    }
  }

  /// Append one entry to the journal.
  ///
  /// Errors from the write path surface to the caller; the hook runs after
  /// the entry is durable and cannot fail the append.
  pub async fn append(&self, entry: LogEntry) -> Result<(), LogStoreError> {
    {
      let _guard = self.write_lock.lock().await;

      let date_key = entry.timestamp.format("%Y%m%d").to_string();
      if !self.cache.contains_key(&date_key) {
        let loaded = self.load_current(&date_key).await;
        self.cache.insert(date_key.clone(), loaded);
      }

      // Serialize under the map guard, write after releasing it (the guard
      // must not be held across an await)
      let (path, encoded) = {
        let Some(mut cache) = self.cache.get_mut(&date_key) else {
          return Ok(());
        };
        if cache.entries.len() >= self.config.max_logs_per_file {
          cache.file_number += 1;
          cache.entries.clear();
          debug!(date = %date_key, file_number = cache.file_number, "Rotated journal file");
        }
        cache.entries.push(entry.clone());
        let path = self.file_path(&date_key, cache.file_number);
        (path, serde_json::to_vec_pretty(&cache.entries)?)
      };

      tokio::fs::write(&path, encoded)
        .await
        .map_err(|source| LogStoreError::Write { path, source })?;
    }

    let hook = self
      .post_append
      .read()
      .ok()
      .and_then(|guard| guard.as_ref().map(Arc::clone));
    if let Some(hook) = hook
      && AssertUnwindSafe(hook(entry)).catch_unwind().await.is_err()
    {
      warn!("Post-append hook panicked; entry was still journaled");
    }

    Ok(())
  }

  /// Retrieve entries matching `query`, newest first, with the total count.
  ///
  /// Files that cannot be read or parsed contribute nothing; retrieval never
  /// fails.
  pub async fn query(&self, query: &LogQuery) -> LogPage {
    let from_date = query.from.map(|t| t.date_naive());
    let to_date = query.to.map(|t| t.date_naive());

    let mut matched: Vec<(usize, LogEntry)> = Vec::new();
    let mut index = 0usize;
    for file in self.list_files() {
      // Prune whole files outside the date range before reading them
      if from_date.is_some_and(|d| file.date < d) || to_date.is_some_and(|d| file.date > d) {
        continue;
      }
      for entry in read_entries(&file.path).await {
        let idx = index;
        index += 1;
        if query.from.is_some_and(|t| entry.timestamp < t) || query.to.is_some_and(|t| entry.timestamp > t) {
          continue;
        }
        if query.kind.is_some_and(|k| entry.log_type != k) {
          continue;
        }
        matched.push((idx, entry));
      }
    }

    matched.sort_by(|(ai, a), (bi, b)| b.timestamp.cmp(&a.timestamp).then(bi.cmp(ai)));

    let total = matched.len();
    let page_size = if query.page_size == 0 { 50 } else { query.page_size };
    let entries = matched
      .into_iter()
      .skip(query.page * page_size)
      .take(page_size)
      .map(|(_, entry)| entry)
      .collect();

    LogPage { entries, total }
  }

  /// Delete journal files whose filename date is older than the retention
  /// window and evict their cache entries. Returns the number of files
  /// removed. Files whose names do not parse are left alone.
  pub async fn prune_expired(&self) -> usize {
    if self.config.retention_days == 0 {
      return 0;
    }
    let Some(cutoff) = Utc::now()
      .date_naive()
      .checked_sub_days(chrono::Days::new(self.config.retention_days as u64))
    else {
      return 0;
    };

    let _guard = self.write_lock.lock().await;
    let mut removed = 0;
    for file in self.list_files() {
      if file.date >= cutoff {
        continue;
      }
      match std::fs::remove_file(&file.path) {
        Ok(()) => {
          trace!(path = %file.path.display(), "Deleted expired journal file");
          self.cache.remove(&file.date_key);
          removed += 1;
        }
        Err(e) => warn!(path = %file.path.display(), error = %e, "Failed to delete expired journal file"),
      }
    }
    removed
  }

  // ==========================================================================
  // Internals
  // ==========================================================================

  fn file_path(&self, date_key: &str, number: u32) -> PathBuf {
    let name = if number == 0 {
      format!("{FILE_PREFIX}{date_key}{FILE_SUFFIX}")
    } else {
      format!("{FILE_PREFIX}{date_key}_{number:04}{FILE_SUFFIX}")
    };
    self.config.directory.join(name)
  }

  /// Resume the write position for a date: the highest numbered file on disk
  /// and its entries (an unreadable file counts as empty and will be
  /// rewritten on the next append).
  async fn load_current(&self, date_key: &str) -> DateCache {
    let file_number = self
      .list_files()
      .into_iter()
      .filter(|f| f.date_key == date_key)
      .map(|f| f.number)
      .max()
      .unwrap_or(0);
    let entries = read_entries(&self.file_path(date_key, file_number)).await;
    DateCache { entries, file_number }
  }

  fn list_files(&self) -> Vec<JournalFile> {
    let entries = match std::fs::read_dir(&self.config.directory) {
      Ok(entries) => entries,
      Err(e) => {
        warn!(dir = %self.config.directory.display(), error = %e, "Failed to list journal directory");
        return Vec::new();
      }
    };

    let mut files: Vec<JournalFile> = entries
      .flatten()
      .filter_map(|entry| {
        let path = entry.path();
        let name = path.file_name()?.to_str()?;
        let (date_key, number) = parse_file_name(name)?;
        let date = NaiveDate::parse_from_str(&date_key, "%Y%m%d").ok()?;
        Some(JournalFile {
          date,
          date_key,
          number,
          path,
        })
      })
      .collect();
    files.sort_by(|a, b| (a.date, a.number).cmp(&(b.date, b.number)));
    files
  }
}

struct JournalFile {
  date: NaiveDate,
  date_key: String,
  number: u32,
  path: PathBuf,
}

/// Split a journal file name into its date key and rotation number.
fn parse_file_name(name: &str) -> Option<(String, u32)> {
  let rest = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
  let (date, number) = match rest.split_once('_') {
    Some((date, number)) => (date, number.parse().ok()?),
    None => (rest, 0),
  };
  if date.len() != 8 || !date.bytes().all(|b| b.is_ascii_digit()) {
    return None;
  }
  Some((date.to_string(), number))
}

/// Read a journal file, treating any I/O or parse failure as empty.
async fn read_entries(path: &Path) -> Vec<LogEntry> {
  let bytes = match tokio::fs::read(path).await {
    Ok(bytes) => bytes,
    Err(_) => return Vec::new(),
  };
  match serde_json::from_slice(&bytes) {
    Ok(entries) => entries,
    Err(e) => {
      warn!(path = %path.display(), error = %e, "Unparseable journal file, treating as empty");
      Vec::new()
    }
  }
}
