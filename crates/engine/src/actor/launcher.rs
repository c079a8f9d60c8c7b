//! Launcher - spawns the configured executable for ready files, bounds
//! concurrency, and collects child exit outcomes.
//!
//! # Contract
//!
//! One process per call. A counting semaphore caps in-flight children when
//! `MaxConcurrentProcesses` is positive; the permit moves into the exit task
//! and is released exactly once when the child exits. The argument template
//! is tokenized first (double quotes group, unquoted whitespace splits) and
//! `{FilePath}` / `{FolderPath}` are expanded per token afterwards, so
//! substituted values containing spaces stay single arguments. There is no
//! shell interpretation.
//!
//! Children run with the executable's directory as working directory,
//! stdout/stderr piped and forwarded line-by-line to the logger. On profile
//! shutdown every still-running child is killed and reaped.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, ChildStdout, Command};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use filebridge_core::{FileEvent, LogEntry, LogKind, WatchProfile};

use crate::logstore::LogStore;

/// Start metadata for a running child
#[derive(Debug, Clone)]
pub(crate) struct RunningChild {
  pub path: PathBuf,
  pub started_at: DateTime<Utc>,
}

/// Errors surfaced to the worker; configuration and spawn failures are
/// journaled and swallowed instead.
#[derive(Debug, thiserror::Error)]
pub(crate) enum LaunchError {
  #[error("Launcher is shutting down")]
  ShuttingDown,
}

/// Bounded process launcher for one watch profile
pub(crate) struct Launcher {
  profile: Arc<WatchProfile>,
  store: Arc<LogStore>,
  /// `None` when `MaxConcurrentProcesses` is 0 (unbounded)
  limiter: Option<Arc<Semaphore>>,
  running: Arc<DashMap<u32, RunningChild>>,
  cancel: CancellationToken,
}

impl Launcher {
  pub(crate) fn new(profile: Arc<WatchProfile>, store: Arc<LogStore>, cancel: CancellationToken) -> Self {
    let limiter = match profile.max_concurrent_processes {
      0 => None,
      n => Some(Arc::new(Semaphore::new(n))),
    };
    Self {
      profile,
      store,
      limiter,
      running: Arc::new(DashMap::new()),
      cancel,
    }
  }

  /// Number of children currently running for this profile
  pub(crate) fn running(&self) -> usize {
    self.running.len()
  }

  /// Spawn the configured executable for one ready file.
  ///
  /// Waits cooperatively on the concurrency bound. A missing executable or a
  /// failed spawn journals a `ProcessError` and returns `Ok` - the file was
  /// handled as far as the pipeline is concerned.
  pub(crate) async fn launch(&self, event: &FileEvent) -> Result<(), LaunchError> {
    let exe = &self.profile.executable_path;
    if exe.as_os_str().is_empty() || !exe.is_file() {
      error!(profile = %self.profile.name, exe = %exe.display(), "Executable not found");
      let entry = LogEntry::new(
        LogKind::ProcessError,
        format!(
          "Profile '{}': executable not found: {}",
          self.profile.name,
          exe.display()
        ),
      );
      if let Err(e) = self.store.append(entry).await {
        warn!(error = %e, "Failed to journal launch precondition failure");
      }
      return Ok(());
    }

    let permit = match &self.limiter {
      Some(semaphore) => {
        let acquired = tokio::select! {
          biased;
          _ = self.cancel.cancelled() => return Err(LaunchError::ShuttingDown),
          acquired = Arc::clone(semaphore).acquire_owned() => acquired,
        };
        match acquired {
          Ok(permit) => Some(permit),
          Err(_) => return Err(LaunchError::ShuttingDown),
        }
      }
      None => None,
    };

    let args = expand_arguments(&self.profile.arguments, &event.path);
    let working_dir = exe
      .parent()
      .filter(|dir| !dir.as_os_str().is_empty() && dir.is_dir())
      .map(Path::to_path_buf)
      .or_else(|| std::env::current_dir().ok());

    let mut command = Command::new(exe);
    command
      .args(&args)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true);
    if let Some(dir) = working_dir {
      command.current_dir(dir);
    }

    let mut child = match command.spawn() {
      Ok(child) => child,
      Err(e) => {
        error!(profile = %self.profile.name, exe = %exe.display(), error = %e, "Failed to spawn process");
        let entry = LogEntry::new(
          LogKind::ProcessError,
          format!(
            "Failed to launch {} for {}: {}",
            exe.display(),
            event.path.display(),
            e
          ),
        );
        if let Err(e) = self.store.append(entry).await {
          warn!(error = %e, "Failed to journal spawn failure");
        }
        return Ok(());
      }
    };

    let pid = child.id().unwrap_or(0);
    self.running.insert(
      pid,
      RunningChild {
        path: event.path.clone(),
        started_at: Utc::now(),
      },
    );

    info!(
      profile = %self.profile.name,
      exe = %exe.display(),
      path = %event.path.display(),
      pid,
      "Launched process"
    );
    let entry = LogEntry::new(
      LogKind::ProcessLaunch,
      format!(
        "Launched {} for {} (pid {})",
        exe.display(),
        event.path.display(),
        pid
      ),
    );
    if let Err(e) = self.store.append(entry).await {
      warn!(error = %e, "Failed to journal launch");
    }

    if let Some(stdout) = child.stdout.take() {
      forward_stdout(self.profile.name.clone(), pid, stdout);
    }
    if let Some(stderr) = child.stderr.take() {
      forward_stderr(self.profile.name.clone(), pid, stderr);
    }

    // Exit task: owns the child and the permit; removes the pid and journals
    // the outcome exactly once
    let running = Arc::clone(&self.running);
    let store = Arc::clone(&self.store);
    let cancel = self.cancel.clone();
    let profile_name = self.profile.name.clone();
    let file_path = event.path.clone();
    tokio::spawn(async move {
      let mut killed = false;
      let status = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
          debug!(profile = %profile_name, pid, "Terminating child at shutdown");
          killed = true;
          if let Err(e) = child.kill().await {
            debug!(pid, error = %e, "Child already exited");
          }
          child.wait().await
        }
        status = child.wait() => status,
      };

      running.remove(&pid);
      drop(permit);

      let entry = match status {
        _ if killed => LogEntry::new(
          LogKind::ProcessError,
          format!("Process {} for {} terminated during shutdown", pid, file_path.display()),
        ),
        Ok(status) if status.success() => LogEntry::new(
          LogKind::ProcessLaunch,
          format!("Process {} completed successfully for {}", pid, file_path.display()),
        ),
        Ok(status) => LogEntry::new(
          LogKind::ProcessError,
          match status.code() {
            Some(code) => format!("Process {} exited with code {} for {}", pid, code, file_path.display()),
            None => format!("Process {} terminated by signal for {}", pid, file_path.display()),
          },
        ),
        Err(e) => LogEntry::new(
          LogKind::ProcessError,
          format!("Failed to collect exit status of process {pid}: {e}"),
        ),
      };
      if let Err(e) = store.append(entry).await {
        warn!(pid, error = %e, "Failed to journal child exit");
      }
    });

    Ok(())
  }
}

fn forward_stdout(profile: String, pid: u32, stream: ChildStdout) {
  tokio::spawn(async move {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
      debug!(profile = %profile, pid, "{}", line);
    }
  });
}

fn forward_stderr(profile: String, pid: u32, stream: ChildStderr) {
  tokio::spawn(async move {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
      error!(profile = %profile, pid, "{}", line);
    }
  });
}

// ============================================================================
// Argument Templates
// ============================================================================

/// Tokenize an argument template.
///
/// Double quotes group characters into one token without being part of it;
/// unquoted whitespace splits tokens. Placeholders are NOT expanded here -
/// expansion happens per token afterwards so substituted values containing
/// spaces do not re-split.
pub(crate) fn split_arguments(template: &str) -> Vec<String> {
  let mut tokens = Vec::new();
  let mut current = String::new();
  let mut in_quotes = false;
  let mut pending = false;

  for ch in template.chars() {
    match ch {
      '"' => {
        in_quotes = !in_quotes;
        pending = true;
      }
      c if c.is_whitespace() && !in_quotes => {
        if pending {
          tokens.push(std::mem::take(&mut current));
          pending = false;
        }
      }
      c => {
        current.push(c);
        pending = true;
      }
    }
  }
  if pending {
    tokens.push(current);
  }
  tokens
}

/// Tokenize the template and expand `{FilePath}` / `{FolderPath}` in each
/// token.
pub(crate) fn expand_arguments(template: &str, file_path: &Path) -> Vec<String> {
  let file = file_path.display().to_string();
  let folder = file_path
    .parent()
    .map(|p| p.display().to_string())
    .unwrap_or_default();

  split_arguments(template)
    .into_iter()
    .map(|token| token.replace("{FilePath}", &file).replace("{FolderPath}", &folder))
    .collect()
}
