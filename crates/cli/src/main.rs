//! FileBridge CLI - watch directories and launch a configured executable for
//! every file that arrives and is safe to hand off.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use filebridge_core::{Config, LogKind};
use filebridge_engine::{Daemon, LogQuery, LogStore, LogStoreConfig};

mod logging;

use logging::{init_cli_logging, init_daemon_logging};

#[derive(Parser)]
#[command(name = "filebridge")]
#[command(about = "File-triggered process launcher")]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Run the watch daemon in the foreground
  Run {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = "filebridge.json")]
    config: PathBuf,
  },
  /// Validate a configuration file and print the profile summary
  Validate {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = "filebridge.json")]
    config: PathBuf,
  },
  /// Query the on-disk journal
  Logs {
    /// Journal directory
    #[arg(short, long, default_value = "logs")]
    directory: PathBuf,
    /// Only entries at or after this instant (RFC 3339)
    #[arg(long)]
    from: Option<String>,
    /// Only entries at or before this instant (RFC 3339)
    #[arg(long)]
    to: Option<String>,
    /// Filter by kind: FileEvent, ProcessLaunch, ProcessError, WatcherError
    #[arg(long)]
    kind: Option<String>,
    /// 0-based page index
    #[arg(long, default_value = "0")]
    page: usize,
    /// Entries per page
    #[arg(long, default_value = "50")]
    page_size: usize,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();

  match cli.command {
    Commands::Run { config } => cmd_run(config).await,
    Commands::Validate { config } => cmd_validate(config),
    Commands::Logs {
      directory,
      from,
      to,
      kind,
      page,
      page_size,
    } => cmd_logs(directory, from, to, kind, page, page_size).await,
  }
}

async fn cmd_run(config_path: PathBuf) -> Result<()> {
  let config = Config::load(&config_path).with_context(|| format!("loading {}", config_path.display()))?;
  config.validate().context("invalid configuration")?;

  // Keep the appender guard alive for the daemon's lifetime
  let _guard = init_daemon_logging(&config.log_directory);

  Daemon::new(config).run().await?;
  Ok(())
}

fn cmd_validate(config_path: PathBuf) -> Result<()> {
  init_cli_logging();

  let config = Config::load(&config_path).with_context(|| format!("loading {}", config_path.display()))?;
  config.validate().context("invalid configuration")?;

  println!("{}: {} profile(s)", config_path.display(), config.apps.len());
  for app in &config.apps {
    println!(
      "  {}: {} -> {} ({}s poll, {} max children{})",
      app.name,
      app.watch_directory.display(),
      app.executable_path.display(),
      app.polling_interval_seconds,
      if app.max_concurrent_processes == 0 {
        "unbounded".to_string()
      } else {
        app.max_concurrent_processes.to_string()
      },
      if app.marker_file_patterns.is_empty() {
        String::new()
      } else {
        format!(", markers {:?}", app.marker_file_patterns)
      },
    );
    if !app.watch_directory.is_dir() {
      println!("    warning: watch directory does not exist (profile will stay idle)");
    }
  }
  println!(
    "journal: {} (retention {} days, {} entries/file)",
    config.log_directory.display(),
    config.log_retention_days,
    config.max_logs_per_file
  );
  Ok(())
}

async fn cmd_logs(
  directory: PathBuf,
  from: Option<String>,
  to: Option<String>,
  kind: Option<String>,
  page: usize,
  page_size: usize,
) -> Result<()> {
  let kind = match kind {
    Some(text) => Some(text.parse::<LogKind>().map_err(|e| anyhow::anyhow!(e))?),
    None => None,
  };

  let store = LogStore::new(LogStoreConfig {
    directory: directory.clone(),
    max_logs_per_file: 10_000,
    retention_days: 0,
  })
  .with_context(|| format!("opening journal directory {}", directory.display()))?;

  let query = LogQuery {
    from: parse_instant(from.as_deref())?,
    to: parse_instant(to.as_deref())?,
    kind,
    page,
    page_size,
  };
  let result = store.query(&query).await;

  for entry in &result.entries {
    match &entry.details {
      Some(details) => println!(
        "{}  {:14} {}  ({})",
        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
        entry.log_type.to_string(),
        entry.message,
        details
      ),
      None => println!(
        "{}  {:14} {}",
        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
        entry.log_type.to_string(),
        entry.message
      ),
    }
  }
  println!(
    "page {} ({} shown, {} total)",
    query.page,
    result.entries.len(),
    result.total
  );
  Ok(())
}

fn parse_instant(text: Option<&str>) -> Result<Option<DateTime<Utc>>> {
  let Some(text) = text else { return Ok(None) };
  match DateTime::parse_from_rfc3339(text) {
    Ok(parsed) => Ok(Some(parsed.with_timezone(&Utc))),
    Err(e) => bail!("invalid timestamp '{text}': {e}"),
  }
}
