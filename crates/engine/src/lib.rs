//! FileBridge engine - watches directories and launches a configured
//! executable for every file that arrives and is safe to hand off.
//!
//! The engine is a pipeline of long-lived tasks per watch profile:
//!
//! ```text
//! ProfileManager
//!   └── ProfileActor (one per watch profile)
//!         ├── WatcherTask   (notifications + rescans -> admission)
//!         ├── Admission     (dedup, ignore/marker rules, cooldown, enqueue)
//!         ├── Worker pool   (readiness checks -> launcher)
//!         └── Launcher      (bounded process spawning, exit collection)
//! ```
//!
//! All profiles share one [`LogStore`], an append-only rotating JSON journal
//! that external consumers read and subscribe to.

mod actor;
mod daemon;
mod logstore;
mod scheduler;

pub use actor::{ProfileHandle, ProfileManager, ProfileManagerError, SendError};
pub use daemon::{Daemon, DaemonError};
pub use logstore::{LogPage, LogQuery, LogStore, LogStoreConfig, LogStoreError, PostAppendHook};
pub use scheduler::RetentionScheduler;
