//! Actor-based pipeline primitives
//!
//! Each watch profile runs as a set of long-lived tasks communicating over
//! bounded channels; state is owned, not shared, except for the keyed sets
//! (active files, cooldowns, running children) which are concurrent maps
//! with test-and-set semantics.
//!
//! # Pipeline
//!
//! ```text
//! WatcherTask ──offer──> Admission ──try_send──> work queue (1000)
//!                                                     │
//!                                     workers (max(2, N)) dequeue
//!                                                     │
//!                            readiness gate ──ready──> Launcher ──> child
//! ```
//!
//! # Actors
//!
//! - [`profile::ProfileActor`]: owns the watcher, queue, workers, and
//!   launcher for one profile; torn down as a unit
//! - [`manager::ProfileManager`]: installs and removes profile actors at
//!   runtime, sharing one journal store

mod admission;
mod handle;
mod launcher;
mod manager;
mod message;
mod profile;
mod watcher;
mod worker;

#[cfg(test)]
mod __tests__;

pub use handle::{ProfileHandle, SendError};
pub use manager::{ProfileManager, ProfileManagerError};
