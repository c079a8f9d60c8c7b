//! Messages understood by a profile actor.

use tokio::sync::mpsc;

/// A request sent to a [`super::profile::ProfileActor`]
#[derive(Debug)]
pub enum ProfileMessage {
  /// Enumerate the watch directory and admit every file, bypassing the
  /// cooldown. Replies with the number of files admitted.
  ScanNow { reply: mpsc::Sender<usize> },
  /// Tear the profile down: stop watching, drain workers, terminate children
  Shutdown,
}
