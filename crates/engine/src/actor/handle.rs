//! Handles for communicating with profile actors
//!
//! Handles are cheap to clone and wrap the actor's message channel.

use tokio::sync::mpsc;

use super::message::ProfileMessage;

/// Handle to a running profile actor
#[derive(Clone, Debug)]
pub struct ProfileHandle {
  pub(crate) tx: mpsc::Sender<ProfileMessage>,
}

impl ProfileHandle {
  pub(crate) fn new(tx: mpsc::Sender<ProfileMessage>) -> Self {
    Self { tx }
  }

  /// Trigger a manual scan and wait for the admitted count.
  ///
  /// Manual scans bypass the cooldown but obey every other admission rule.
  pub async fn scan_now(&self) -> Result<usize, SendError> {
    let (reply_tx, mut reply_rx) = mpsc::channel(1);
    self
      .tx
      .send(ProfileMessage::ScanNow { reply: reply_tx })
      .await
      .map_err(|_| SendError::ActorGone)?;
    reply_rx.recv().await.ok_or(SendError::ActorGone)
  }

  /// Request shutdown and wait until the actor has fully torn down
  /// (watcher stopped, workers drained, children terminated).
  pub async fn shutdown(&self) {
    // Best-effort: the actor may already be stopping via its cancel token
    let _ = self.tx.send(ProfileMessage::Shutdown).await;
    // The receiver is dropped when the actor task finishes its cleanup
    self.tx.closed().await;
  }
}

/// Error when sending to a profile actor
#[derive(Debug, Clone, thiserror::Error)]
pub enum SendError {
  #[error("Profile actor has shut down")]
  ActorGone,
}
