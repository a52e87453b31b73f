//! Change notifications for projection consumers.
//!
//! The engine emits a [`ProjectionChange`] after every update that actually
//! changed a projection, so consumers can re-read the affected entry instead
//! of polling.

use serde::Serialize;
use tokio::sync::mpsc;

/// Which part of the projections changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum ProjectionChange {
  Run { run_id: String },
  Node { run_id: String, node_id: String },
  Worker { worker_name: String },
}

pub trait ChangeNotifier: Send + Sync {
  fn notify(&self, change: ProjectionChange);
}

#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ChangeNotifier for NoopNotifier {
  fn notify(&self, _change: ProjectionChange) {}
}

/// Forwards changes to an unbounded channel.
///
/// Sending never blocks, so frame processing does not wait on the consumer.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<ProjectionChange>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ProjectionChange>) -> Self {
    Self { sender }
  }
}

impl ChangeNotifier for ChannelNotifier {
  fn notify(&self, change: ProjectionChange) {
    // Receiver may have been dropped.
    let _ = self.sender.send(change);
  }
}
