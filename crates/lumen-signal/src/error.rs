//! Bus and handler errors.

use lumen_graph::NodeId;

/// Errors returned by bus operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BusError {
  /// The source node is not part of the graph.
  #[error("node {node_id} not found in graph")]
  UnknownNode { node_id: NodeId },

  /// The signal queue is at capacity.
  #[error("signal queue full ({capacity} pending)")]
  QueueFull { capacity: usize },
}

/// Errors raised by a node's signal handler.
///
/// A handler error terminates the branch it occurred on; sibling branches and
/// the rest of the queue are unaffected.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
  /// The handler rejected or failed to process the signal.
  #[error("handler failed: {message}")]
  Failed { message: String },

  /// The handler panicked.
  #[error("handler panicked: {message}")]
  Panicked { message: String },

  /// A bus operation made by the handler failed.
  #[error(transparent)]
  Bus(#[from] BusError),
}

impl HandlerError {
  /// Create a handler failure.
  pub fn failed(message: impl Into<String>) -> Self {
    Self::Failed {
      message: message.into(),
    }
  }
}
