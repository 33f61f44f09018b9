//! Registry and node errors.

use lumen_graph::NodeId;
use lumen_signal::BusError;

/// Errors raised while registering node types or checking a graph against
/// the registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
  /// A behavior with this type id is already registered.
  #[error("node type '{node_type}' is already registered")]
  DuplicateType { node_type: String },

  /// A graph node declares a type with no registered behavior.
  #[error("node '{node_id}' has unknown type '{node_type}'")]
  UnknownType { node_id: NodeId, node_type: String },

  /// More nodes of a type than it allows.
  #[error("node type '{node_type}' allows {limit} instance(s), graph has {count}")]
  InstanceLimit {
    node_type: String,
    limit: usize,
    count: usize,
  },
}

/// Errors raised by a node's validation or initialization.
///
/// These are isolated to the node: the executor records them and carries on
/// with the rest of the graph.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
  /// The node's settings were rejected.
  #[error("invalid settings: {message}")]
  InvalidSettings { message: String },

  /// A required input was not produced upstream.
  #[error("missing input '{port}'")]
  MissingInput { port: String },

  /// Initialization failed.
  #[error("initialization failed: {message}")]
  Failed { message: String },

  /// The initializer panicked.
  #[error("initializer panicked: {message}")]
  Panicked { message: String },

  #[error(transparent)]
  Bus(#[from] BusError),
}

impl NodeError {
  pub fn invalid(message: impl Into<String>) -> Self {
    Self::InvalidSettings {
      message: message.into(),
    }
  }

  pub fn failed(message: impl Into<String>) -> Self {
    Self::Failed {
      message: message.into(),
    }
  }
}
