//! Runtime errors.

use lumen_graph::{GraphError, NodeId};
use lumen_registry::{NodeError, RegistryError};
use lumen_signal::BusError;

/// Errors that can occur while starting or driving a graph.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
  /// The graph cannot be ordered.
  #[error("invalid graph: {0}")]
  Graph(#[from] GraphError),

  /// A node declares a type with no registered behavior.
  #[error("node '{node_id}' has unknown type '{node_type}'")]
  UnknownNodeType { node_id: NodeId, node_type: String },

  /// More nodes of a type than the type allows.
  #[error("node type '{node_type}' allows {limit} instance(s), graph has {count}")]
  InstanceLimit {
    node_type: String,
    limit: usize,
    count: usize,
  },

  #[error("registry error: {0}")]
  Registry(RegistryError),

  #[error("node '{node_id}' not found in graph")]
  NodeNotFound { node_id: NodeId },

  /// A single node failed to initialize.
  #[error("node '{node_id}' failed to initialize")]
  Node {
    node_id: NodeId,
    #[source]
    source: NodeError,
  },

  #[error("graph runtime not started")]
  NotStarted,

  #[error(transparent)]
  Bus(#[from] BusError),
}

impl From<RegistryError> for RuntimeError {
  fn from(error: RegistryError) -> Self {
    match error {
      RegistryError::UnknownType { node_id, node_type } => {
        RuntimeError::UnknownNodeType { node_id, node_type }
      }
      RegistryError::InstanceLimit {
        node_type,
        limit,
        count,
      } => RuntimeError::InstanceLimit {
        node_type,
        limit,
        count,
      },
      other => RuntimeError::Registry(other),
    }
  }
}
