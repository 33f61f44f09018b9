use thiserror::Error;

use crate::node::NodeId;

#[derive(Debug, Error)]
pub enum GraphError {
  #[error("duplicate node id: {0}")]
  DuplicateNode(NodeId),

  #[error("edge references unknown node: from={from}, to={to}")]
  InvalidEdge { from: NodeId, to: NodeId },

  #[error("graph contains a cycle through nodes {remaining:?}")]
  CycleDetected { remaining: Vec<NodeId> },

  #[error("node {node_id} has no declared type")]
  MissingType { node_id: NodeId },

  #[error("node {node_id} has an invalid connection: {message}")]
  InvalidConnection { node_id: NodeId, message: String },

  #[error("invalid editor document: {0}")]
  InvalidDocument(#[from] serde_json::Error),
}
