use lumen_graph::NodeId;
use tracing::{debug, error, info, warn};

/// Logging callback handed to node initializers and handlers.
///
/// Every line is tagged with the node id and type.
#[derive(Debug, Clone)]
pub struct NodeLogger {
  node_id: NodeId,
  node_type: String,
}

impl NodeLogger {
  pub fn new(node_id: NodeId, node_type: impl Into<String>) -> Self {
    Self {
      node_id,
      node_type: node_type.into(),
    }
  }

  pub fn debug(&self, message: &str) {
    debug!(node_id = %self.node_id, node_type = %self.node_type, "{}", message);
  }

  pub fn info(&self, message: &str) {
    info!(node_id = %self.node_id, node_type = %self.node_type, "{}", message);
  }

  pub fn warn(&self, message: &str) {
    warn!(node_id = %self.node_id, node_type = %self.node_type, "{}", message);
  }

  pub fn error(&self, message: &str) {
    error!(node_id = %self.node_id, node_type = %self.node_type, "{}", message);
  }
}
