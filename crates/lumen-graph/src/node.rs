use serde::{Deserialize, Serialize};

/// Node identifier, as assigned by the editor.
pub type NodeId = u64;

/// A named output port and the nodes connected to it, in connection order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputPort {
  pub name: String,
  pub targets: Vec<NodeId>,
}

/// A node in the signal graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
  pub id: NodeId,
  /// Display name from the editor.
  pub name: String,
  /// Declared type, selects the node-type registry entry.
  pub node_type: String,
  /// Free-form user configuration.
  pub config: serde_json::Value,
  /// Upstream node ids, in edge order.
  pub inputs: Vec<NodeId>,
  /// Downstream node ids, in port order then connection order.
  ///
  /// By convention output 0 is the primary (true) branch and output 1 the
  /// secondary (false) branch for branching nodes.
  pub outputs: Vec<NodeId>,
  /// Output ports the downstream ids were grouped under.
  pub ports: Vec<OutputPort>,
}

impl GraphNode {
  pub fn new(id: NodeId, node_type: impl Into<String>) -> Self {
    let node_type = node_type.into();
    Self {
      id,
      name: node_type.clone(),
      node_type,
      config: serde_json::Value::Object(Default::default()),
      inputs: Vec::new(),
      outputs: Vec::new(),
      ports: Vec::new(),
    }
  }

  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  pub fn with_config(mut self, config: serde_json::Value) -> Self {
    self.config = config;
    self
  }

  /// Targets of the output at `index`.
  ///
  /// Nodes with numbered ports (`output_1`, `output_2`, ...) resolve by slot
  /// number, so a branch with only its second port connected still routes
  /// correctly. Otherwise falls back to the positional output.
  pub fn branch_targets(&self, index: usize) -> Vec<NodeId> {
    if self.ports.iter().any(|p| slot_index(&p.name).is_some()) {
      return self
        .ports
        .iter()
        .find(|p| slot_index(&p.name) == Some(index + 1))
        .map(|port| port.targets.clone())
        .unwrap_or_default();
    }
    self.outputs.get(index).map(|id| vec![*id]).unwrap_or_default()
  }
}

/// Numeric suffix of a slot name such as `output_3`.
pub(crate) fn slot_index(name: &str) -> Option<usize> {
  name.rsplit('_').next().and_then(|n| n.parse().ok())
}
