//! Node type descriptors.

use serde::{Deserialize, Serialize};

/// Palette grouping of a node type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeCategory {
  Trigger,
  Condition,
  Logic,
  Flow,
  Action,
  Data,
}

/// Semantic tag of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortKind {
  /// Carries runtime signals.
  Signal,
  /// Carries a value produced once during initialization.
  Value,
}

/// A declared input or output port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
  pub name: String,
  pub kind: PortKind,
  #[serde(default)]
  pub required: bool,
}

impl PortSpec {
  pub fn signal(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      kind: PortKind::Signal,
      required: false,
    }
  }

  pub fn value(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      kind: PortKind::Value,
      required: false,
    }
  }

  pub fn required(mut self) -> Self {
    self.required = true;
    self
  }
}

/// Static description of a node type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDescriptor {
  /// Type id referenced by graph nodes, e.g. `"logic.gate"`.
  pub id: String,
  /// Display name.
  pub name: String,
  pub category: NodeCategory,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub description: String,
  #[serde(default)]
  pub inputs: Vec<PortSpec>,
  #[serde(default)]
  pub outputs: Vec<PortSpec>,
  /// Default settings, overlaid by each node's own configuration.
  #[serde(default)]
  pub defaults: serde_json::Value,
  /// Maximum number of nodes of this type in one graph.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_instances: Option<usize>,
}

impl NodeDescriptor {
  pub fn new(id: impl Into<String>, name: impl Into<String>, category: NodeCategory) -> Self {
    Self {
      id: id.into(),
      name: name.into(),
      category,
      description: String::new(),
      inputs: Vec::new(),
      outputs: Vec::new(),
      defaults: serde_json::Value::Object(Default::default()),
      max_instances: None,
    }
  }

  pub fn description(mut self, description: impl Into<String>) -> Self {
    self.description = description.into();
    self
  }

  pub fn input(mut self, port: PortSpec) -> Self {
    self.inputs.push(port);
    self
  }

  pub fn output(mut self, port: PortSpec) -> Self {
    self.outputs.push(port);
    self
  }

  pub fn defaults(mut self, defaults: serde_json::Value) -> Self {
    self.defaults = defaults;
    self
  }

  pub fn max_instances(mut self, limit: usize) -> Self {
    self.max_instances = Some(limit);
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_descriptor_serializes_for_palette() {
    let descriptor = NodeDescriptor::new("trigger.interval", "Interval", NodeCategory::Trigger)
      .output(PortSpec::signal("out"))
      .defaults(json!({ "interval_ms": 1000 }))
      .max_instances(8);

    let value = serde_json::to_value(&descriptor).unwrap();
    assert_eq!(value["category"], "trigger");
    assert_eq!(value["outputs"][0]["kind"], "signal");
    assert_eq!(value["max_instances"], 8);
    assert!(value.get("description").is_none());
  }
}
