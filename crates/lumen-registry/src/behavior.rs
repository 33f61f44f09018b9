//! The node behavior trait.

use std::collections::BTreeMap;

use async_trait::async_trait;
use lumen_graph::{GraphNode, NodeId};
use lumen_signal::SignalBus;
use serde_json::Value;

use crate::descriptor::NodeDescriptor;
use crate::error::NodeError;
use crate::logger::NodeLogger;

/// Everything a node's initializer receives.
pub struct NodeContext {
  pub node_id: NodeId,
  pub node: GraphNode,
  /// Values produced by upstream nodes earlier in the same pass, keyed by
  /// upstream node id.
  pub inputs: BTreeMap<NodeId, Value>,
  /// Type defaults overlaid by the node's own configuration.
  pub settings: Value,
  pub bus: SignalBus,
  pub logger: NodeLogger,
}

impl NodeContext {
  /// Read a boolean setting.
  pub fn setting_bool(&self, key: &str) -> Option<bool> {
    self.settings.get(key).and_then(Value::as_bool)
  }

  /// The first resolved input value, if any upstream node produced one.
  pub fn first_input(&self) -> Option<&Value> {
    self.inputs.values().next()
  }
}

/// Result of a successful initialization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeOutput {
  /// Value made available to downstream initializers.
  pub value: Option<Value>,
}

impl NodeOutput {
  pub fn none() -> Self {
    Self::default()
  }

  pub fn value(value: Value) -> Self {
    Self { value: Some(value) }
  }
}

/// Behavior of one node type.
///
/// `execute` runs once per node when the graph starts. It is where a node
/// registers its signal handler or event subscriptions with the bus; it does
/// not exchange signals itself.
#[async_trait]
pub trait NodeBehavior: Send + Sync {
  fn descriptor(&self) -> &NodeDescriptor;

  /// Pre-flight check of the merged settings.
  fn validate(&self, _settings: &Value) -> Result<(), NodeError> {
    Ok(())
  }

  async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError>;

  /// HTML body shown by the visual editor.
  fn render(&self, _settings: &Value) -> Option<String> {
    None
  }
}
