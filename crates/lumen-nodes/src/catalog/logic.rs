//! Gate and branch nodes.

use async_trait::async_trait;
use lumen_registry::{
  NodeBehavior, NodeCategory, NodeContext, NodeDescriptor, NodeError, NodeOutput, PortSpec,
};
use serde_json::{Value, json};

use crate::branch::{BranchSource, IfElse};
use crate::gate::{GateSettings, LogicGate};

/// `logic.gate`: combines several ON/OFF inputs with a boolean operator.
pub struct LogicGateNode {
  descriptor: NodeDescriptor,
}

impl LogicGateNode {
  pub fn new() -> Self {
    Self {
      descriptor: NodeDescriptor::new("logic.gate", "Logic Gate", NodeCategory::Logic)
        .description("Combines its inputs with AND, OR, XOR, XNOR, NAND, NOR or NOT")
        .input(PortSpec::signal("input_a").required())
        .input(PortSpec::signal("input_b"))
        .output(PortSpec::signal("out"))
        .defaults(json!({
          "operator": "AND",
          "input_count": 2,
          "invert_output": false,
          "reset_after_eval": false,
        })),
    }
  }
}

#[async_trait]
impl NodeBehavior for LogicGateNode {
  fn descriptor(&self) -> &NodeDescriptor {
    &self.descriptor
  }

  fn validate(&self, settings: &Value) -> Result<(), NodeError> {
    GateSettings::from_settings(settings).map(|_| ())
  }

  async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
    let settings = GateSettings::from_settings(&ctx.settings)?;
    ctx.bus.register_handler(
      ctx.node_id,
      LogicGate::new(ctx.node_id, ctx.node.inputs.clone(), settings),
    );
    Ok(NodeOutput::none())
  }

  fn render(&self, settings: &Value) -> Option<String> {
    let operator = settings.get("operator").and_then(Value::as_str).unwrap_or("AND");
    Some(format!("<span class=\"lumen-gate\">{}</span>", operator.to_ascii_uppercase()))
  }
}

/// `logic.if_else`: routes to the first output port when the test holds,
/// to the second otherwise.
pub struct IfElseNode {
  descriptor: NodeDescriptor,
}

impl IfElseNode {
  pub fn new() -> Self {
    Self {
      descriptor: NodeDescriptor::new("logic.if_else", "If / Else", NodeCategory::Logic)
        .description("Routes the signal to the true or false output")
        .input(PortSpec::signal("in").required())
        .output(PortSpec::signal("true"))
        .output(PortSpec::signal("false"))
        .defaults(json!({ "invert": false })),
    }
  }
}

#[async_trait]
impl NodeBehavior for IfElseNode {
  fn descriptor(&self) -> &NodeDescriptor {
    &self.descriptor
  }

  fn validate(&self, settings: &Value) -> Result<(), NodeError> {
    BranchSource::from_settings(settings).map(|_| ())
  }

  async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
    let source = BranchSource::from_settings(&ctx.settings)?;
    let invert = ctx.setting_bool("invert").unwrap_or(false);
    ctx
      .bus
      .register_handler(ctx.node_id, IfElse::new(ctx.node.clone(), source, invert));
    Ok(NodeOutput::none())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_if_else_validation() {
    let node = IfElseNode::new();
    assert!(node.validate(&json!({ "expression": "count >= 3" })).is_ok());
    assert!(node.validate(&json!({ "expression": "count >=" })).is_err());
  }

  #[test]
  fn test_gate_render() {
    let node = LogicGateNode::new();
    assert_eq!(
      node.render(&json!({ "operator": "xor" })).as_deref(),
      Some("<span class=\"lumen-gate\">XOR</span>")
    );
  }
}
