//! Value-producing nodes.

use async_trait::async_trait;
use lumen_registry::{
  NodeBehavior, NodeCategory, NodeContext, NodeDescriptor, NodeError, NodeOutput, PortSpec,
};
use serde_json::{Value, json};

/// `data.constant`: provides its `value` to downstream initializers.
pub struct ConstantNode {
  descriptor: NodeDescriptor,
}

impl ConstantNode {
  pub fn new() -> Self {
    Self {
      descriptor: NodeDescriptor::new("data.constant", "Constant", NodeCategory::Data)
        .description("A fixed value read by downstream nodes during initialization")
        .output(PortSpec::value("value"))
        .defaults(json!({ "value": null })),
    }
  }
}

#[async_trait]
impl NodeBehavior for ConstantNode {
  fn descriptor(&self) -> &NodeDescriptor {
    &self.descriptor
  }

  async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
    let value = ctx.settings.get("value").cloned().unwrap_or(Value::Null);
    Ok(NodeOutput::value(value))
  }

  fn render(&self, settings: &Value) -> Option<String> {
    let value = settings.get("value").cloned().unwrap_or(Value::Null);
    Some(format!("<code class=\"lumen-constant\">{}</code>", value))
  }
}
