//! Condition nodes: a predicate wired into the shared condition machine.

use std::sync::Arc;

use async_trait::async_trait;
use lumen_registry::{
  NodeBehavior, NodeCategory, NodeContext, NodeDescriptor, NodeError, NodeOutput, PortSpec,
};
use serde_json::{Value, json};

use crate::capability::Torch;
use crate::condition::{
  ConditionMachine, ConditionSettings, EventPredicate, TorchPredicate, VariablePredicate,
};

fn condition_descriptor(id: &str, name: &str, description: &str, extra: Value) -> NodeDescriptor {
  let mut defaults = json!({ "invert_signal": false, "timer_duration": 0 });
  if let (Some(defaults), Value::Object(extra)) = (defaults.as_object_mut(), extra) {
    defaults.extend(extra);
  }
  NodeDescriptor::new(id, name, NodeCategory::Condition)
    .description(description)
    .input(PortSpec::signal("in").required())
    .output(PortSpec::signal("out"))
    .defaults(defaults)
}

fn required_str<'a>(settings: &'a Value, key: &str) -> Result<&'a str, NodeError> {
  settings
    .get(key)
    .and_then(Value::as_str)
    .filter(|s| !s.is_empty())
    .ok_or_else(|| NodeError::invalid(format!("'{}' is required", key)))
}

/// `condition.flashlight`: passes while the torch is on.
pub struct FlashlightCondition {
  descriptor: NodeDescriptor,
  torch: Arc<dyn Torch>,
}

impl FlashlightCondition {
  pub fn new(torch: Arc<dyn Torch>) -> Self {
    Self {
      descriptor: condition_descriptor(
        "condition.flashlight",
        "Flashlight On",
        "Passes the signal while the flashlight is on",
        json!({}),
      ),
      torch,
    }
  }
}

#[async_trait]
impl NodeBehavior for FlashlightCondition {
  fn descriptor(&self) -> &NodeDescriptor {
    &self.descriptor
  }

  fn validate(&self, settings: &Value) -> Result<(), NodeError> {
    ConditionSettings::from_settings(settings).map(|_| ())
  }

  async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
    let settings = ConditionSettings::from_settings(&ctx.settings)?;
    ConditionMachine::install(
      ctx.node_id,
      TorchPredicate::new(self.torch.clone()),
      settings,
      &ctx.bus,
    );
    ctx.logger.debug(&format!("condition armed in {:?} mode", settings.mode));
    Ok(NodeOutput::none())
  }

  fn render(&self, settings: &Value) -> Option<String> {
    let inverted = settings
      .get("invert_signal")
      .and_then(Value::as_bool)
      .unwrap_or(false);
    Some(format!(
      "<span class=\"lumen-condition\">flashlight {}</span>",
      if inverted { "off" } else { "on" }
    ))
  }
}

/// `condition.variable`: passes while a variable is truthy, or equals
/// `expected` when that is set.
pub struct VariableCondition {
  descriptor: NodeDescriptor,
}

impl VariableCondition {
  pub fn new() -> Self {
    Self {
      descriptor: condition_descriptor(
        "condition.variable",
        "Variable",
        "Passes the signal while a variable matches",
        json!({ "key": "", "expected": null }),
      ),
    }
  }
}

#[async_trait]
impl NodeBehavior for VariableCondition {
  fn descriptor(&self) -> &NodeDescriptor {
    &self.descriptor
  }

  fn validate(&self, settings: &Value) -> Result<(), NodeError> {
    required_str(settings, "key")?;
    ConditionSettings::from_settings(settings).map(|_| ())
  }

  async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
    let key = required_str(&ctx.settings, "key")?;
    let expected = ctx.settings.get("expected").filter(|v| !v.is_null()).cloned();
    let settings = ConditionSettings::from_settings(&ctx.settings)?;
    ConditionMachine::install(
      ctx.node_id,
      VariablePredicate::new(key, expected),
      settings,
      &ctx.bus,
    );
    Ok(NodeOutput::none())
  }
}

/// `condition.event`: passes while the last payload of a named event was
/// truthy.
pub struct EventCondition {
  descriptor: NodeDescriptor,
}

impl EventCondition {
  pub fn new() -> Self {
    Self {
      descriptor: condition_descriptor(
        "condition.event",
        "Event State",
        "Passes the signal while the last event reported true",
        json!({ "event": "", "initial": false }),
      ),
    }
  }
}

#[async_trait]
impl NodeBehavior for EventCondition {
  fn descriptor(&self) -> &NodeDescriptor {
    &self.descriptor
  }

  fn validate(&self, settings: &Value) -> Result<(), NodeError> {
    required_str(settings, "event")?;
    ConditionSettings::from_settings(settings).map(|_| ())
  }

  async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
    let event = required_str(&ctx.settings, "event")?;
    let initial = ctx.setting_bool("initial").unwrap_or(false);
    let settings = ConditionSettings::from_settings(&ctx.settings)?;
    ConditionMachine::install(
      ctx.node_id,
      EventPredicate::new(event, initial),
      settings,
      &ctx.bus,
    );
    Ok(NodeOutput::none())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use lumen_registry::merge_settings;

  #[test]
  fn test_condition_defaults() {
    let node = VariableCondition::new();
    let defaults = &node.descriptor().defaults;
    assert_eq!(defaults["timer_duration"], json!(0));
    assert_eq!(defaults["invert_signal"], json!(false));
    assert_eq!(defaults["key"], json!(""));

    assert!(node.validate(defaults).is_err());
    let settings = merge_settings(defaults, &json!({ "key": "armed" }));
    assert!(node.validate(&settings).is_ok());
  }

  #[test]
  fn test_event_condition_requires_event() {
    let node = EventCondition::new();
    assert!(node.validate(&json!({ "event": "" })).is_err());
    assert!(node.validate(&json!({ "event": "door", "mode": "bogus" })).is_err());
    assert!(node.validate(&json!({ "event": "door", "timer_duration": 500 })).is_ok());
  }
}
