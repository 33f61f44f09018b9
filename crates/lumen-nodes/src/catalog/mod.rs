//! Built-in node types.

mod actions;
mod conditions;
mod data;
mod flow;
mod logic;
mod triggers;

pub use actions::{
  FlashlightAction, LAST_LOG_VARIABLE, LogAction, SetVariableAction, VibrateAction, VolumeAction,
};
pub use conditions::{EventCondition, FlashlightCondition, VariableCondition};
pub use data::ConstantNode;
pub use flow::{DelayNode, LoopNode};
pub use logic::{IfElseNode, LogicGateNode};
pub use triggers::{EventTrigger, IntervalTrigger, ManualTrigger};

use lumen_registry::{NodeTypeRegistry, RegistryError};

use crate::capability::Capabilities;

/// Register every built-in node type.
pub fn register_builtin(
  registry: &mut NodeTypeRegistry,
  capabilities: &Capabilities,
) -> Result<(), RegistryError> {
  registry.register(ManualTrigger::new())?;
  registry.register(EventTrigger::new())?;
  registry.register(IntervalTrigger::new())?;

  registry.register(FlashlightCondition::new(capabilities.torch.clone()))?;
  registry.register(VariableCondition::new())?;
  registry.register(EventCondition::new())?;

  registry.register(LogicGateNode::new())?;
  registry.register(IfElseNode::new())?;

  registry.register(DelayNode::new())?;
  registry.register(LoopNode::new())?;

  registry.register(FlashlightAction::new(capabilities.clone()))?;
  registry.register(VibrateAction::new(capabilities.clone()))?;
  registry.register(VolumeAction::new(capabilities.clone()))?;
  registry.register(SetVariableAction::new())?;
  registry.register(LogAction::new())?;

  registry.register(ConstantNode::new())?;
  Ok(())
}

/// A registry holding the built-in node types.
pub fn builtin_registry(capabilities: &Capabilities) -> Result<NodeTypeRegistry, RegistryError> {
  let mut registry = NodeTypeRegistry::new();
  register_builtin(&mut registry, capabilities)?;
  Ok(registry)
}
