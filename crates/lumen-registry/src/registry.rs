//! Node type registry.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use lumen_graph::Graph;
use serde_json::Value;

use crate::behavior::NodeBehavior;
use crate::descriptor::NodeDescriptor;
use crate::error::RegistryError;

/// Lookup table from node type id to behavior.
#[derive(Default, Clone)]
pub struct NodeTypeRegistry {
  types: BTreeMap<String, Arc<dyn NodeBehavior>>,
}

impl NodeTypeRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a behavior under its descriptor id.
  pub fn register<B>(&mut self, behavior: B) -> Result<(), RegistryError>
  where
    B: NodeBehavior + 'static,
  {
    let node_type = behavior.descriptor().id.clone();
    if self.types.contains_key(&node_type) {
      return Err(RegistryError::DuplicateType { node_type });
    }
    self.types.insert(node_type, Arc::new(behavior));
    Ok(())
  }

  pub fn get(&self, node_type: &str) -> Option<Arc<dyn NodeBehavior>> {
    self.types.get(node_type).cloned()
  }

  pub fn contains(&self, node_type: &str) -> bool {
    self.types.contains_key(node_type)
  }

  /// Descriptors of every registered type, sorted by id.
  pub fn descriptors(&self) -> impl Iterator<Item = &NodeDescriptor> {
    self.types.values().map(|b| b.descriptor())
  }

  pub fn len(&self) -> usize {
    self.types.len()
  }

  pub fn is_empty(&self) -> bool {
    self.types.is_empty()
  }

  /// Settings for a node: its type's defaults overlaid by `config`.
  pub fn settings_for(&self, node_type: &str, config: &Value) -> Value {
    match self.types.get(node_type) {
      Some(behavior) => merge_settings(&behavior.descriptor().defaults, config),
      None => config.clone(),
    }
  }

  /// Check that every node has a registered type and that no type exceeds
  /// its instance limit.
  pub fn check_graph(&self, graph: &Graph) -> Result<(), RegistryError> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for node in graph.nodes() {
      if !self.types.contains_key(&node.node_type) {
        return Err(RegistryError::UnknownType {
          node_id: node.id,
          node_type: node.node_type.clone(),
        });
      }
      *counts.entry(node.node_type.as_str()).or_default() += 1;
    }

    for descriptor in self.descriptors() {
      let count = counts.get(descriptor.id.as_str()).copied().unwrap_or(0);
      if let Some(limit) = descriptor.max_instances
        && count > limit
      {
        return Err(RegistryError::InstanceLimit {
          node_type: descriptor.id.clone(),
          limit,
          count,
        });
      }
    }

    Ok(())
  }
}

/// Shallow key-by-key overlay of `config` onto `defaults`.
///
/// Non-object configs leave the defaults untouched.
pub fn merge_settings(defaults: &Value, config: &Value) -> Value {
  let mut merged = match defaults {
    Value::Object(map) => map.clone(),
    _ => serde_json::Map::new(),
  };
  if let Value::Object(overrides) = config {
    for (key, value) in overrides {
      merged.insert(key.clone(), value.clone());
    }
  }
  Value::Object(merged)
}
