//! Shared execution context.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use lumen_graph::NodeId;
use parking_lot::Mutex;
use serde_json::Value;

use crate::signal::now_millis;

#[derive(Debug)]
struct ContextState {
  variables: BTreeMap<String, Value>,
  execution_stack: VecDeque<NodeId>,
  started_at: u64,
  metadata: serde_json::Map<String, Value>,
}

/// Process-lifetime state shared by every node of one bus instance.
///
/// Cloning is cheap and yields a handle to the same state.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
  state: Arc<Mutex<ContextState>>,
  max_stack: usize,
}

impl ExecutionContext {
  /// Create a fresh context whose execution stack keeps at most `max_stack`
  /// entries.
  pub fn new(max_stack: usize) -> Self {
    Self {
      state: Arc::new(Mutex::new(ContextState {
        variables: BTreeMap::new(),
        execution_stack: VecDeque::new(),
        started_at: now_millis(),
        metadata: serde_json::Map::new(),
      })),
      max_stack,
    }
  }

  pub fn get_variable(&self, key: &str) -> Option<Value> {
    self.state.lock().variables.get(key).cloned()
  }

  /// Set a variable, returning the previous value.
  pub fn set_variable(&self, key: impl Into<String>, value: Value) -> Option<Value> {
    self.state.lock().variables.insert(key.into(), value)
  }

  pub fn delete_variable(&self, key: &str) -> Option<Value> {
    self.state.lock().variables.remove(key)
  }

  /// Snapshot of every variable.
  pub fn variables(&self) -> BTreeMap<String, Value> {
    self.state.lock().variables.clone()
  }

  /// Record a visited node on the diagnostic stack.
  pub fn record_visit(&self, node_id: NodeId) {
    let mut state = self.state.lock();
    state.execution_stack.push_back(node_id);
    while state.execution_stack.len() > self.max_stack {
      state.execution_stack.pop_front();
    }
  }

  /// Snapshot of the diagnostic stack, oldest first.
  pub fn execution_stack(&self) -> Vec<NodeId> {
    self.state.lock().execution_stack.iter().copied().collect()
  }

  pub fn started_at(&self) -> u64 {
    self.state.lock().started_at
  }

  pub fn metadata(&self, key: &str) -> Option<Value> {
    self.state.lock().metadata.get(key).cloned()
  }

  pub fn set_metadata(&self, key: impl Into<String>, value: Value) {
    self.state.lock().metadata.insert(key.into(), value);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_variables_shared_between_clones() {
    let ctx = ExecutionContext::new(8);
    let other = ctx.clone();

    assert_eq!(ctx.set_variable("count", json!(1)), None);
    assert_eq!(other.get_variable("count"), Some(json!(1)));
    assert_eq!(other.set_variable("count", json!(2)), Some(json!(1)));
    assert_eq!(ctx.delete_variable("count"), Some(json!(2)));
    assert!(ctx.variables().is_empty());
  }

  #[test]
  fn test_execution_stack_is_bounded() {
    let ctx = ExecutionContext::new(3);
    for id in 1..=5 {
      ctx.record_visit(id);
    }
    assert_eq!(ctx.execution_stack(), vec![3, 4, 5]);
  }
}
