//! Topological initialization.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use lumen_graph::{GraphNode, NodeId};
use lumen_registry::{NodeContext, NodeError, NodeLogger, NodeOutput, NodeTypeRegistry};
use lumen_signal::SignalBus;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::error::RuntimeError;

/// Outcome of one initialization pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionReport {
  /// Unique execution ID.
  pub execution_id: String,
  /// Initialization order.
  pub order: Vec<NodeId>,
  /// Nodes whose initializer succeeded, in order.
  pub initialized: Vec<NodeId>,
  /// Values produced by value nodes, keyed by node id.
  pub outputs: BTreeMap<NodeId, Value>,
  /// Per-node failures, keyed by node id.
  pub errors: BTreeMap<NodeId, String>,
}

impl ExecutionReport {
  pub fn is_clean(&self) -> bool {
    self.errors.is_empty()
  }

  pub(crate) fn record_success(&mut self, node_id: NodeId, output: NodeOutput) {
    self.errors.remove(&node_id);
    if !self.initialized.contains(&node_id) {
      self.initialized.push(node_id);
    }
    match output.value {
      Some(value) => self.outputs.insert(node_id, value),
      None => self.outputs.remove(&node_id),
    };
  }

  pub(crate) fn record_failure(&mut self, node_id: NodeId, error: &NodeError) {
    self.initialized.retain(|id| *id != node_id);
    self.outputs.remove(&node_id);
    self.errors.insert(node_id, error.to_string());
  }
}

/// Runs every node's one-time initializer in dependency order.
pub struct Executor<'a> {
  registry: &'a NodeTypeRegistry,
}

impl<'a> Executor<'a> {
  pub fn new(registry: &'a NodeTypeRegistry) -> Self {
    Self { registry }
  }

  /// Initialize the bus's graph.
  ///
  /// Cycles, unknown node types and instance limits fail the whole pass
  /// before any node runs. Per-node failures land in the report.
  #[instrument(
    name = "graph_execute",
    skip(self, bus),
    fields(nodes = bus.graph().len())
  )]
  pub async fn execute(&self, bus: &SignalBus) -> Result<ExecutionReport, RuntimeError> {
    let graph = bus.graph();
    let order = graph.topological_order()?;
    self.registry.check_graph(graph)?;

    let mut report = ExecutionReport {
      execution_id: uuid::Uuid::new_v4().to_string(),
      order: order.clone(),
      ..Default::default()
    };
    info!(execution_id = %report.execution_id, "graph_execution_started");

    for node_id in order {
      let Some(node) = graph.node(node_id) else {
        continue;
      };
      match self.initialize_node(node, &report.outputs, bus).await {
        Ok(output) => {
          debug!(node_id = %node_id, node_type = %node.node_type, "node_initialized");
          report.record_success(node_id, output);
        }
        Err(e) => {
          warn!(
            node_id = %node_id,
            node_type = %node.node_type,
            error = %e,
            "node_initialization_failed"
          );
          report.record_failure(node_id, &e);
        }
      }
    }

    info!(
      execution_id = %report.execution_id,
      initialized = report.initialized.len(),
      failed = report.errors.len(),
      "graph_execution_completed"
    );
    Ok(report)
  }

  /// Validate and initialize a single node.
  ///
  /// `outputs` holds the values already produced in this pass; the node sees
  /// those of its upstream nodes as resolved inputs.
  pub async fn initialize_node(
    &self,
    node: &GraphNode,
    outputs: &BTreeMap<NodeId, Value>,
    bus: &SignalBus,
  ) -> Result<NodeOutput, NodeError> {
    let behavior = self
      .registry
      .get(&node.node_type)
      .ok_or_else(|| NodeError::failed(format!("unknown node type '{}'", node.node_type)))?;

    let settings = self.registry.settings_for(&node.node_type, &node.config);
    behavior.validate(&settings)?;

    let inputs = node
      .inputs
      .iter()
      .filter_map(|id| outputs.get(id).map(|value| (*id, value.clone())))
      .collect();

    let ctx = NodeContext {
      node_id: node.id,
      node: node.clone(),
      inputs,
      settings,
      bus: bus.clone(),
      logger: NodeLogger::new(node.id, node.node_type.clone()),
    };

    AssertUnwindSafe(behavior.execute(ctx))
      .catch_unwind()
      .await
      .unwrap_or_else(|payload| {
        Err(NodeError::Panicked {
          message: panic_message(payload),
        })
      })
  }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    s.to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic".to_string()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_report_record_replaces_previous_outcome() {
    let mut report = ExecutionReport::default();
    report.record_failure(1, &NodeError::invalid("missing key"));
    assert!(!report.is_clean());
    assert!(report.errors[&1].contains("missing key"));

    report.record_success(1, NodeOutput::value(serde_json::json!(3)));
    assert!(report.is_clean());
    assert_eq!(report.initialized, vec![1]);
    assert_eq!(report.outputs[&1], serde_json::json!(3));

    report.record_success(1, NodeOutput::none());
    assert_eq!(report.initialized, vec![1]);
    assert!(report.outputs.is_empty());
  }
}
