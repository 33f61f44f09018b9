//! Graph runtime.

use std::sync::Arc;

use lumen_graph::{Graph, NodeId};
use lumen_registry::NodeTypeRegistry;
use lumen_signal::{BusConfig, SignalBus};
use serde_json::Value;
use tracing::{info, instrument};

use crate::error::RuntimeError;
use crate::executor::{ExecutionReport, Executor};

/// A live graph instance.
///
/// Owns the bus for one graph and the registry its nodes were initialized
/// from. Dropping the runtime shuts it down.
pub struct GraphRuntime {
  bus: SignalBus,
  registry: NodeTypeRegistry,
  report: Option<ExecutionReport>,
}

impl GraphRuntime {
  pub fn new(graph: Graph, registry: NodeTypeRegistry) -> Self {
    Self::with_config(graph, registry, BusConfig::default())
  }

  pub fn with_config(graph: Graph, registry: NodeTypeRegistry, config: BusConfig) -> Self {
    Self {
      bus: SignalBus::with_config(Arc::new(graph), config),
      registry,
      report: None,
    }
  }

  pub fn bus(&self) -> &SignalBus {
    &self.bus
  }

  pub fn graph(&self) -> &Graph {
    self.bus.graph()
  }

  pub fn registry(&self) -> &NodeTypeRegistry {
    &self.registry
  }

  /// Report of the last start, if running.
  pub fn report(&self) -> Option<&ExecutionReport> {
    self.report.as_ref()
  }

  pub fn is_running(&self) -> bool {
    self.report.is_some()
  }

  /// Initialize every node. Starting a running graph restarts it from a
  /// clean bus.
  pub async fn start(&mut self) -> Result<&ExecutionReport, RuntimeError> {
    if self.report.take().is_some() {
      self.bus.reset();
    }
    let report = Executor::new(&self.registry).execute(&self.bus).await?;
    Ok(self.report.insert(report))
  }

  /// Emit a top-level signal from `node_id`.
  #[instrument(name = "graph_trigger", skip(self, data))]
  pub async fn trigger(&self, node_id: NodeId, data: Option<Value>) -> Result<(), RuntimeError> {
    if self.report.is_none() {
      return Err(RuntimeError::NotStarted);
    }
    self.bus.emit_signal(node_id, data).await?;
    Ok(())
  }

  /// Dispose one node's handler and subscriptions and run its initializer
  /// again with the current settings.
  pub async fn reinitialize_node(&mut self, node_id: NodeId) -> Result<(), RuntimeError> {
    let Some(report) = self.report.as_mut() else {
      return Err(RuntimeError::NotStarted);
    };
    let node = self
      .bus
      .graph()
      .node(node_id)
      .ok_or(RuntimeError::NodeNotFound { node_id })?
      .clone();

    self.bus.unregister_handler(node_id);
    let released = self.bus.unsubscribe_node(node_id);
    info!(node_id = %node_id, released, "node_reinitializing");

    match Executor::new(&self.registry)
      .initialize_node(&node, &report.outputs, &self.bus)
      .await
    {
      Ok(output) => {
        report.record_success(node_id, output);
        Ok(())
      }
      Err(source) => {
        report.record_failure(node_id, &source);
        Err(RuntimeError::Node { node_id, source })
      }
    }
  }

  /// Drop every handler, timer, subscription and variable.
  pub fn shutdown(&mut self) {
    self.bus.reset();
    if self.report.take().is_some() {
      info!("graph_runtime_shutdown");
    }
  }
}

impl Drop for GraphRuntime {
  fn drop(&mut self) {
    self.shutdown();
  }
}
