use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::error::GraphError;
use crate::node::{GraphNode, NodeId, OutputPort, slot_index};

/// Signal graph: nodes keyed by id plus the edge list used to build them.
///
/// Propagation walks `GraphNode::outputs`; the edge list is only kept for
/// construction and export.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Graph {
  nodes: BTreeMap<NodeId, GraphNode>,
  edges: Vec<(NodeId, NodeId)>,
}

impl Graph {
  /// Start building a graph.
  pub fn builder() -> GraphBuilder {
    GraphBuilder::default()
  }

  /// Get a node by id.
  pub fn node(&self, node_id: NodeId) -> Option<&GraphNode> {
    self.nodes.get(&node_id)
  }

  /// Check whether a node exists.
  pub fn contains(&self, node_id: NodeId) -> bool {
    self.nodes.contains_key(&node_id)
  }

  /// All nodes, in ascending id order.
  pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
    self.nodes.values()
  }

  /// All edges, in insertion order.
  pub fn edges(&self) -> &[(NodeId, NodeId)] {
    &self.edges
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  /// Get downstream nodes for a given node.
  pub fn downstream(&self, node_id: NodeId) -> &[NodeId] {
    self
      .nodes
      .get(&node_id)
      .map(|n| n.outputs.as_slice())
      .unwrap_or(&[])
  }

  /// Get upstream nodes for a given node.
  pub fn upstream(&self, node_id: NodeId) -> &[NodeId] {
    self
      .nodes
      .get(&node_id)
      .map(|n| n.inputs.as_slice())
      .unwrap_or(&[])
  }

  /// Nodes with no incoming edges.
  pub fn entry_points(&self) -> Vec<NodeId> {
    self
      .nodes
      .values()
      .filter(|n| n.inputs.is_empty())
      .map(|n| n.id)
      .collect()
  }

  /// Order the nodes so that every node comes after all of its inputs.
  ///
  /// Uses Kahn's algorithm. Entry points come first by ascending id, then
  /// nodes in the order they become ready, so the result is deterministic.
  /// Fails with [`GraphError::CycleDetected`] when
  /// some nodes never reach in-degree zero.
  pub fn topological_order(&self) -> Result<Vec<NodeId>, GraphError> {
    let mut in_degree: HashMap<NodeId, usize> = self
      .nodes
      .values()
      .map(|n| (n.id, n.inputs.len()))
      .collect();

    let mut ready: VecDeque<NodeId> = self.entry_points().into();
    let mut order = Vec::with_capacity(self.nodes.len());

    while let Some(node_id) = ready.pop_front() {
      order.push(node_id);
      for next in self.downstream(node_id) {
        if let Some(degree) = in_degree.get_mut(next)
          && *degree > 0
        {
          *degree -= 1;
          if *degree == 0 {
            ready.push_back(*next);
          }
        }
      }
    }

    if order.len() < self.nodes.len() {
      let remaining = self
        .nodes
        .keys()
        .filter(|id| !order.contains(id))
        .copied()
        .collect();
      return Err(GraphError::CycleDetected { remaining });
    }

    Ok(order)
  }
}

/// Builder for [`Graph`].
///
/// Errors are deferred until [`GraphBuilder::build`] so calls can be chained.
#[derive(Debug, Default)]
pub struct GraphBuilder {
  nodes: BTreeMap<NodeId, GraphNode>,
  edges: Vec<(NodeId, Option<String>, NodeId)>,
  error: Option<GraphError>,
}

impl GraphBuilder {
  /// Add a node with an empty configuration.
  pub fn node(self, id: NodeId, node_type: &str) -> Self {
    self.add(GraphNode::new(id, node_type))
  }

  /// Add a node with a configuration payload.
  pub fn node_with(self, id: NodeId, node_type: &str, config: serde_json::Value) -> Self {
    self.add(GraphNode::new(id, node_type).with_config(config))
  }

  /// Add a prepared node. Any inputs/outputs it carries are discarded; edges
  /// are the only source of adjacency.
  pub fn add(mut self, mut node: GraphNode) -> Self {
    node.inputs.clear();
    node.outputs.clear();
    node.ports.clear();
    if self.nodes.contains_key(&node.id) {
      self.error.get_or_insert(GraphError::DuplicateNode(node.id));
      return self;
    }
    self.nodes.insert(node.id, node);
    self
  }

  /// Connect `from` to `to` on a fresh output port.
  pub fn edge(mut self, from: NodeId, to: NodeId) -> Self {
    self.edges.push((from, None, to));
    self
  }

  /// Connect `from` to `to` on the named output port.
  pub fn port_edge(mut self, from: NodeId, port: &str, to: NodeId) -> Self {
    self.edges.push((from, Some(port.to_string()), to));
    self
  }

  pub fn build(self) -> Result<Graph, GraphError> {
    if let Some(error) = self.error {
      return Err(error);
    }

    let mut nodes = self.nodes;
    let mut edges = Vec::with_capacity(self.edges.len());

    for (from, port, to) in self.edges {
      if !nodes.contains_key(&from) || !nodes.contains_key(&to) {
        return Err(GraphError::InvalidEdge { from, to });
      }

      if let Some(source) = nodes.get_mut(&from) {
        let name = port.unwrap_or_else(|| next_port_name(&source.ports));
        match source.ports.iter_mut().find(|p| p.name == name) {
          Some(existing) => existing.targets.push(to),
          None => source.ports.push(OutputPort {
            name,
            targets: vec![to],
          }),
        }
      }
      if let Some(target) = nodes.get_mut(&to) {
        target.inputs.push(from);
      }
      edges.push((from, to));
    }

    for node in nodes.values_mut() {
      node
        .ports
        .sort_by_key(|port| slot_index(&port.name).unwrap_or(usize::MAX));
      node.outputs = node
        .ports
        .iter()
        .flat_map(|port| port.targets.iter().copied())
        .collect();
    }

    Ok(Graph { nodes, edges })
  }
}

fn next_port_name(ports: &[OutputPort]) -> String {
  let mut index = ports.len() + 1;
  loop {
    let name = format!("output_{}", index);
    if !ports.iter().any(|p| p.name == name) {
      return name;
    }
    index += 1;
  }
}
