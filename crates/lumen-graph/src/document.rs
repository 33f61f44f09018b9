//! Conversion between editor documents and graphs.

use std::collections::{BTreeMap, BTreeSet};

use lumen_config::{
  EditorDocument, EditorModule, EditorNode, InputConnection, InputSlot, OutputConnection,
  OutputSlot,
};

use crate::error::GraphError;
use crate::graph::Graph;
use crate::node::{GraphNode, NodeId, slot_index};

impl Graph {
  /// Parse an editor document from JSON and import the given module.
  pub fn from_json_str(json: &str, module: &str) -> Result<Self, GraphError> {
    let doc: EditorDocument = serde_json::from_str(json)?;
    Self::from_document(&doc, module)
  }

  /// Import a module of an editor document.
  ///
  /// A missing module yields an empty graph. Adjacency is taken from the
  /// output side of each connection; the editor's mirrored input records are
  /// ignored.
  pub fn from_document(doc: &EditorDocument, module: &str) -> Result<Self, GraphError> {
    let Some(module) = doc.module(module) else {
      return Ok(Graph::default());
    };

    let mut entries: Vec<&EditorNode> = module.data.values().collect();
    entries.sort_by_key(|entry| entry.id);

    let mut builder = Graph::builder();
    for entry in &entries {
      let node_type = entry
        .node_type()
        .ok_or(GraphError::MissingType { node_id: entry.id })?;

      let mut config = entry.data.clone();
      config.remove("type");

      builder = builder.add(
        GraphNode::new(entry.id, node_type)
          .with_name(entry.name.clone())
          .with_config(serde_json::Value::Object(config)),
      );
    }

    for entry in &entries {
      let mut slots: Vec<(&String, &OutputSlot)> = entry.outputs.iter().collect();
      slots.sort_by_key(|(name, _)| slot_index(name).unwrap_or(usize::MAX));

      for (name, slot) in slots {
        for connection in &slot.connections {
          let target: NodeId =
            connection
              .node
              .parse()
              .map_err(|_| GraphError::InvalidConnection {
                node_id: entry.id,
                message: format!("invalid target node '{}'", connection.node),
              })?;
          builder = builder.port_edge(entry.id, name, target);
        }
      }
    }

    builder.build()
  }

  /// Export the graph as an editor document with a single module.
  ///
  /// Slot names are re-synthesized from the adjacency lists. Numbered output
  /// ports keep their number so branch routing survives a round trip; input
  /// slots are numbered by upstream position. Layout is not preserved.
  pub fn to_document(&self, module: &str) -> EditorDocument {
    let mut data = BTreeMap::new();

    for node in self.nodes() {
      let mut config = match &node.config {
        serde_json::Value::Object(map) => map.clone(),
        serde_json::Value::Null => serde_json::Map::new(),
        other => {
          let mut map = serde_json::Map::new();
          map.insert("value".to_string(), other.clone());
          map
        }
      };
      config.insert(
        "type".to_string(),
        serde_json::Value::String(node.node_type.clone()),
      );

      let names = export_port_names(node);
      let outputs = node
        .ports
        .iter()
        .zip(names)
        .map(|(port, name)| {
          let connections = port
            .targets
            .iter()
            .map(|target| OutputConnection {
              node: target.to_string(),
              output: self.input_slot_name(*target, node.id),
            })
            .collect();
          (name, OutputSlot { connections })
        })
        .collect();

      let inputs = node
        .inputs
        .iter()
        .enumerate()
        .map(|(index, source)| {
          let connection = InputConnection {
            node: source.to_string(),
            input: self.output_slot_name(*source, node.id),
          };
          (
            format!("input_{}", index + 1),
            InputSlot {
              connections: vec![connection],
            },
          )
        })
        .collect();

      data.insert(
        node.id.to_string(),
        EditorNode {
          id: node.id,
          name: node.name.clone(),
          data: config,
          class: node.node_type.clone(),
          html: String::new(),
          typenode: serde_json::Value::Bool(false),
          inputs,
          outputs,
          pos_x: 0.0,
          pos_y: 0.0,
        },
      );
    }

    let mut doc = EditorDocument::default();
    doc
      .drawflow
      .insert(module.to_string(), EditorModule { data });
    doc
  }

  /// Input slot of `target` that `source` arrives on.
  fn input_slot_name(&self, target: NodeId, source: NodeId) -> String {
    let position = self
      .upstream(target)
      .iter()
      .position(|id| *id == source)
      .unwrap_or(0);
    format!("input_{}", position + 1)
  }

  /// Output slot of `source` that leads to `target`.
  fn output_slot_name(&self, source: NodeId, target: NodeId) -> String {
    self
      .node(source)
      .and_then(|node| {
        let position = node
          .ports
          .iter()
          .position(|port| port.targets.contains(&target))?;
        export_port_names(node).into_iter().nth(position)
      })
      .unwrap_or_else(|| "output_1".to_string())
  }
}

/// Exported slot names for `node`'s ports, in port order.
///
/// Numbered ports keep their number. Any other port takes `output_{n}` for
/// its position, or the next free number when that one is already used.
fn export_port_names(node: &GraphNode) -> Vec<String> {
  let mut used = BTreeSet::new();
  let numbers: Vec<Option<usize>> = node
    .ports
    .iter()
    .map(|port| slot_index(&port.name).filter(|n| used.insert(*n)))
    .collect();

  numbers
    .into_iter()
    .enumerate()
    .map(|(index, number)| {
      let n = number.unwrap_or_else(|| {
        let mut n = index + 1;
        while !used.insert(n) {
          n += 1;
        }
        n
      });
      format!("output_{}", n)
    })
    .collect()
}
