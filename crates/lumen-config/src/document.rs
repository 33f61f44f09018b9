//! Editor export format.
//!
//! The editor stores one record per node, keyed by the node id as a string,
//! nested under a named module:
//!
//! ```json
//! {
//!   "drawflow": {
//!     "Home": {
//!       "data": {
//!         "1": {
//!           "id": 1,
//!           "name": "Manual",
//!           "data": { "type": "trigger.manual" },
//!           "inputs": {},
//!           "outputs": {
//!             "output_1": { "connections": [{ "node": "2", "output": "input_1" }] }
//!           },
//!           "pos_x": 120.0,
//!           "pos_y": 80.0
//!         }
//!       }
//!     }
//!   }
//! }
//! ```
//!
//! Layout coordinates and markup are carried through untouched but have no
//! meaning to the engine.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

/// Module name used by the editor when the user never created another one.
pub const DEFAULT_MODULE: &str = "Home";

/// Top-level editor document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EditorDocument {
  #[serde(default)]
  pub drawflow: BTreeMap<String, EditorModule>,
}

impl EditorDocument {
  /// Look up a module by name.
  pub fn module(&self, name: &str) -> Option<&EditorModule> {
    self.drawflow.get(name)
  }
}

/// A named group of nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EditorModule {
  #[serde(default)]
  pub data: BTreeMap<String, EditorNode>,
}

/// A single node as exported by the editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditorNode {
  pub id: u64,
  #[serde(default)]
  pub name: String,
  /// Node configuration. The `type` field selects the node-type registry entry.
  #[serde(default)]
  pub data: serde_json::Map<String, serde_json::Value>,
  #[serde(default)]
  pub class: String,
  #[serde(default)]
  pub html: String,
  #[serde(default)]
  pub typenode: serde_json::Value,
  #[serde(default)]
  pub inputs: BTreeMap<String, InputSlot>,
  #[serde(default)]
  pub outputs: BTreeMap<String, OutputSlot>,
  #[serde(default)]
  pub pos_x: f64,
  #[serde(default)]
  pub pos_y: f64,
}

impl EditorNode {
  /// The declared node type, if present.
  pub fn node_type(&self) -> Option<&str> {
    self.data.get("type").and_then(|v| v.as_str())
  }
}

/// An output slot and the connections leaving it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputSlot {
  #[serde(default)]
  pub connections: Vec<OutputConnection>,
}

/// An input slot and the connections arriving at it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputSlot {
  #[serde(default)]
  pub connections: Vec<InputConnection>,
}

/// Connection leaving an output slot: target node and the target's input slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConnection {
  #[serde(deserialize_with = "string_or_number")]
  pub node: String,
  pub output: String,
}

/// Connection arriving at an input slot: source node and the source's output slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputConnection {
  #[serde(deserialize_with = "string_or_number")]
  pub node: String,
  pub input: String,
}

/// The editor writes node references as strings, older exports as numbers.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
  D: Deserializer<'de>,
{
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum Reference {
    Text(String),
    Number(u64),
  }

  Ok(match Reference::deserialize(deserializer)? {
    Reference::Text(s) => s,
    Reference::Number(n) => n.to_string(),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_parse_minimal_document() {
    let doc: EditorDocument = serde_json::from_value(json!({
      "drawflow": {
        "Home": {
          "data": {
            "1": {
              "id": 1,
              "name": "Manual",
              "data": { "type": "trigger.manual" },
              "outputs": {
                "output_1": { "connections": [{ "node": "2", "output": "input_1" }] }
              }
            },
            "2": {
              "id": 2,
              "name": "Log",
              "data": { "type": "action.log", "template": "hi" },
              "inputs": {
                "input_1": { "connections": [{ "node": 1, "input": "output_1" }] }
              }
            }
          }
        }
      }
    }))
    .unwrap();

    let module = doc.module(DEFAULT_MODULE).unwrap();
    assert_eq!(module.data.len(), 2);
    assert_eq!(module.data["1"].node_type(), Some("trigger.manual"));
    assert_eq!(
      module.data["1"].outputs["output_1"].connections[0].node,
      "2"
    );
    // Numeric node references are normalized to strings.
    assert_eq!(module.data["2"].inputs["input_1"].connections[0].node, "1");
  }

  #[test]
  fn test_missing_module_is_none() {
    let doc: EditorDocument = serde_json::from_value(json!({ "drawflow": {} })).unwrap();
    assert!(doc.module(DEFAULT_MODULE).is_none());
  }
}
