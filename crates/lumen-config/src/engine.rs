use serde::{Deserialize, Serialize};

use crate::document::DEFAULT_MODULE;

/// Engine configuration.
///
/// Every field has a default, so a partial (or empty) JSON object is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Maximum length of the diagnostic execution stack. Oldest entries are
  /// dropped first.
  pub max_execution_stack: usize,

  /// Maximum number of top-level signals waiting in the queue.
  pub max_queue_length: usize,

  /// Editor module imported when loading a document.
  pub default_module: String,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      max_execution_stack: 1024,
      max_queue_length: 10_000,
      default_module: DEFAULT_MODULE.to_string(),
    }
  }
}
