//! Lumen Config
//!
//! This crate contains the serializable types consumed by the lumen engine:
//! the document exported by the visual node editor, and the engine
//! configuration.
//!
//! Documents can be loaded from:
//! - JSON files (via CLI with `lumen run graph.json`)
//! - The embedding application (as JSON blobs handed over by the editor)
//!
//! The graph crate turns an [`EditorDocument`] into an in-memory graph, and
//! back again for export.

mod document;
mod engine;

pub use document::{
  DEFAULT_MODULE, EditorDocument, EditorModule, EditorNode, InputConnection, InputSlot,
  OutputConnection, OutputSlot,
};
pub use engine::EngineConfig;
