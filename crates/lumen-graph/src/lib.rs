//! Lumen Graph
//!
//! This crate provides the in-memory signal graph for lumen. A graph is built
//! once, either programmatically through [`GraphBuilder`] or by importing an
//! editor document, and is immutable afterwards.
//!
//! Key differences from `lumen-config`:
//! - Edges are validated (both endpoints exist)
//! - Every node carries its ordered upstream and downstream node ids
//! - A topological order can be computed, rejecting cyclic graphs

mod document;
mod error;
mod graph;
mod node;

pub use error::GraphError;
pub use graph::{Graph, GraphBuilder};
pub use node::{GraphNode, NodeId, OutputPort};
