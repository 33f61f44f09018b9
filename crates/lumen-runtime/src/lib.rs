//! Graph runtime for lumen.
//!
//! Turns a built [`Graph`](lumen_graph::Graph) and a node-type registry into
//! a live graph instance.
//!
//! # Architecture
//!
//! ```text
//! GraphRuntime
//! ├── start()                     - Executor::execute over the bus
//! ├── trigger(node_id, data)      - emit a top-level signal
//! ├── reinitialize_node(node_id)  - dispose and re-run one initializer
//! └── shutdown()                  - reset the bus
//!
//! Executor::execute(bus)
//! ├── topological order           - fails on cycles
//! ├── registry check              - unknown types, instance limits
//! └── per node, in order: merge settings, validate, execute
//! ```
//!
//! Structural errors abort before any node initializes. A node whose
//! validation or initializer fails is recorded in the report and the rest of
//! the graph still starts.

mod error;
mod executor;
mod runtime;

pub use error::RuntimeError;
pub use executor::{ExecutionReport, Executor};
pub use runtime::GraphRuntime;
