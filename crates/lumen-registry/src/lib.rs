//! Node type registry for lumen.
//!
//! Maps the type string declared by each graph node (`"logic.gate"`,
//! `"action.flashlight"`, ...) to the [`NodeBehavior`] that initializes it.
//! The executor looks behaviors up here, merges their default settings with
//! the node's own configuration, validates, then calls `execute`.

mod behavior;
mod descriptor;
mod error;
mod logger;
mod registry;

pub use behavior::{NodeBehavior, NodeContext, NodeOutput};
pub use descriptor::{NodeCategory, NodeDescriptor, PortKind, PortSpec};
pub use error::{NodeError, RegistryError};
pub use logger::NodeLogger;
pub use registry::{NodeTypeRegistry, merge_settings};
