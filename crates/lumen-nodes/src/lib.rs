//! Built-in node behaviors for lumen.
//!
//! Besides the [`catalog`] of registrable node types, this crate holds the
//! machinery those nodes share:
//!
//! - [`condition`]: the Idle / Armed-Waiting / Active state machine behind
//!   every condition node, with continuous, timer and switch modes
//! - [`gate`]: multi-input boolean gates with per-source input slots
//! - [`branch`]: if/else routing over an input field, a variable or an
//!   [`expression`]
//! - [`capability`]: the device traits (torch, vibrator, volume, permissions)
//!   that actions drive, plus in-memory devices

pub mod branch;
pub mod capability;
pub mod catalog;
pub mod condition;
mod error;
pub mod expression;
pub mod gate;

pub use branch::{BranchSource, IfElse};
pub use capability::{
  Capabilities, Capability, FLASHLIGHT_STATE_CHANGED, PermissionGate, SimulatedDevices, Torch,
  TorchMonitor, Vibrator, VolumeControl,
};
pub use catalog::{builtin_registry, register_builtin};
pub use condition::{
  CONDITION_BLOCKED, ConditionMachine, ConditionMode, ConditionSettings, Predicate,
  VARIABLE_CHANGED,
};
pub use error::{CapabilityError, ExpressionError};
pub use expression::{Expression, Scope};
pub use gate::{GateOperator, GateSettings, LogicGate};
