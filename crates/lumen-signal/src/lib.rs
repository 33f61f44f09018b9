//! Signal bus for lumen.
//!
//! The [`SignalBus`] is the runtime core of a graph instance. It owns the
//! per-node handlers, a FIFO queue of top-level signal emissions, the shared
//! variable store and the event subscription table.
//!
//! # Architecture
//!
//! ```text
//! SignalBus
//! ├── emit_signal(source, data)           - enqueue, drain if idle
//! ├── emit_signal_immediate(source, data) - propagate now, bypass the queue
//! ├── register_handler / unregister_handler
//! ├── set_variable / get_variable / delete_variable / get_all_variables
//! ├── emit_event / subscribe_to_event     - notifications outside graph edges
//! └── reset()                             - drop handlers, queue, context, subscriptions
//! ```
//!
//! Propagation is depth-first and strictly sequential: a node's outputs are
//! visited in order, and each branch's full subtree completes before the next
//! sibling starts. Only one top-level signal propagates at a time; signals
//! emitted from inside a handler are queued behind it.

mod bus;
mod context;
mod error;
mod events;
mod handler;
mod signal;

pub use bus::{BusConfig, BusStats, SignalBus};
pub use context::ExecutionContext;
pub use error::{BusError, HandlerError};
pub use events::EventSubscription;
pub use handler::{FnHandler, SignalHandler, handler_fn};
pub use signal::{Signal, SignalPropagation, level_of, now_millis, with_level};

pub use lumen_graph::NodeId;
