//! Multi-input logic gate.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use async_trait::async_trait;
use lumen_graph::NodeId;
use lumen_registry::NodeError;
use lumen_signal::{HandlerError, Signal, SignalBus, SignalHandler, SignalPropagation, with_level};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOperator {
  And,
  Or,
  Xor,
  Xnor,
  Nand,
  Nor,
  Not,
}

impl GateOperator {
  /// Apply the operator. XOR is odd parity over all inputs.
  pub fn apply(self, inputs: &[bool]) -> bool {
    let all = inputs.iter().all(|v| *v);
    let any = inputs.iter().any(|v| *v);
    let odd = inputs.iter().filter(|v| **v).count() % 2 == 1;
    match self {
      GateOperator::And => all,
      GateOperator::Or => any,
      GateOperator::Xor => odd,
      GateOperator::Xnor => !odd,
      GateOperator::Nand => !all,
      GateOperator::Nor => !any,
      GateOperator::Not => !inputs.first().copied().unwrap_or(false),
    }
  }
}

impl FromStr for GateOperator {
  type Err = NodeError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_uppercase().as_str() {
      "AND" => Ok(GateOperator::And),
      "OR" => Ok(GateOperator::Or),
      "XOR" => Ok(GateOperator::Xor),
      "XNOR" => Ok(GateOperator::Xnor),
      "NAND" => Ok(GateOperator::Nand),
      "NOR" => Ok(GateOperator::Nor),
      "NOT" => Ok(GateOperator::Not),
      _ => Err(NodeError::invalid(format!("unknown gate operator '{}'", s))),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateSettings {
  pub operator: GateOperator,
  /// Slots that must be filled before evaluating. Always 1 for NOT.
  pub input_count: usize,
  pub invert_output: bool,
  pub reset_after_eval: bool,
}

impl GateSettings {
  pub fn from_settings(settings: &Value) -> Result<Self, NodeError> {
    let operator: GateOperator = settings
      .get("operator")
      .and_then(Value::as_str)
      .unwrap_or("AND")
      .parse()?;
    let input_count = match operator {
      GateOperator::Not => 1,
      _ => settings
        .get("input_count")
        .and_then(Value::as_u64)
        .unwrap_or(2) as usize,
    };
    if input_count == 0 || input_count > 26 {
      return Err(NodeError::invalid("input_count must be between 1 and 26"));
    }

    Ok(Self {
      operator,
      input_count,
      invert_output: settings
        .get("invert_output")
        .and_then(Value::as_bool)
        .unwrap_or(false),
      reset_after_eval: settings
        .get("reset_after_eval")
        .and_then(Value::as_bool)
        .unwrap_or(false),
    })
  }
}

/// Slot name for the `index`th input: `input_a`, `input_b`, ...
pub fn slot_name(index: usize) -> String {
  format!("input_{}", (b'a' + index as u8) as char)
}

#[derive(Debug, Default)]
struct GateState {
  /// Source node to slot, fixed the first time each source signals.
  sources: HashMap<NodeId, String>,
  slots: BTreeMap<String, bool>,
  output: bool,
}

/// A gate node's signal handler.
pub struct LogicGate {
  node_id: NodeId,
  /// Upstream nodes in declared order; a source's position picks its slot.
  upstream: Vec<NodeId>,
  settings: GateSettings,
  state: Mutex<GateState>,
}

impl LogicGate {
  pub fn new(node_id: NodeId, upstream: Vec<NodeId>, settings: GateSettings) -> Self {
    Self {
      node_id,
      upstream,
      settings,
      state: Mutex::new(GateState::default()),
    }
  }

  fn resolve_slot(&self, state: &mut GateState, source: NodeId) -> String {
    if let Some(slot) = state.sources.get(&source) {
      return slot.clone();
    }
    let taken = |state: &GateState, slot: &String| state.sources.values().any(|s| s == slot);

    let preferred = self
      .upstream
      .iter()
      .position(|id| *id == source)
      .filter(|index| *index < 26)
      .map(slot_name)
      .filter(|slot| !taken(&*state, slot));
    let slot = preferred.unwrap_or_else(|| {
      (0..26)
        .map(slot_name)
        .find(|slot| !taken(&*state, slot))
        .unwrap_or_else(|| slot_name(25))
    });

    debug!(node_id = %self.node_id, source = %source, slot = %slot, "gate_slot_assigned");
    state.sources.insert(source, slot.clone());
    slot
  }
}

#[async_trait]
impl SignalHandler for LogicGate {
  async fn handle(
    &self,
    signal: &Signal,
    _bus: &SignalBus,
  ) -> Result<SignalPropagation, HandlerError> {
    let value = signal.is_on();
    let (result, was) = {
      let mut state = self.state.lock();
      let slot = self.resolve_slot(&mut state, signal.source);
      state.slots.insert(slot, value);

      let values: Vec<bool> = match self.settings.operator {
        GateOperator::Not => vec![value],
        _ if state.slots.len() < self.settings.input_count => {
          return Ok(SignalPropagation::block());
        }
        _ => state.slots.values().copied().collect(),
      };

      let result = self.settings.operator.apply(&values) != self.settings.invert_output;
      if self.settings.reset_after_eval {
        state.slots.clear();
      }
      let was = state.output;
      state.output = result;
      (result, was)
    };

    debug!(node_id = %self.node_id, result, "gate_evaluated");
    if result {
      Ok(SignalPropagation::forward_with(with_level(signal.data.as_ref(), true)))
    } else if was {
      Ok(SignalPropagation::forward_with(with_level(signal.data.as_ref(), false)))
    } else {
      Ok(SignalPropagation::block())
    }
  }
}
