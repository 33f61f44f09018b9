//! Condition state machine shared by every condition-shaped node.
//!
//! A condition node passes its input only while an external predicate holds.
//! It rests in one of three states:
//!
//! ```text
//! Idle           no ON signal on the input
//! Armed-Waiting  ON signal present, predicate false, output inactive
//! Active         ON signal present, output active
//! ```
//!
//! The mode decides how predicate changes move the machine:
//!
//! - `Continuous`: output follows the predicate while the input is ON.
//! - `Timer`: output turns on when the predicate holds and turns itself off
//!   after the timer, regardless of later predicate changes.
//! - `Switch`: every "predicate became true" notification toggles the output.
//!
//! The mode is explicit: a non-zero `timer_duration` selects `Timer`,
//! otherwise `Continuous`, unless `mode` names one directly. A zero timer
//! never implies `Switch`.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use lumen_graph::NodeId;
use lumen_registry::NodeError;
use lumen_signal::{
  EventSubscription, HandlerError, Signal, SignalBus, SignalHandler, SignalPropagation, with_level,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Event emitted when an ON signal arrives while the predicate is false.
pub const CONDITION_BLOCKED: &str = "condition.blocked";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionMode {
  Continuous,
  Timer(Duration),
  Switch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConditionSettings {
  pub mode: ConditionMode,
  /// Pass while the predicate is false instead of true.
  pub invert_signal: bool,
}

impl ConditionSettings {
  /// Read `mode`, `timer_duration` (ms) and `invert_signal` from node
  /// settings.
  pub fn from_settings(settings: &Value) -> Result<Self, NodeError> {
    let invert_signal = settings
      .get("invert_signal")
      .and_then(Value::as_bool)
      .unwrap_or(false);
    let timer_ms = match settings.get("timer_duration") {
      None | Some(Value::Null) => 0,
      Some(value) => value
        .as_u64()
        .ok_or_else(|| NodeError::invalid("timer_duration must be a non-negative integer"))?,
    };

    let mode = match settings.get("mode").and_then(Value::as_str) {
      None if timer_ms > 0 => ConditionMode::Timer(Duration::from_millis(timer_ms)),
      None | Some("continuous") => ConditionMode::Continuous,
      Some("timer") if timer_ms > 0 => ConditionMode::Timer(Duration::from_millis(timer_ms)),
      Some("timer") => return Err(NodeError::invalid("timer mode needs timer_duration > 0")),
      Some("switch") => ConditionMode::Switch,
      Some(other) => return Err(NodeError::invalid(format!("unknown condition mode '{}'", other))),
    };

    Ok(Self {
      mode,
      invert_signal,
    })
  }
}

/// What a change notification says about the predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
  /// Not relevant to this predicate.
  Ignore,
  /// The payload carries the new value.
  Value(bool),
  /// Something changed; ask the predicate again.
  Reevaluate,
}

/// The external boolean a condition node watches.
#[async_trait]
pub trait Predicate: Send + Sync + 'static {
  /// Event announcing that the predicate may have changed.
  fn change_event(&self) -> &str;

  async fn evaluate(&self, bus: &SignalBus) -> bool;

  fn observe(&self, _data: Option<&Value>) -> Observation {
    Observation::Reevaluate
  }
}

#[derive(Debug, Default)]
struct ConditionState {
  has_active_signal: bool,
  last_signal_data: Option<Value>,
  is_output_active: bool,
  timer: Option<CancellationToken>,
  timer_generation: u64,
}

impl ConditionState {
  fn cancel_timer(&mut self) {
    if let Some(timer) = self.timer.take() {
      timer.cancel();
    }
  }
}

/// A condition node's signal handler.
pub struct ConditionMachine<P> {
  node_id: NodeId,
  predicate: P,
  settings: ConditionSettings,
  bus: SignalBus,
  state: Mutex<ConditionState>,
  subscription: Mutex<Option<EventSubscription>>,
  this: Weak<Self>,
}

impl<P: Predicate> ConditionMachine<P> {
  /// Create the machine, subscribe it to its predicate's change event and
  /// register it as `node_id`'s handler.
  ///
  /// Any handler previously registered for the node is disposed, which
  /// cancels its timer and releases its subscription.
  pub fn install(
    node_id: NodeId,
    predicate: P,
    settings: ConditionSettings,
    bus: &SignalBus,
  ) -> Arc<Self> {
    let machine = Arc::new_cyclic(|this| Self {
      node_id,
      predicate,
      settings,
      bus: bus.clone(),
      state: Mutex::new(ConditionState::default()),
      subscription: Mutex::new(None),
      this: this.clone(),
    });

    let weak = Arc::downgrade(&machine);
    let subscription = bus.subscribe_to_event(machine.predicate.change_event(), node_id, move |data| {
      let weak = weak.clone();
      async move {
        if let Some(machine) = weak.upgrade() {
          machine.on_condition_change(data).await;
        }
      }
    });
    *machine.subscription.lock() = Some(subscription);

    bus.register_handler(node_id, machine.clone());
    machine
  }

  pub fn is_output_active(&self) -> bool {
    self.state.lock().is_output_active
  }

  pub fn has_active_signal(&self) -> bool {
    self.state.lock().has_active_signal
  }

  async fn holds(&self, bus: &SignalBus) -> bool {
    self.predicate.evaluate(bus).await != self.settings.invert_signal
  }

  /// React to the predicate's change event.
  async fn on_condition_change(&self, data: Option<Value>) {
    let raw = match self.predicate.observe(data.as_ref()) {
      Observation::Ignore => return,
      Observation::Value(value) => value,
      Observation::Reevaluate => self.predicate.evaluate(&self.bus).await,
    };
    let holds = raw != self.settings.invert_signal;

    let emit = {
      let mut state = self.state.lock();
      if !state.has_active_signal {
        return;
      }
      let next = match self.settings.mode {
        ConditionMode::Continuous if holds && !state.is_output_active => {
          state.is_output_active = true;
          Some(true)
        }
        ConditionMode::Continuous if !holds && state.is_output_active => {
          state.is_output_active = false;
          Some(false)
        }
        ConditionMode::Timer(duration) if holds && !state.is_output_active => {
          state.is_output_active = true;
          self.start_timer(&mut state, duration);
          Some(true)
        }
        ConditionMode::Switch if holds => {
          state.is_output_active = !state.is_output_active;
          Some(state.is_output_active)
        }
        _ => None,
      };
      next.map(|on| (on, state.last_signal_data.clone()))
    };

    if let Some((on, data)) = emit {
      info!(node_id = %self.node_id, active = on, "condition_output_changed");
      self.emit(on, data.as_ref()).await;
    }
  }

  async fn emit(&self, on: bool, data: Option<&Value>) {
    if let Err(e) = self
      .bus
      .emit_signal(self.node_id, Some(with_level(data, on)))
      .await
    {
      warn!(node_id = %self.node_id, error = %e, "condition_emit_failed");
    }
  }

  fn start_timer(&self, state: &mut ConditionState, duration: Duration) {
    state.cancel_timer();
    state.timer_generation += 1;
    let generation = state.timer_generation;
    let token = CancellationToken::new();
    state.timer = Some(token.clone());

    let this = self.this.clone();
    tokio::spawn(async move {
      tokio::select! {
        _ = token.cancelled() => {}
        _ = tokio::time::sleep(duration) => {
          if let Some(machine) = this.upgrade() {
            machine.expire(generation).await;
          }
        }
      }
    });
  }

  async fn expire(&self, generation: u64) {
    let data = {
      let mut state = self.state.lock();
      if state.timer_generation != generation || !state.is_output_active {
        return;
      }
      state.timer = None;
      state.is_output_active = false;
      state.last_signal_data.clone()
    };
    debug!(node_id = %self.node_id, "condition_timer_expired");
    self.emit(false, data.as_ref()).await;
  }
}

#[async_trait]
impl<P: Predicate> SignalHandler for ConditionMachine<P> {
  async fn handle(
    &self,
    signal: &Signal,
    bus: &SignalBus,
  ) -> Result<SignalPropagation, HandlerError> {
    if !signal.is_on() {
      let was_active = {
        let mut state = self.state.lock();
        state.cancel_timer();
        let was_active = state.is_output_active;
        state.has_active_signal = false;
        state.is_output_active = false;
        was_active
      };
      if was_active {
        return Ok(SignalPropagation::forward_with(with_level(
          signal.data.as_ref(),
          false,
        )));
      }
      return Ok(SignalPropagation::block());
    }

    let holds = self.holds(bus).await;
    let was_active = {
      let mut state = self.state.lock();
      let was_active = state.is_output_active;
      state.has_active_signal = true;
      state.last_signal_data = signal.data.clone();
      state.is_output_active = holds;
      match self.settings.mode {
        ConditionMode::Timer(duration) if holds => self.start_timer(&mut state, duration),
        _ if !holds => state.cancel_timer(),
        _ => {}
      }
      was_active
    };

    if holds {
      return Ok(SignalPropagation::forward_with(with_level(
        signal.data.as_ref(),
        true,
      )));
    }

    debug!(node_id = %self.node_id, "condition_armed_waiting");
    bus
      .emit_event(
        CONDITION_BLOCKED,
        Some(json!({ "node_id": self.node_id, "reason": "predicate_false" })),
      )
      .await;

    // Drop a stale active output before waiting.
    if was_active {
      return Ok(SignalPropagation::forward_with(with_level(
        signal.data.as_ref(),
        false,
      )));
    }
    Ok(SignalPropagation::block())
  }

  fn dispose(&self) {
    self.state.lock().cancel_timer();
    if let Some(subscription) = self.subscription.lock().take() {
      subscription.unsubscribe();
    }
  }
}

/// Torch state as a predicate.
pub struct TorchPredicate {
  torch: Arc<dyn crate::capability::Torch>,
}

impl TorchPredicate {
  pub fn new(torch: Arc<dyn crate::capability::Torch>) -> Self {
    Self { torch }
  }
}

#[async_trait]
impl Predicate for TorchPredicate {
  fn change_event(&self) -> &str {
    crate::capability::FLASHLIGHT_STATE_CHANGED
  }

  async fn evaluate(&self, _bus: &SignalBus) -> bool {
    self.torch.state().await.unwrap_or(false)
  }

  fn observe(&self, data: Option<&Value>) -> Observation {
    match flag_of(data) {
      Some(on) => Observation::Value(on),
      None => Observation::Reevaluate,
    }
  }
}

/// `variables[key]` as a predicate: equal to `expected` when given,
/// otherwise truthy.
pub struct VariablePredicate {
  key: String,
  expected: Option<Value>,
}

/// Event emitted after a node writes a variable, payload `{key, value}`.
pub const VARIABLE_CHANGED: &str = "variable.changed";

impl VariablePredicate {
  pub fn new(key: impl Into<String>, expected: Option<Value>) -> Self {
    Self {
      key: key.into(),
      expected,
    }
  }

  fn test(&self, value: Option<&Value>) -> bool {
    let value = value.unwrap_or(&Value::Null);
    match &self.expected {
      Some(expected) => match (value.as_f64(), expected.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => value == expected,
      },
      None => crate::expression::truthy(value),
    }
  }
}

#[async_trait]
impl Predicate for VariablePredicate {
  fn change_event(&self) -> &str {
    VARIABLE_CHANGED
  }

  async fn evaluate(&self, bus: &SignalBus) -> bool {
    self.test(bus.get_variable(&self.key).as_ref())
  }

  fn observe(&self, data: Option<&Value>) -> Observation {
    let Some(data) = data else {
      return Observation::Reevaluate;
    };
    match data.get("key").and_then(Value::as_str) {
      Some(key) if key == self.key => Observation::Value(self.test(data.get("value"))),
      Some(_) => Observation::Ignore,
      None => Observation::Reevaluate,
    }
  }
}

/// A boolean flag carried by a named event.
///
/// The flag keeps the last value seen; payloads may be a bare boolean or an
/// object with a boolean `value` or `state` field.
pub struct EventPredicate {
  event: String,
  flag: Mutex<bool>,
}

impl EventPredicate {
  pub fn new(event: impl Into<String>, initial: bool) -> Self {
    Self {
      event: event.into(),
      flag: Mutex::new(initial),
    }
  }
}

#[async_trait]
impl Predicate for EventPredicate {
  fn change_event(&self) -> &str {
    &self.event
  }

  async fn evaluate(&self, _bus: &SignalBus) -> bool {
    *self.flag.lock()
  }

  fn observe(&self, data: Option<&Value>) -> Observation {
    match flag_of(data) {
      Some(flag) => {
        *self.flag.lock() = flag;
        Observation::Value(flag)
      }
      None => Observation::Ignore,
    }
  }
}

/// Boolean carried by a payload: `true`, `{"value": true}` or
/// `{"state": true}`.
fn flag_of(data: Option<&Value>) -> Option<bool> {
  match data? {
    Value::Bool(b) => Some(*b),
    Value::Object(map) => map
      .get("value")
      .or_else(|| map.get("state"))
      .and_then(Value::as_bool),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_mode_selection() {
    let settings = ConditionSettings::from_settings(&json!({})).unwrap();
    assert_eq!(settings.mode, ConditionMode::Continuous);
    assert!(!settings.invert_signal);

    let settings = ConditionSettings::from_settings(&json!({ "timer_duration": 250 })).unwrap();
    assert_eq!(settings.mode, ConditionMode::Timer(Duration::from_millis(250)));

    let settings =
      ConditionSettings::from_settings(&json!({ "mode": "switch", "invert_signal": true }))
        .unwrap();
    assert_eq!(settings.mode, ConditionMode::Switch);
    assert!(settings.invert_signal);

    assert!(ConditionSettings::from_settings(&json!({ "mode": "timer" })).is_err());
    assert!(ConditionSettings::from_settings(&json!({ "mode": "sometimes" })).is_err());
    assert!(ConditionSettings::from_settings(&json!({ "timer_duration": -1 })).is_err());
  }

  #[test]
  fn test_flag_of() {
    assert_eq!(flag_of(Some(&json!(true))), Some(true));
    assert_eq!(flag_of(Some(&json!({ "value": false }))), Some(false));
    assert_eq!(flag_of(Some(&json!({ "state": true }))), Some(true));
    assert_eq!(flag_of(Some(&json!("yes"))), None);
    assert_eq!(flag_of(None), None);
  }

  #[test]
  fn test_variable_predicate_observe_filters_keys() {
    let predicate = VariablePredicate::new("mode", Some(json!("night")));
    assert_eq!(
      predicate.observe(Some(&json!({ "key": "mode", "value": "night" }))),
      Observation::Value(true)
    );
    assert_eq!(
      predicate.observe(Some(&json!({ "key": "other", "value": "night" }))),
      Observation::Ignore
    );
    assert_eq!(predicate.observe(None), Observation::Reevaluate);
  }

  #[tokio::test]
  async fn test_machine_moves_through_states() {
    let graph = lumen_graph::Graph::builder()
      .node(1, "trigger.manual")
      .node(2, "condition.event")
      .edge(1, 2)
      .build()
      .unwrap();
    let bus = SignalBus::new(Arc::new(graph));
    let settings = ConditionSettings::from_settings(&json!({})).unwrap();
    let machine = ConditionMachine::install(2, EventPredicate::new("door", false), settings, &bus);
    assert!(!machine.has_active_signal());

    // Armed-Waiting.
    bus.emit_signal(1, Some(json!({ "state": true }))).await.unwrap();
    assert!(machine.has_active_signal());
    assert!(!machine.is_output_active());

    // Active.
    bus.emit_event("door", Some(json!(true))).await;
    assert!(machine.is_output_active());

    // Idle.
    bus.emit_signal(1, Some(json!({ "state": false }))).await.unwrap();
    assert!(!machine.has_active_signal());
    assert!(!machine.is_output_active());
  }
}
