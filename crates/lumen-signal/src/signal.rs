//! Signals and propagation verdicts.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use lumen_graph::NodeId;
use serde_json::Value;

use crate::context::ExecutionContext;

/// A transient message travelling along graph edges.
///
/// The id is regenerated at every propagation hop. The context is shared by
/// every signal of one bus instance.
#[derive(Debug, Clone)]
pub struct Signal {
  pub id: String,
  /// Node the signal originated from (or was last re-emitted by).
  pub source: NodeId,
  /// Creation time (Unix millis).
  pub timestamp: u64,
  pub data: Option<Value>,
  pub context: Option<ExecutionContext>,
}

impl Signal {
  pub fn new(source: NodeId, data: Option<Value>) -> Self {
    Self {
      id: uuid::Uuid::new_v4().to_string(),
      source,
      timestamp: now_millis(),
      data,
      context: None,
    }
  }

  pub fn with_context(mut self, context: ExecutionContext) -> Self {
    self.context = Some(context);
    self
  }

  /// Build the signal for the next hop: fresh id and timestamp, same context,
  /// data replaced when the handler supplied some.
  pub fn forward(&self, source: NodeId, data: Option<Value>) -> Self {
    Self {
      id: uuid::Uuid::new_v4().to_string(),
      source,
      timestamp: now_millis(),
      data: data.or_else(|| self.data.clone()),
      context: self.context.clone(),
    }
  }

  /// Whether this is an ON signal. See [`level_of`].
  pub fn is_on(&self) -> bool {
    level_of(self.data.as_ref())
  }

  /// Read a variable through the signal's context.
  pub fn variable(&self, key: &str) -> Option<Value> {
    self.context.as_ref().and_then(|ctx| ctx.get_variable(key))
  }

  /// JSON view of the signal, as seen by expressions and templates.
  pub fn to_value(&self) -> Value {
    serde_json::json!({
      "id": self.id,
      "source": self.source,
      "timestamp": self.timestamp,
      "data": self.data.clone().unwrap_or(Value::Null),
    })
  }
}

/// Level carried by a payload.
///
/// Absent or null payloads are bare pulses and count as ON. Booleans are
/// themselves; objects use a boolean `state` (or `active`) field; numbers are
/// ON when non-zero. Anything else is ON.
pub fn level_of(data: Option<&Value>) -> bool {
  match data {
    None | Some(Value::Null) => true,
    Some(Value::Bool(b)) => *b,
    Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
    Some(Value::Object(map)) => map
      .get("state")
      .or_else(|| map.get("active"))
      .and_then(Value::as_bool)
      .unwrap_or(true),
    Some(_) => true,
  }
}

/// Payload with its level set to `on`.
///
/// Objects gain (or overwrite) a `state` field. Other payloads are wrapped as
/// `{"state": on, "value": <payload>}`.
pub fn with_level(data: Option<&Value>, on: bool) -> Value {
  match data {
    Some(Value::Object(map)) => {
      let mut map = map.clone();
      map.insert("state".to_string(), Value::Bool(on));
      Value::Object(map)
    }
    None | Some(Value::Null) | Some(Value::Bool(_)) => serde_json::json!({ "state": on }),
    Some(other) => serde_json::json!({ "state": on, "value": other }),
  }
}

/// Current time as Unix millis.
pub fn now_millis() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_millis() as u64)
    .unwrap_or_default()
}

/// A handler's verdict on an incoming signal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalPropagation {
  /// Continue downstream, or stop this branch here.
  pub propagate: bool,
  /// Replacement payload for the next hop.
  pub data: Option<Value>,
  /// Restrict propagation to these outputs of the handling node.
  pub target_outputs: Option<Vec<NodeId>>,
  /// Wait this long before the next hop fires.
  pub delay: Option<Duration>,
}

impl SignalPropagation {
  /// Continue downstream with the incoming payload.
  pub fn forward() -> Self {
    Self {
      propagate: true,
      ..Default::default()
    }
  }

  /// Continue downstream with a replacement payload.
  pub fn forward_with(data: Value) -> Self {
    Self {
      propagate: true,
      data: Some(data),
      ..Default::default()
    }
  }

  /// Stop this branch.
  pub fn block() -> Self {
    Self::default()
  }

  pub fn to_outputs(mut self, outputs: Vec<NodeId>) -> Self {
    self.target_outputs = Some(outputs);
    self
  }

  pub fn after(mut self, delay: Duration) -> Self {
    self.delay = Some(delay);
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_level_of() {
    assert!(level_of(None));
    assert!(level_of(Some(&Value::Null)));
    assert!(level_of(Some(&json!(true))));
    assert!(!level_of(Some(&json!(false))));
    assert!(!level_of(Some(&json!({ "state": false, "x": 1 }))));
    assert!(!level_of(Some(&json!({ "active": false }))));
    assert!(level_of(Some(&json!({ "x": 1 }))));
    assert!(!level_of(Some(&json!(0))));
    assert!(level_of(Some(&json!(2.5))));
    assert!(level_of(Some(&json!("off"))));
  }

  #[test]
  fn test_with_level() {
    assert_eq!(with_level(None, true), json!({ "state": true }));
    assert_eq!(
      with_level(Some(&json!({ "a": 1, "state": true })), false),
      json!({ "a": 1, "state": false })
    );
    assert_eq!(
      with_level(Some(&json!(42)), false),
      json!({ "state": false, "value": 42 })
    );
  }

  #[test]
  fn test_forward_regenerates_id_and_keeps_data() {
    let signal = Signal::new(1, Some(json!({ "a": 1 })));
    let next = signal.forward(2, None);
    assert_ne!(next.id, signal.id);
    assert_eq!(next.source, 2);
    assert_eq!(next.data, signal.data);

    let replaced = signal.forward(2, Some(json!("b")));
    assert_eq!(replaced.data, Some(json!("b")));
  }

  #[test]
  fn test_verdict_builders() {
    let verdict = SignalPropagation::forward()
      .to_outputs(vec![3])
      .after(Duration::from_millis(5));
    assert!(verdict.propagate);
    assert_eq!(verdict.target_outputs, Some(vec![3]));
    assert_eq!(verdict.delay, Some(Duration::from_millis(5)));
    assert!(!SignalPropagation::block().propagate);
  }
}
