//! Timing and repetition.

use std::time::Duration;

use async_trait::async_trait;
use lumen_graph::NodeId;
use lumen_registry::{
  NodeBehavior, NodeCategory, NodeContext, NodeDescriptor, NodeError, NodeOutput, PortSpec,
};
use lumen_signal::{HandlerError, Signal, SignalBus, SignalHandler, SignalPropagation};
use serde_json::{Value, json};
use tracing::debug;

/// `flow.delay`: forwards each signal after `delay_ms`.
pub struct DelayNode {
  descriptor: NodeDescriptor,
}

/// Longest accepted delay, one day.
const MAX_DELAY_MS: u64 = 86_400_000;

impl DelayNode {
  pub fn new() -> Self {
    Self {
      descriptor: NodeDescriptor::new("flow.delay", "Delay", NodeCategory::Flow)
        .description("Holds each signal for a fixed time before passing it on")
        .input(PortSpec::signal("in").required())
        .output(PortSpec::signal("out"))
        .defaults(json!({ "delay_ms": 1000 })),
    }
  }
}

fn delay(settings: &Value) -> Result<Duration, NodeError> {
  match settings.get("delay_ms").and_then(Value::as_u64) {
    Some(ms) if ms <= MAX_DELAY_MS => Ok(Duration::from_millis(ms)),
    _ => Err(NodeError::invalid(format!(
      "delay_ms must be an integer between 0 and {}",
      MAX_DELAY_MS
    ))),
  }
}

struct Delay {
  delay: Duration,
}

#[async_trait]
impl SignalHandler for Delay {
  async fn handle(
    &self,
    _signal: &Signal,
    _bus: &SignalBus,
  ) -> Result<SignalPropagation, HandlerError> {
    Ok(SignalPropagation::forward().after(self.delay))
  }
}

#[async_trait]
impl NodeBehavior for DelayNode {
  fn descriptor(&self) -> &NodeDescriptor {
    &self.descriptor
  }

  fn validate(&self, settings: &Value) -> Result<(), NodeError> {
    delay(settings).map(|_| ())
  }

  async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
    let delay = delay(&ctx.settings)?;
    ctx.bus.register_handler(ctx.node_id, Delay { delay });
    Ok(NodeOutput::none())
  }

  fn render(&self, settings: &Value) -> Option<String> {
    let ms = settings.get("delay_ms").and_then(Value::as_u64).unwrap_or(0);
    Some(format!("<span class=\"lumen-delay\">{} ms</span>", ms))
  }
}

/// `flow.loop`: re-emits each incoming signal `count` times from this node,
/// each carrying `index` and `count`.
pub struct LoopNode {
  descriptor: NodeDescriptor,
}

const MAX_ITERATIONS: u64 = 1000;

impl LoopNode {
  pub fn new() -> Self {
    Self {
      descriptor: NodeDescriptor::new("flow.loop", "Repeat", NodeCategory::Flow)
        .description("Emits the incoming signal a fixed number of times")
        .input(PortSpec::signal("in").required())
        .output(PortSpec::signal("out"))
        .defaults(json!({ "count": 3 })),
    }
  }
}

fn iterations(settings: &Value) -> Result<u64, NodeError> {
  match settings.get("count").and_then(Value::as_u64) {
    Some(count) if (1..=MAX_ITERATIONS).contains(&count) => Ok(count),
    _ => Err(NodeError::invalid(format!(
      "count must be between 1 and {}",
      MAX_ITERATIONS
    ))),
  }
}

/// Payload for one iteration: the original object with `index` and `count`
/// added, or a fresh object carrying the original under `value`.
fn iteration_payload(data: Option<&Value>, index: u64, count: u64) -> Value {
  match data {
    Some(Value::Object(map)) => {
      let mut map = map.clone();
      map.insert("index".to_string(), json!(index));
      map.insert("count".to_string(), json!(count));
      Value::Object(map)
    }
    None | Some(Value::Null) => json!({ "index": index, "count": count }),
    Some(other) => json!({ "index": index, "count": count, "value": other }),
  }
}

struct Repeat {
  node_id: NodeId,
  count: u64,
}

#[async_trait]
impl SignalHandler for Repeat {
  async fn handle(
    &self,
    signal: &Signal,
    bus: &SignalBus,
  ) -> Result<SignalPropagation, HandlerError> {
    for index in 0..self.count {
      bus
        .emit_signal(
          self.node_id,
          Some(iteration_payload(signal.data.as_ref(), index, self.count)),
        )
        .await?;
    }
    debug!(node_id = %self.node_id, count = self.count, "loop_queued");
    Ok(SignalPropagation::block())
  }
}

#[async_trait]
impl NodeBehavior for LoopNode {
  fn descriptor(&self) -> &NodeDescriptor {
    &self.descriptor
  }

  fn validate(&self, settings: &Value) -> Result<(), NodeError> {
    iterations(settings).map(|_| ())
  }

  async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
    let count = iterations(&ctx.settings)?;
    ctx.bus.register_handler(
      ctx.node_id,
      Repeat {
        node_id: ctx.node_id,
        count,
      },
    );
    Ok(NodeOutput::none())
  }
}
