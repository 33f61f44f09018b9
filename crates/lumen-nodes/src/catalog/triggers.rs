//! Signal sources.

use std::time::Duration;

use async_trait::async_trait;
use lumen_graph::NodeId;
use lumen_registry::{
  NodeBehavior, NodeCategory, NodeContext, NodeDescriptor, NodeError, NodeOutput, PortSpec,
};
use lumen_signal::{HandlerError, Signal, SignalBus, SignalHandler, SignalPropagation};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// `trigger.manual`: fired from outside the graph.
pub struct ManualTrigger {
  descriptor: NodeDescriptor,
}

impl ManualTrigger {
  pub fn new() -> Self {
    Self {
      descriptor: NodeDescriptor::new("trigger.manual", "Manual Trigger", NodeCategory::Trigger)
        .description("Emits a signal when triggered by the user")
        .output(PortSpec::signal("out"))
        .defaults(json!({ "label": "Run" })),
    }
  }
}

#[async_trait]
impl NodeBehavior for ManualTrigger {
  fn descriptor(&self) -> &NodeDescriptor {
    &self.descriptor
  }

  async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
    ctx.logger.debug("manual trigger ready");
    Ok(NodeOutput::none())
  }

  fn render(&self, settings: &Value) -> Option<String> {
    let label = settings.get("label").and_then(Value::as_str).unwrap_or("Run");
    Some(format!("<button class=\"lumen-trigger\">{}</button>", label))
  }
}

/// `trigger.event`: emits once per occurrence of a named event, carrying the
/// event payload.
pub struct EventTrigger {
  descriptor: NodeDescriptor,
}

impl EventTrigger {
  pub fn new() -> Self {
    Self {
      descriptor: NodeDescriptor::new("trigger.event", "Event Trigger", NodeCategory::Trigger)
        .description("Emits a signal whenever the named event fires")
        .output(PortSpec::signal("out"))
        .defaults(json!({ "event": "" })),
    }
  }
}

fn event_name(settings: &Value) -> Result<&str, NodeError> {
  settings
    .get("event")
    .and_then(Value::as_str)
    .filter(|s| !s.is_empty())
    .ok_or_else(|| NodeError::invalid("'event' is required"))
}

#[async_trait]
impl NodeBehavior for EventTrigger {
  fn descriptor(&self) -> &NodeDescriptor {
    &self.descriptor
  }

  fn validate(&self, settings: &Value) -> Result<(), NodeError> {
    event_name(settings).map(|_| ())
  }

  async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
    let event = event_name(&ctx.settings)?;
    let node_id = ctx.node_id;
    let bus = ctx.bus.clone();
    ctx.bus.subscribe_to_event(event, node_id, move |data| {
      let bus = bus.clone();
      async move {
        if let Err(e) = bus.emit_signal(node_id, data).await {
          warn!(node_id = %node_id, error = %e, "event_trigger_emit_failed");
        }
      }
    });
    ctx.logger.debug(&format!("listening for '{}'", event));
    Ok(NodeOutput::none())
  }
}

/// `trigger.interval`: emits `{"tick": n}` every `interval_ms`.
pub struct IntervalTrigger {
  descriptor: NodeDescriptor,
}

/// Shortest accepted interval.
const MIN_INTERVAL_MS: u64 = 10;

impl IntervalTrigger {
  pub fn new() -> Self {
    Self {
      descriptor: NodeDescriptor::new("trigger.interval", "Interval", NodeCategory::Trigger)
        .description("Emits a signal periodically")
        .output(PortSpec::signal("out"))
        .defaults(json!({ "interval_ms": 1000 }))
        .max_instances(8),
    }
  }
}

fn interval(settings: &Value) -> Result<Duration, NodeError> {
  match settings.get("interval_ms").and_then(Value::as_u64) {
    Some(ms) if ms >= MIN_INTERVAL_MS => Ok(Duration::from_millis(ms)),
    _ => Err(NodeError::invalid(format!(
      "interval_ms must be an integer >= {}",
      MIN_INTERVAL_MS
    ))),
  }
}

/// Handler owning the ticker task; disposing it stops the ticks.
struct Ticker {
  cancel: CancellationToken,
}

#[async_trait]
impl SignalHandler for Ticker {
  async fn handle(
    &self,
    _signal: &Signal,
    _bus: &SignalBus,
  ) -> Result<SignalPropagation, HandlerError> {
    Ok(SignalPropagation::forward())
  }

  fn dispose(&self) {
    self.cancel.cancel();
  }
}

fn spawn_ticker(node_id: NodeId, period: Duration, bus: SignalBus) -> CancellationToken {
  let cancel = CancellationToken::new();
  let token = cancel.clone();
  tokio::spawn(async move {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    let mut tick: u64 = 0;
    loop {
      tokio::select! {
        _ = token.cancelled() => break,
        _ = ticker.tick() => {
          tick += 1;
          if let Err(e) = bus.emit_signal(node_id, Some(json!({ "tick": tick }))).await {
            warn!(node_id = %node_id, error = %e, "interval_emit_failed");
          }
        }
      }
    }
    debug!(node_id = %node_id, ticks = tick, "interval_stopped");
  });
  cancel
}

#[async_trait]
impl NodeBehavior for IntervalTrigger {
  fn descriptor(&self) -> &NodeDescriptor {
    &self.descriptor
  }

  fn validate(&self, settings: &Value) -> Result<(), NodeError> {
    interval(settings).map(|_| ())
  }

  async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
    let period = interval(&ctx.settings)?;
    let cancel = spawn_ticker(ctx.node_id, period, ctx.bus.clone());
    ctx.bus.register_handler(ctx.node_id, Ticker { cancel });
    Ok(NodeOutput::none())
  }
}
