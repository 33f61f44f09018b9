//! Nodes with side effects on the device or the shared state.
//!
//! Action nodes never stop the signal because of their own failure: device
//! errors and denied permissions are reported as `<capability>.failed` and
//! `<capability>.permission.failed` events and the signal moves on.

use std::time::Duration;

use async_trait::async_trait;
use lumen_graph::NodeId;
use lumen_registry::{
  NodeBehavior, NodeCategory, NodeContext, NodeDescriptor, NodeError, NodeLogger, NodeOutput,
  PortSpec,
};
use lumen_signal::{HandlerError, Signal, SignalBus, SignalHandler, SignalPropagation};
use minijinja::Environment;
use serde_json::{Value, json};
use tracing::warn;

use crate::capability::{Capabilities, Capability, FLASHLIGHT_STATE_CHANGED};
use crate::condition::VARIABLE_CHANGED;
use crate::error::CapabilityError;

/// Variable holding the last line written by `action.log`.
pub const LAST_LOG_VARIABLE: &str = "log.last";

fn action_descriptor(id: &str, name: &str, description: &str, defaults: Value) -> NodeDescriptor {
  NodeDescriptor::new(id, name, NodeCategory::Action)
    .description(description)
    .input(PortSpec::signal("in").required())
    .output(PortSpec::signal("out"))
    .defaults(defaults)
}

/// Ask for `capability`; on refusal emit `<prefix>.permission.failed`.
async fn permitted(
  capabilities: &Capabilities,
  capability: Capability,
  node_id: NodeId,
  bus: &SignalBus,
) -> bool {
  if capabilities.permissions.ensure(capability).await {
    return true;
  }
  warn!(node_id = %node_id, capability = %capability, "capability_permission_denied");
  bus
    .emit_event(
      &format!("{}.permission.failed", capability.event_prefix()),
      Some(json!({ "node_id": node_id })),
    )
    .await;
  false
}

async fn report_failure(
  capability: Capability,
  node_id: NodeId,
  error: &CapabilityError,
  bus: &SignalBus,
) {
  warn!(node_id = %node_id, capability = %capability, error = %error, "capability_failed");
  bus
    .emit_event(
      &format!("{}.failed", capability.event_prefix()),
      Some(json!({ "node_id": node_id, "error": error.to_string() })),
    )
    .await;
}

// -- flashlight --

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TorchMode {
  On,
  Off,
  Toggle,
  /// Mirror the incoming signal level.
  Follow,
}

fn torch_mode(settings: &Value) -> Result<TorchMode, NodeError> {
  match settings.get("mode").and_then(Value::as_str).unwrap_or("follow") {
    "on" => Ok(TorchMode::On),
    "off" => Ok(TorchMode::Off),
    "toggle" => Ok(TorchMode::Toggle),
    "follow" => Ok(TorchMode::Follow),
    other => Err(NodeError::invalid(format!("unknown flashlight mode '{}'", other))),
  }
}

/// `action.flashlight`: switches the torch.
pub struct FlashlightAction {
  descriptor: NodeDescriptor,
  capabilities: Capabilities,
}

impl FlashlightAction {
  pub fn new(capabilities: Capabilities) -> Self {
    Self {
      descriptor: action_descriptor(
        "action.flashlight",
        "Flashlight",
        "Turns the flashlight on, off, toggles it or follows the signal",
        json!({ "mode": "follow" }),
      ),
      capabilities,
    }
  }
}

struct TorchSwitch {
  node_id: NodeId,
  mode: TorchMode,
  capabilities: Capabilities,
}

#[async_trait]
impl SignalHandler for TorchSwitch {
  async fn handle(
    &self,
    signal: &Signal,
    bus: &SignalBus,
  ) -> Result<SignalPropagation, HandlerError> {
    if !permitted(&self.capabilities, Capability::Flashlight, self.node_id, bus).await {
      return Ok(SignalPropagation::forward());
    }

    let torch = &self.capabilities.torch;
    let target = match self.mode {
      TorchMode::On => Ok(true),
      TorchMode::Off => Ok(false),
      TorchMode::Follow => Ok(signal.is_on()),
      TorchMode::Toggle => torch.state().await.map(|on| !on),
    };
    let result = match target {
      Ok(on) => torch.set_state(on).await.map(|_| on),
      Err(e) => Err(e),
    };

    match result {
      Ok(on) => {
        bus
          .emit_event(FLASHLIGHT_STATE_CHANGED, Some(json!({ "state": on })))
          .await;
      }
      Err(e) => report_failure(Capability::Flashlight, self.node_id, &e, bus).await,
    }
    Ok(SignalPropagation::forward())
  }
}

#[async_trait]
impl NodeBehavior for FlashlightAction {
  fn descriptor(&self) -> &NodeDescriptor {
    &self.descriptor
  }

  fn validate(&self, settings: &Value) -> Result<(), NodeError> {
    torch_mode(settings).map(|_| ())
  }

  async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
    let mode = torch_mode(&ctx.settings)?;
    ctx.bus.register_handler(
      ctx.node_id,
      TorchSwitch {
        node_id: ctx.node_id,
        mode,
        capabilities: self.capabilities.clone(),
      },
    );
    Ok(NodeOutput::none())
  }

  fn render(&self, settings: &Value) -> Option<String> {
    let mode = settings.get("mode").and_then(Value::as_str).unwrap_or("follow");
    Some(format!("<span class=\"lumen-action\">flashlight: {}</span>", mode))
  }
}

// -- vibrate --

/// `action.vibrate`: pulses the vibrator on ON signals.
pub struct VibrateAction {
  descriptor: NodeDescriptor,
  capabilities: Capabilities,
}

impl VibrateAction {
  pub fn new(capabilities: Capabilities) -> Self {
    Self {
      descriptor: action_descriptor(
        "action.vibrate",
        "Vibrate",
        "Vibrates the device when the signal is on",
        json!({ "duration_ms": 200 }),
      ),
      capabilities,
    }
  }
}

fn pulse_length(settings: &Value) -> Result<Duration, NodeError> {
  match settings.get("duration_ms").and_then(Value::as_u64) {
    Some(ms) if (1..=10_000).contains(&ms) => Ok(Duration::from_millis(ms)),
    _ => Err(NodeError::invalid("duration_ms must be between 1 and 10000")),
  }
}

struct Pulse {
  node_id: NodeId,
  duration: Duration,
  capabilities: Capabilities,
}

#[async_trait]
impl SignalHandler for Pulse {
  async fn handle(
    &self,
    signal: &Signal,
    bus: &SignalBus,
  ) -> Result<SignalPropagation, HandlerError> {
    if signal.is_on() && permitted(&self.capabilities, Capability::Vibration, self.node_id, bus).await
      && let Err(e) = self.capabilities.vibrator.vibrate(self.duration).await
    {
      report_failure(Capability::Vibration, self.node_id, &e, bus).await;
    }
    Ok(SignalPropagation::forward())
  }
}

#[async_trait]
impl NodeBehavior for VibrateAction {
  fn descriptor(&self) -> &NodeDescriptor {
    &self.descriptor
  }

  fn validate(&self, settings: &Value) -> Result<(), NodeError> {
    pulse_length(settings).map(|_| ())
  }

  async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
    let duration = pulse_length(&ctx.settings)?;
    ctx.bus.register_handler(
      ctx.node_id,
      Pulse {
        node_id: ctx.node_id,
        duration,
        capabilities: self.capabilities.clone(),
      },
    );
    Ok(NodeOutput::none())
  }
}

// -- volume --

/// `action.volume`: sets the media volume on ON signals.
pub struct VolumeAction {
  descriptor: NodeDescriptor,
  capabilities: Capabilities,
}

impl VolumeAction {
  pub fn new(capabilities: Capabilities) -> Self {
    Self {
      descriptor: action_descriptor(
        "action.volume",
        "Volume",
        "Sets the volume when the signal is on",
        json!({ "level": 0.5 }),
      ),
      capabilities,
    }
  }
}

fn volume_level(settings: &Value) -> Result<f64, NodeError> {
  match settings.get("level").and_then(Value::as_f64) {
    Some(level) if (0.0..=1.0).contains(&level) => Ok(level),
    _ => Err(NodeError::invalid("level must be a number between 0 and 1")),
  }
}

struct SetVolume {
  node_id: NodeId,
  level: f64,
  capabilities: Capabilities,
}

#[async_trait]
impl SignalHandler for SetVolume {
  async fn handle(
    &self,
    signal: &Signal,
    bus: &SignalBus,
  ) -> Result<SignalPropagation, HandlerError> {
    if signal.is_on()
      && let Err(e) = self.capabilities.volume.set_volume(self.level).await
    {
      report_failure(Capability::Volume, self.node_id, &e, bus).await;
    }
    Ok(SignalPropagation::forward())
  }
}

#[async_trait]
impl NodeBehavior for VolumeAction {
  fn descriptor(&self) -> &NodeDescriptor {
    &self.descriptor
  }

  fn validate(&self, settings: &Value) -> Result<(), NodeError> {
    volume_level(settings).map(|_| ())
  }

  async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
    let level = volume_level(&ctx.settings)?;
    ctx.bus.register_handler(
      ctx.node_id,
      SetVolume {
        node_id: ctx.node_id,
        level,
        capabilities: self.capabilities.clone(),
      },
    );
    Ok(NodeOutput::none())
  }
}

// -- variables --

/// `action.set_variable`: stores a value in the shared variables.
///
/// The value is the `value` setting when present, else the first value
/// resolved from upstream data nodes, else the incoming signal payload.
pub struct SetVariableAction {
  descriptor: NodeDescriptor,
}

impl SetVariableAction {
  pub fn new() -> Self {
    Self {
      descriptor: action_descriptor(
        "action.set_variable",
        "Set Variable",
        "Stores a value under a variable name",
        json!({ "key": "" }),
      ),
    }
  }
}

fn variable_key(settings: &Value) -> Result<&str, NodeError> {
  settings
    .get("key")
    .and_then(Value::as_str)
    .filter(|s| !s.is_empty())
    .ok_or_else(|| NodeError::invalid("'key' is required"))
}

struct StoreVariable {
  key: String,
  fixed: Option<Value>,
}

#[async_trait]
impl SignalHandler for StoreVariable {
  async fn handle(
    &self,
    signal: &Signal,
    bus: &SignalBus,
  ) -> Result<SignalPropagation, HandlerError> {
    let value = self
      .fixed
      .clone()
      .or_else(|| signal.data.clone())
      .unwrap_or(Value::Null);
    bus.set_variable(self.key.clone(), value.clone());
    bus
      .emit_event(VARIABLE_CHANGED, Some(json!({ "key": self.key, "value": value })))
      .await;
    Ok(SignalPropagation::forward())
  }
}

#[async_trait]
impl NodeBehavior for SetVariableAction {
  fn descriptor(&self) -> &NodeDescriptor {
    &self.descriptor
  }

  fn validate(&self, settings: &Value) -> Result<(), NodeError> {
    variable_key(settings).map(|_| ())
  }

  async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
    let key = variable_key(&ctx.settings)?.to_string();
    let fixed = ctx
      .settings
      .get("value")
      .filter(|v| !v.is_null())
      .or_else(|| ctx.first_input())
      .cloned();
    ctx.bus.register_handler(ctx.node_id, StoreVariable { key, fixed });
    Ok(NodeOutput::none())
  }
}

// -- log --

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogLevel {
  Debug,
  Info,
  Warn,
  Error,
}

fn log_level(settings: &Value) -> Result<LogLevel, NodeError> {
  match settings.get("level").and_then(Value::as_str).unwrap_or("info") {
    "debug" => Ok(LogLevel::Debug),
    "info" => Ok(LogLevel::Info),
    "warn" => Ok(LogLevel::Warn),
    "error" => Ok(LogLevel::Error),
    other => Err(NodeError::invalid(format!("unknown log level '{}'", other))),
  }
}

fn template(settings: &Value) -> Result<&str, NodeError> {
  let source = settings
    .get("template")
    .and_then(Value::as_str)
    .ok_or_else(|| NodeError::invalid("'template' is required"))?;
  Environment::new()
    .template_from_str(source)
    .map_err(|e| NodeError::invalid(format!("bad template: {}", e)))?;
  Ok(source)
}

/// `action.log`: renders a template against the signal and variables and
/// writes it to the log.
pub struct LogAction {
  descriptor: NodeDescriptor,
}

impl LogAction {
  pub fn new() -> Self {
    Self {
      descriptor: action_descriptor(
        "action.log",
        "Log",
        "Writes a line rendered from the signal and variables",
        json!({ "template": "signal from {{ signal.source }}: {{ signal.data }}", "level": "info" }),
      ),
    }
  }
}

struct WriteLog {
  template: String,
  level: LogLevel,
  logger: NodeLogger,
}

impl WriteLog {
  fn render(&self, signal: &Signal, bus: &SignalBus) -> Result<String, HandlerError> {
    let ctx = minijinja::Value::from_serialize(json!({
      "signal": signal.to_value(),
      "variables": bus.get_all_variables(),
    }));
    Environment::new()
      .render_str(&self.template, ctx)
      .map_err(|e| HandlerError::failed(format!("template render failed: {}", e)))
  }
}

#[async_trait]
impl SignalHandler for WriteLog {
  async fn handle(
    &self,
    signal: &Signal,
    bus: &SignalBus,
  ) -> Result<SignalPropagation, HandlerError> {
    let line = self.render(signal, bus)?;
    match self.level {
      LogLevel::Debug => self.logger.debug(&line),
      LogLevel::Info => self.logger.info(&line),
      LogLevel::Warn => self.logger.warn(&line),
      LogLevel::Error => self.logger.error(&line),
    }
    bus.set_variable(LAST_LOG_VARIABLE, Value::String(line));
    Ok(SignalPropagation::forward())
  }
}

#[async_trait]
impl NodeBehavior for LogAction {
  fn descriptor(&self) -> &NodeDescriptor {
    &self.descriptor
  }

  fn validate(&self, settings: &Value) -> Result<(), NodeError> {
    template(settings)?;
    log_level(settings).map(|_| ())
  }

  async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
    let template = template(&ctx.settings)?.to_string();
    let level = log_level(&ctx.settings)?;
    ctx.bus.register_handler(
      ctx.node_id,
      WriteLog {
        template,
        level,
        logger: ctx.logger.clone(),
      },
    );
    Ok(NodeOutput::none())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_settings_validation() {
    let caps = Capabilities::in_memory();
    assert!(FlashlightAction::new(caps.clone()).validate(&json!({ "mode": "strobe" })).is_err());
    assert!(VolumeAction::new(caps.clone()).validate(&json!({ "level": 1.2 })).is_err());
    assert!(VolumeAction::new(caps.clone()).validate(&json!({ "level": 0.3 })).is_ok());
    assert!(VibrateAction::new(caps).validate(&json!({ "duration_ms": 0 })).is_err());
    assert!(SetVariableAction::new().validate(&json!({ "key": "" })).is_err());
  }

  #[test]
  fn test_log_template_must_compile() {
    let node = LogAction::new();
    assert!(node.validate(&json!({ "template": "{{ signal.data " })).is_err());
    assert!(node.validate(&json!({ "template": "{{ variables.count }}" })).is_ok());
    assert!(node.validate(&json!({ "template": "x", "level": "loud" })).is_err());
  }
}
