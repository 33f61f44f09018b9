//! Device capabilities consumed by action and condition nodes.
//!
//! The engine only sees these traits. Platform adapters live outside this
//! crate; the in-memory implementations back tests and the CLI simulator.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lumen_signal::SignalBus;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::CapabilityError;

/// Event announcing a torch state change, payload `{"state": bool}`.
pub const FLASHLIGHT_STATE_CHANGED: &str = "flashlight.state.changed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
  Flashlight,
  Vibration,
  Volume,
}

impl Capability {
  /// Prefix of the diagnostic events (`<prefix>.permission.failed`,
  /// `<prefix>.failed`).
  pub fn event_prefix(self) -> &'static str {
    match self {
      Capability::Flashlight => "flashlight",
      Capability::Vibration => "vibrate",
      Capability::Volume => "volume",
    }
  }
}

impl fmt::Display for Capability {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Capability::Flashlight => "flashlight",
      Capability::Vibration => "vibration",
      Capability::Volume => "volume",
    };
    f.write_str(name)
  }
}

#[async_trait]
pub trait Torch: Send + Sync {
  async fn set_state(&self, on: bool) -> Result<(), CapabilityError>;

  async fn state(&self) -> Result<bool, CapabilityError>;

  /// Native state changes made outside the engine (system toggle, other
  /// apps), if the platform reports them.
  fn watch(&self) -> Option<watch::Receiver<bool>> {
    None
  }
}

#[async_trait]
pub trait Vibrator: Send + Sync {
  async fn vibrate(&self, duration: Duration) -> Result<(), CapabilityError>;
}

#[async_trait]
pub trait VolumeControl: Send + Sync {
  /// Set the volume, `level` in `0.0..=1.0`.
  async fn set_volume(&self, level: f64) -> Result<(), CapabilityError>;

  async fn volume(&self) -> Result<f64, CapabilityError>;
}

#[async_trait]
pub trait PermissionGate: Send + Sync {
  /// Ask for a capability, prompting if needed. Returns whether it is granted.
  async fn ensure(&self, capability: Capability) -> bool;
}

/// The device surface handed to built-in nodes.
#[derive(Clone)]
pub struct Capabilities {
  pub torch: Arc<dyn Torch>,
  pub vibrator: Arc<dyn Vibrator>,
  pub volume: Arc<dyn VolumeControl>,
  pub permissions: Arc<dyn PermissionGate>,
}

impl Capabilities {
  /// Capabilities backed by fresh in-memory devices.
  pub fn in_memory() -> Self {
    SimulatedDevices::new().capabilities()
  }
}

/// In-memory torch.
pub struct MemoryTorch {
  state: Mutex<bool>,
  failure: Mutex<Option<String>>,
  native: watch::Sender<bool>,
}

impl Default for MemoryTorch {
  fn default() -> Self {
    let (native, _) = watch::channel(false);
    Self {
      state: Mutex::new(false),
      failure: Mutex::new(None),
      native,
    }
  }
}

impl MemoryTorch {
  pub fn is_on(&self) -> bool {
    *self.state.lock()
  }

  /// Make subsequent `set_state` calls fail with `message`, or succeed again
  /// with `None`.
  pub fn fail_with(&self, message: Option<&str>) {
    *self.failure.lock() = message.map(str::to_string);
  }

  /// Change the state as if from outside the engine.
  pub fn simulate_native_change(&self, on: bool) {
    *self.state.lock() = on;
    self.native.send_replace(on);
  }
}

#[async_trait]
impl Torch for MemoryTorch {
  async fn set_state(&self, on: bool) -> Result<(), CapabilityError> {
    if let Some(message) = self.failure.lock().clone() {
      return Err(CapabilityError::Unavailable {
        capability: Capability::Flashlight.to_string(),
        message,
      });
    }
    *self.state.lock() = on;
    Ok(())
  }

  async fn state(&self) -> Result<bool, CapabilityError> {
    Ok(self.is_on())
  }

  fn watch(&self) -> Option<watch::Receiver<bool>> {
    Some(self.native.subscribe())
  }
}

/// In-memory vibrator recording every pulse.
#[derive(Default)]
pub struct MemoryVibrator {
  pulses: Mutex<Vec<Duration>>,
}

impl MemoryVibrator {
  pub fn pulses(&self) -> Vec<Duration> {
    self.pulses.lock().clone()
  }
}

#[async_trait]
impl Vibrator for MemoryVibrator {
  async fn vibrate(&self, duration: Duration) -> Result<(), CapabilityError> {
    self.pulses.lock().push(duration);
    Ok(())
  }
}

/// In-memory volume control.
pub struct MemoryVolume {
  level: Mutex<f64>,
}

impl Default for MemoryVolume {
  fn default() -> Self {
    Self {
      level: Mutex::new(0.5),
    }
  }
}

#[async_trait]
impl VolumeControl for MemoryVolume {
  async fn set_volume(&self, level: f64) -> Result<(), CapabilityError> {
    if !(0.0..=1.0).contains(&level) {
      return Err(CapabilityError::InvalidRequest {
        capability: Capability::Volume.to_string(),
        message: format!("level {} outside 0.0..=1.0", level),
      });
    }
    *self.level.lock() = level;
    Ok(())
  }

  async fn volume(&self) -> Result<f64, CapabilityError> {
    Ok(*self.level.lock())
  }
}

/// Permission gate granting everything not explicitly denied.
#[derive(Default)]
pub struct MemoryPermissions {
  denied: Mutex<HashSet<Capability>>,
}

impl MemoryPermissions {
  pub fn deny(&self, capability: Capability) {
    self.denied.lock().insert(capability);
  }

  pub fn grant(&self, capability: Capability) {
    self.denied.lock().remove(&capability);
  }
}

#[async_trait]
impl PermissionGate for MemoryPermissions {
  async fn ensure(&self, capability: Capability) -> bool {
    !self.denied.lock().contains(&capability)
  }
}

/// Handles to a full set of in-memory devices.
#[derive(Clone, Default)]
pub struct SimulatedDevices {
  pub torch: Arc<MemoryTorch>,
  pub vibrator: Arc<MemoryVibrator>,
  pub volume: Arc<MemoryVolume>,
  pub permissions: Arc<MemoryPermissions>,
}

impl SimulatedDevices {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn capabilities(&self) -> Capabilities {
    Capabilities {
      torch: self.torch.clone(),
      vibrator: self.vibrator.clone(),
      volume: self.volume.clone(),
      permissions: self.permissions.clone(),
    }
  }
}

/// Re-announces native torch changes on the bus as
/// `flashlight.state.changed`.
///
/// Stops when dropped or when [`TorchMonitor::stop`] is called.
pub struct TorchMonitor {
  cancel: CancellationToken,
}

impl TorchMonitor {
  /// Start watching `torch`. Returns `None` if it reports no native changes.
  pub fn spawn(torch: &dyn Torch, bus: SignalBus) -> Option<Self> {
    let mut changes = torch.watch()?;
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    tokio::spawn(async move {
      info!("torch_monitor_started");
      loop {
        tokio::select! {
          _ = token.cancelled() => break,
          changed = changes.changed() => {
            if changed.is_err() {
              break;
            }
            let on = *changes.borrow_and_update();
            debug!(state = on, "torch_native_change");
            bus
              .emit_event(FLASHLIGHT_STATE_CHANGED, Some(serde_json::json!({ "state": on })))
              .await;
          }
        }
      }
      info!("torch_monitor_stopped");
    });

    Some(Self { cancel })
  }

  pub fn stop(&self) {
    self.cancel.cancel();
  }
}

impl Drop for TorchMonitor {
  fn drop(&mut self) {
    self.cancel.cancel();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_memory_torch_failure_injection() {
    let torch = MemoryTorch::default();
    torch.set_state(true).await.unwrap();
    assert!(torch.is_on());

    torch.fail_with(Some("busy"));
    assert!(matches!(
      torch.set_state(false).await,
      Err(CapabilityError::Unavailable { .. })
    ));
    assert!(torch.is_on());
  }

  #[tokio::test]
  async fn test_volume_range_checked() {
    let volume = MemoryVolume::default();
    assert!(volume.set_volume(0.8).await.is_ok());
    assert!(volume.set_volume(1.5).await.is_err());
    assert_eq!(volume.volume().await.unwrap(), 0.8);
  }

  #[tokio::test]
  async fn test_permissions_default_granted() {
    let gate = MemoryPermissions::default();
    assert!(gate.ensure(Capability::Flashlight).await);
    gate.deny(Capability::Flashlight);
    assert!(!gate.ensure(Capability::Flashlight).await);
    assert!(gate.ensure(Capability::Vibration).await);
    gate.grant(Capability::Flashlight);
    assert!(gate.ensure(Capability::Flashlight).await);
  }
}
