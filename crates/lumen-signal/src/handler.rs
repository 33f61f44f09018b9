//! Signal handler trait.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::bus::SignalBus;
use crate::error::HandlerError;
use crate::signal::{Signal, SignalPropagation};

/// A node's reaction to incoming signals.
///
/// Handlers are registered per node with [`SignalBus::register_handler`].
/// They may suspend (timers, device calls) and may call back into the bus;
/// signals they emit are queued behind the current propagation.
#[async_trait]
pub trait SignalHandler: Send + Sync {
  /// Decide whether and how the signal continues downstream.
  async fn handle(&self, signal: &Signal, bus: &SignalBus)
  -> Result<SignalPropagation, HandlerError>;

  /// Release timers, subscriptions and other resources.
  ///
  /// Called by the bus when the handler is replaced, unregistered, or the bus
  /// is reset.
  fn dispose(&self) {}
}

#[async_trait]
impl<T: SignalHandler + ?Sized> SignalHandler for Arc<T> {
  async fn handle(
    &self,
    signal: &Signal,
    bus: &SignalBus,
  ) -> Result<SignalPropagation, HandlerError> {
    (**self).handle(signal, bus).await
  }

  fn dispose(&self) {
    (**self).dispose()
  }
}

/// Handler backed by a closure. See [`handler_fn`].
pub struct FnHandler<F> {
  f: F,
}

/// Wrap a closure as a [`SignalHandler`].
///
/// ```ignore
/// bus.register_handler(2, handler_fn(|signal, _bus| async move {
///   Ok(SignalPropagation::forward_with(json!({ "seen": signal.id })))
/// }));
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
  F: Fn(Signal, SignalBus) -> Fut + Send + Sync,
  Fut: Future<Output = Result<SignalPropagation, HandlerError>> + Send + 'static,
{
  FnHandler { f }
}

#[async_trait]
impl<F, Fut> SignalHandler for FnHandler<F>
where
  F: Fn(Signal, SignalBus) -> Fut + Send + Sync,
  Fut: Future<Output = Result<SignalPropagation, HandlerError>> + Send + 'static,
{
  async fn handle(
    &self,
    signal: &Signal,
    bus: &SignalBus,
  ) -> Result<SignalPropagation, HandlerError> {
    (self.f)(signal.clone(), bus.clone()).await
  }
}
