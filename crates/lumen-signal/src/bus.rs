//! The signal bus.

use std::any::Any;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use lumen_config::EngineConfig;
use lumen_graph::{Graph, NodeId};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use crate::context::ExecutionContext;
use crate::error::{BusError, HandlerError};
use crate::events::{EventCallback, EventTable, EventSubscription};
use crate::handler::SignalHandler;
use crate::signal::{Signal, SignalPropagation};

/// Limits applied by a bus instance.
#[derive(Debug, Clone, Copy)]
pub struct BusConfig {
  /// Diagnostic execution stack length, trimmed oldest-first.
  pub max_execution_stack: usize,
  /// Pending top-level signals accepted before `emit_signal` fails.
  pub max_queue_length: usize,
}

impl Default for BusConfig {
  fn default() -> Self {
    Self::from(&EngineConfig::default())
  }
}

impl From<&EngineConfig> for BusConfig {
  fn from(config: &EngineConfig) -> Self {
    Self {
      max_execution_stack: config.max_execution_stack,
      max_queue_length: config.max_queue_length,
    }
  }
}

/// Counters describing bus activity since creation or the last reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BusStats {
  /// Top-level signals accepted by `emit_signal` / `emit_signal_immediate`.
  pub emitted: u64,
  /// Handler invocations that forwarded the signal.
  pub delivered: u64,
  /// Handler invocations that blocked the signal.
  pub blocked: u64,
  /// Handler invocations that returned an error or panicked.
  pub failed: u64,
}

#[derive(Default)]
struct Counters {
  emitted: AtomicU64,
  delivered: AtomicU64,
  blocked: AtomicU64,
  failed: AtomicU64,
}

impl Counters {
  fn snapshot(&self) -> BusStats {
    BusStats {
      emitted: self.emitted.load(Ordering::Relaxed),
      delivered: self.delivered.load(Ordering::Relaxed),
      blocked: self.blocked.load(Ordering::Relaxed),
      failed: self.failed.load(Ordering::Relaxed),
    }
  }

  fn clear(&self) {
    self.emitted.store(0, Ordering::Relaxed);
    self.delivered.store(0, Ordering::Relaxed);
    self.blocked.store(0, Ordering::Relaxed);
    self.failed.store(0, Ordering::Relaxed);
  }
}

#[derive(Default)]
struct SignalQueue {
  pending: VecDeque<Signal>,
  draining: bool,
  /// Bumped by `reset`; traversals started under an older generation stop.
  generation: u64,
}

struct BusInner {
  graph: Arc<Graph>,
  config: BusConfig,
  handlers: RwLock<HashMap<NodeId, Arc<dyn SignalHandler>>>,
  queue: Mutex<SignalQueue>,
  context: RwLock<ExecutionContext>,
  events: Arc<EventTable>,
  counters: Counters,
}

/// One unit of propagation work.
enum Step {
  /// The signal rests on `node_id`; fan out to its outputs.
  Visit {
    signal: Signal,
    node_id: NodeId,
    allowed: Option<Vec<NodeId>>,
  },
  /// Hand the signal to `target`'s handler.
  Deliver { signal: Signal, target: NodeId },
}

/// Clears the draining flag if a drain ends without emptying the queue
/// (cancelled future or panic). Signals still queued are handed to a
/// spawned drain when a tokio runtime is available, otherwise they wait for
/// the next `emit_signal`.
struct DrainGuard<'a> {
  bus: &'a SignalBus,
  generation: u64,
  released: bool,
}

impl Drop for DrainGuard<'_> {
  fn drop(&mut self) {
    if self.released {
      return;
    }
    let leftover = {
      let mut queue = self.bus.inner.queue.lock();
      if queue.generation != self.generation {
        return;
      }
      queue.draining = false;
      queue.pending.len()
    };
    if leftover == 0 {
      return;
    }
    if let Ok(runtime) = tokio::runtime::Handle::try_current() {
      debug!(pending = leftover, "signal_drain_resumed");
      let bus = self.bus.clone();
      runtime.spawn(async move { bus.drain().await });
    }
  }
}

/// The propagation engine of one graph instance.
///
/// Cloning yields another handle to the same bus. Handlers receive a handle
/// with every signal, so they can read variables, emit events and queue
/// further signals.
#[derive(Clone)]
pub struct SignalBus {
  inner: Arc<BusInner>,
}

impl std::fmt::Debug for SignalBus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SignalBus")
      .field("nodes", &self.inner.graph.len())
      .field("handlers", &self.inner.handlers.read().len())
      .field("stats", &self.stats())
      .finish()
  }
}

impl SignalBus {
  /// Create a bus for `graph` with default limits.
  pub fn new(graph: Arc<Graph>) -> Self {
    Self::with_config(graph, BusConfig::default())
  }

  pub fn with_config(graph: Arc<Graph>, config: BusConfig) -> Self {
    Self {
      inner: Arc::new(BusInner {
        graph,
        config,
        handlers: RwLock::new(HashMap::new()),
        queue: Mutex::new(SignalQueue::default()),
        context: RwLock::new(ExecutionContext::new(config.max_execution_stack)),
        events: Arc::new(EventTable::default()),
        counters: Counters::default(),
      }),
    }
  }

  pub fn graph(&self) -> &Graph {
    &self.inner.graph
  }

  /// The current execution context. Replaced by [`SignalBus::reset`].
  pub fn context(&self) -> ExecutionContext {
    self.inner.context.read().clone()
  }

  pub fn stats(&self) -> BusStats {
    self.inner.counters.snapshot()
  }

  /// Number of top-level signals waiting to propagate.
  pub fn pending(&self) -> usize {
    self.inner.queue.lock().pending.len()
  }

  // -- handlers --

  /// Register the handler for a node, disposing any handler it replaces.
  pub fn register_handler<H>(&self, node_id: NodeId, handler: H)
  where
    H: SignalHandler + 'static,
  {
    let previous = self
      .inner
      .handlers
      .write()
      .insert(node_id, Arc::new(handler));
    if let Some(previous) = previous {
      debug!(node_id = %node_id, "handler_replaced");
      previous.dispose();
    }
  }

  /// Remove and dispose a node's handler. Returns false if none was set.
  pub fn unregister_handler(&self, node_id: NodeId) -> bool {
    let removed = self.inner.handlers.write().remove(&node_id);
    match removed {
      Some(handler) => {
        handler.dispose();
        true
      }
      None => false,
    }
  }

  pub fn has_handler(&self, node_id: NodeId) -> bool {
    self.inner.handlers.read().contains_key(&node_id)
  }

  // -- signals --

  /// Queue a top-level signal from `source`.
  ///
  /// If no drain is in progress the queue is drained before this returns,
  /// including any signals queued by handlers along the way. Called from
  /// inside a handler, the signal is only queued.
  pub async fn emit_signal(&self, source: NodeId, data: Option<Value>) -> Result<(), BusError> {
    let signal = self.new_signal(source, data)?;
    {
      let mut queue = self.inner.queue.lock();
      if queue.pending.len() >= self.inner.config.max_queue_length {
        warn!(node_id = %source, capacity = self.inner.config.max_queue_length, "signal_queue_full");
        return Err(BusError::QueueFull {
          capacity: self.inner.config.max_queue_length,
        });
      }
      debug!(node_id = %source, signal_id = %signal.id, "signal_queued");
      queue.pending.push_back(signal);
    }
    self.inner.counters.emitted.fetch_add(1, Ordering::Relaxed);

    self.drain().await;
    Ok(())
  }

  /// Propagate a signal from `source` right away, outside the queue.
  ///
  /// No ordering is guaranteed relative to queued signals.
  pub async fn emit_signal_immediate(
    &self,
    source: NodeId,
    data: Option<Value>,
  ) -> Result<(), BusError> {
    let signal = self.new_signal(source, data)?;
    self.inner.counters.emitted.fetch_add(1, Ordering::Relaxed);
    let generation = self.inner.queue.lock().generation;
    self.propagate(signal, generation).await;
    Ok(())
  }

  fn new_signal(&self, source: NodeId, data: Option<Value>) -> Result<Signal, BusError> {
    if !self.inner.graph.contains(source) {
      return Err(BusError::UnknownNode { node_id: source });
    }
    Ok(Signal::new(source, data).with_context(self.context()))
  }

  async fn drain(&self) {
    let generation = {
      let mut queue = self.inner.queue.lock();
      if queue.draining {
        return;
      }
      queue.draining = true;
      queue.generation
    };
    let mut guard = DrainGuard {
      bus: self,
      generation,
      released: false,
    };

    loop {
      let next = {
        let mut queue = self.inner.queue.lock();
        if queue.generation != generation {
          guard.released = true;
          return;
        }
        match queue.pending.pop_front() {
          Some(signal) => signal,
          None => {
            queue.draining = false;
            guard.released = true;
            return;
          }
        }
      };
      self.propagate(next, generation).await;
    }
  }

  /// Depth-first, strictly sequential traversal from the signal's source.
  #[instrument(
    name = "signal_propagate",
    skip(self, signal),
    fields(signal_id = %signal.id, source = %signal.source)
  )]
  async fn propagate(&self, signal: Signal, generation: u64) {
    let node_id = signal.source;
    let mut stack = vec![Step::Visit {
      signal,
      node_id,
      allowed: None,
    }];

    while let Some(step) = stack.pop() {
      if self.inner.queue.lock().generation != generation {
        debug!("propagation_abandoned_after_reset");
        return;
      }

      match step {
        Step::Visit {
          signal,
          node_id,
          allowed,
        } => {
          if let Some(context) = &signal.context {
            context.record_visit(node_id);
          }
          let outputs = self.inner.graph.downstream(node_id);
          // Reverse so the first output is popped first.
          for target in outputs.iter().rev() {
            if let Some(allowed) = &allowed
              && !allowed.contains(target)
            {
              continue;
            }
            stack.push(Step::Deliver {
              signal: signal.clone(),
              target: *target,
            });
          }
        }
        Step::Deliver { signal, target } => {
          let handler = self.inner.handlers.read().get(&target).cloned();
          let Some(handler) = handler else {
            stack.push(Step::Visit {
              signal,
              node_id: target,
              allowed: None,
            });
            continue;
          };

          match self.invoke(handler.as_ref(), &signal, target).await {
            Some(verdict) => {
              if let Some(delay) = verdict.delay {
                tokio::time::sleep(delay).await;
              }
              stack.push(Step::Visit {
                signal: signal.forward(target, verdict.data),
                node_id: target,
                allowed: verdict.target_outputs,
              });
            }
            None => continue,
          }
        }
      }
    }
  }

  /// Run one handler, isolating errors and panics to this branch.
  ///
  /// Returns the verdict only when the signal should continue.
  async fn invoke(
    &self,
    handler: &dyn SignalHandler,
    signal: &Signal,
    target: NodeId,
  ) -> Option<SignalPropagation> {
    let result = AssertUnwindSafe(handler.handle(signal, self))
      .catch_unwind()
      .await
      .unwrap_or_else(|payload| {
        Err(HandlerError::Panicked {
          message: panic_message(payload),
        })
      });

    let counters = &self.inner.counters;
    match result {
      Ok(verdict) if verdict.propagate => {
        counters.delivered.fetch_add(1, Ordering::Relaxed);
        debug!(node_id = %target, signal_id = %signal.id, "signal_delivered");
        Some(verdict)
      }
      Ok(_) => {
        counters.blocked.fetch_add(1, Ordering::Relaxed);
        debug!(node_id = %target, signal_id = %signal.id, "signal_blocked");
        None
      }
      Err(e) => {
        counters.failed.fetch_add(1, Ordering::Relaxed);
        error!(node_id = %target, signal_id = %signal.id, error = %e, "handler_failed");
        None
      }
    }
  }

  // -- variables --

  /// Set a shared variable, returning the previous value.
  pub fn set_variable(&self, key: impl Into<String>, value: Value) -> Option<Value> {
    self.context().set_variable(key, value)
  }

  pub fn get_variable(&self, key: &str) -> Option<Value> {
    self.context().get_variable(key)
  }

  pub fn delete_variable(&self, key: &str) -> Option<Value> {
    self.context().delete_variable(key)
  }

  pub fn get_all_variables(&self) -> BTreeMap<String, Value> {
    self.context().variables()
  }

  // -- events --

  /// Deliver an event to every subscriber, in subscription order.
  pub async fn emit_event(&self, event: &str, data: Option<Value>) {
    let listeners = self.inner.events.listeners(event);
    debug!(event = %event, listeners = listeners.len(), "event_emitted");
    for listener in listeners {
      listener(data.clone()).await;
    }
  }

  /// Subscribe `node_id` to an event.
  ///
  /// The callback runs once per emission until the returned subscription is
  /// unsubscribed, the node's subscriptions are dropped, or the bus resets.
  pub fn subscribe_to_event<F, Fut>(
    &self,
    event: &str,
    node_id: NodeId,
    callback: F,
  ) -> EventSubscription
  where
    F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    let callback: EventCallback = Arc::new(move |data| callback(data).boxed());
    self.inner.events.subscribe(event, node_id, callback)
  }

  /// Drop every event subscription held by a node.
  pub fn unsubscribe_node(&self, node_id: NodeId) -> usize {
    self.inner.events.remove_node(node_id)
  }

  pub fn subscriber_count(&self, event: &str) -> usize {
    self.inner.events.count(event)
  }

  // -- lifecycle --

  /// Return the bus to its freshly created state.
  ///
  /// Handlers are removed and disposed, pending signals dropped, the context
  /// replaced and every event subscription released. Traversals in flight
  /// stop at their next hop.
  pub fn reset(&self) {
    let handlers = {
      let mut queue = self.inner.queue.lock();
      queue.generation += 1;
      queue.pending.clear();
      queue.draining = false;

      let handlers = std::mem::take(&mut *self.inner.handlers.write());
      *self.inner.context.write() = ExecutionContext::new(self.inner.config.max_execution_stack);
      self.inner.events.clear();
      self.inner.counters.clear();
      handlers
    };

    for handler in handlers.values() {
      handler.dispose();
    }
    info!(disposed = handlers.len(), "bus_reset");
  }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    s.to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic".to_string()
  }
}
