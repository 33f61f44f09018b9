//! Event subscription table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use lumen_graph::NodeId;
use parking_lot::Mutex;
use serde_json::Value;

pub(crate) type EventCallback = Arc<dyn Fn(Option<Value>) -> BoxFuture<'static, ()> + Send + Sync>;

struct Subscriber {
  id: u64,
  node_id: NodeId,
  callback: EventCallback,
}

/// Event name to ordered subscriber list.
#[derive(Default)]
pub(crate) struct EventTable {
  next_id: AtomicU64,
  subscribers: Mutex<HashMap<String, Vec<Subscriber>>>,
}

impl EventTable {
  pub(crate) fn subscribe(
    self: &Arc<Self>,
    event: &str,
    node_id: NodeId,
    callback: EventCallback,
  ) -> EventSubscription {
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    self
      .subscribers
      .lock()
      .entry(event.to_string())
      .or_default()
      .push(Subscriber {
        id,
        node_id,
        callback,
      });

    EventSubscription {
      table: Arc::downgrade(self),
      event: event.to_string(),
      id,
      node_id,
    }
  }

  /// Callbacks for an event, in subscription order.
  ///
  /// Returned as a snapshot so callbacks may subscribe or unsubscribe while
  /// the event is being delivered.
  pub(crate) fn listeners(&self, event: &str) -> Vec<EventCallback> {
    self
      .subscribers
      .lock()
      .get(event)
      .map(|subs| subs.iter().map(|s| s.callback.clone()).collect())
      .unwrap_or_default()
  }

  pub(crate) fn count(&self, event: &str) -> usize {
    self.subscribers.lock().get(event).map_or(0, Vec::len)
  }

  fn remove(&self, event: &str, id: u64) -> bool {
    let mut subscribers = self.subscribers.lock();
    let Some(subs) = subscribers.get_mut(event) else {
      return false;
    };
    let before = subs.len();
    subs.retain(|s| s.id != id);
    let removed = subs.len() != before;
    if subs.is_empty() {
      subscribers.remove(event);
    }
    removed
  }

  /// Drop every subscription held by a node. Returns how many were removed.
  pub(crate) fn remove_node(&self, node_id: NodeId) -> usize {
    let mut removed = 0;
    self.subscribers.lock().retain(|_, subs| {
      let before = subs.len();
      subs.retain(|s| s.node_id != node_id);
      removed += before - subs.len();
      !subs.is_empty()
    });
    removed
  }

  pub(crate) fn clear(&self) {
    self.subscribers.lock().clear();
  }
}

/// Handle to one event subscription.
///
/// Dropping the handle does not unsubscribe; call
/// [`EventSubscription::unsubscribe`] (or dispose the owning node).
#[derive(Debug, Clone)]
pub struct EventSubscription {
  table: Weak<EventTable>,
  event: String,
  id: u64,
  node_id: NodeId,
}

impl EventSubscription {
  /// Remove this subscription. Returns false if it was already gone.
  pub fn unsubscribe(&self) -> bool {
    match self.table.upgrade() {
      Some(table) => table.remove(&self.event, self.id),
      None => false,
    }
  }

  pub fn event(&self) -> &str {
    &self.event
  }

  pub fn node_id(&self) -> NodeId {
    self.node_id
  }
}
