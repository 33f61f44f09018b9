//! Propagation, queueing and event tests for the signal bus.

use std::sync::Arc;
use std::time::Duration;

use lumen_graph::{Graph, NodeId};
use lumen_signal::{
  BusConfig, BusError, HandlerError, SignalBus, SignalHandler, SignalPropagation, handler_fn,
};
use parking_lot::Mutex;
use serde_json::{Value, json};

type Log = Arc<Mutex<Vec<(NodeId, Option<Value>)>>>;

fn chain(ids: &[NodeId]) -> Arc<Graph> {
  let mut builder = Graph::builder();
  for id in ids {
    builder = builder.node(*id, "flow.delay");
  }
  for pair in ids.windows(2) {
    builder = builder.edge(pair[0], pair[1]);
  }
  Arc::new(builder.build().unwrap())
}

/// Handler that records what it sees and forwards.
fn recorder(node_id: NodeId, log: &Log) -> impl SignalHandler + 'static {
  let log = log.clone();
  handler_fn(move |signal, _bus| {
    let log = log.clone();
    async move {
      log.lock().push((node_id, signal.data.clone()));
      Ok(SignalPropagation::forward())
    }
  })
}

fn seen(log: &Log) -> Vec<NodeId> {
  log.lock().iter().map(|(id, _)| *id).collect()
}

#[tokio::test]
async fn test_unhandled_node_is_transparent() {
  let bus = SignalBus::new(chain(&[1, 2, 3]));
  let log: Log = Default::default();
  bus.register_handler(3, recorder(3, &log));

  bus.emit_signal(1, Some(json!({ "x": 1 }))).await.unwrap();

  assert_eq!(log.lock().clone(), vec![(3, Some(json!({ "x": 1 })))]);
  assert_eq!(bus.stats().delivered, 1);
}

#[tokio::test]
async fn test_handler_data_replaces_payload() {
  let bus = SignalBus::new(chain(&[1, 2, 3]));
  let log: Log = Default::default();
  bus.register_handler(
    2,
    handler_fn(|_signal, _bus| async { Ok(SignalPropagation::forward_with(json!("replaced"))) }),
  );
  bus.register_handler(3, recorder(3, &log));

  bus.emit_signal(1, Some(json!("original"))).await.unwrap();

  assert_eq!(log.lock().clone(), vec![(3, Some(json!("replaced")))]);
}

#[tokio::test(start_paused = true)]
async fn test_fan_out_is_sequential_depth_first() {
  // 1 -> 2 -> 4, 1 -> 3; node 2 is slow.
  let graph = Graph::builder()
    .node(1, "trigger.manual")
    .node(2, "flow.delay")
    .node(3, "action.log")
    .node(4, "action.log")
    .edge(1, 2)
    .edge(1, 3)
    .edge(2, 4)
    .build()
    .unwrap();
  let bus = SignalBus::new(Arc::new(graph));
  let log: Log = Default::default();

  let slow_log = log.clone();
  bus.register_handler(
    2,
    handler_fn(move |_signal, _bus| {
      let log = slow_log.clone();
      async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        log.lock().push((2, None));
        Ok(SignalPropagation::forward())
      }
    }),
  );
  bus.register_handler(3, recorder(3, &log));
  bus.register_handler(4, recorder(4, &log));

  bus.emit_signal(1, None).await.unwrap();

  assert_eq!(seen(&log), vec![2, 4, 3]);
}

#[tokio::test]
async fn test_nested_emits_drain_after_current_traversal() {
  // 1 -> 2 -> 3 and 10 -> 11; node 2 emits from 10 while handling.
  let graph = Graph::builder()
    .node(1, "trigger.manual")
    .node(2, "flow.loop")
    .node(3, "action.log")
    .node(10, "trigger.manual")
    .node(11, "action.log")
    .edge(1, 2)
    .edge(2, 3)
    .edge(10, 11)
    .build()
    .unwrap();
  let bus = SignalBus::new(Arc::new(graph));
  let log: Log = Default::default();

  bus.register_handler(
    2,
    handler_fn(|_signal, bus: SignalBus| async move {
      bus.emit_signal(10, Some(json!("first"))).await?;
      bus.emit_signal(10, Some(json!("second"))).await?;
      assert_eq!(bus.pending(), 2);
      Ok::<_, HandlerError>(SignalPropagation::forward())
    }),
  );
  bus.register_handler(3, recorder(3, &log));
  bus.register_handler(11, recorder(11, &log));

  bus.emit_signal(1, None).await.unwrap();

  assert_eq!(
    log.lock().clone(),
    vec![
      (3, None),
      (11, Some(json!("first"))),
      (11, Some(json!("second"))),
    ]
  );
  assert_eq!(bus.pending(), 0);
  assert_eq!(bus.stats().emitted, 3);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_drain_hands_off_queued_signals() {
  let graph = Graph::builder()
    .node(1, "trigger.manual")
    .node(2, "flow.delay")
    .node(10, "trigger.manual")
    .node(11, "action.log")
    .edge(1, 2)
    .edge(10, 11)
    .build()
    .unwrap();
  let bus = SignalBus::new(Arc::new(graph));
  let log: Log = Default::default();

  bus.register_handler(
    2,
    handler_fn(|_signal, bus: SignalBus| async move {
      bus.emit_signal(10, Some(json!("queued"))).await?;
      tokio::time::sleep(Duration::from_millis(50)).await;
      Ok::<_, HandlerError>(SignalPropagation::forward())
    }),
  );
  bus.register_handler(11, recorder(11, &log));

  let result = tokio::time::timeout(Duration::from_millis(10), bus.emit_signal(1, None)).await;
  assert!(result.is_err());
  assert_eq!(bus.pending(), 1);

  tokio::time::sleep(Duration::from_millis(1)).await;
  assert_eq!(seen(&log), vec![11]);
  assert_eq!(bus.pending(), 0);
}

#[tokio::test]
async fn test_handler_error_kills_only_its_branch() {
  let graph = Graph::builder()
    .node(1, "trigger.manual")
    .node(2, "action.log")
    .node(3, "action.log")
    .node(4, "action.log")
    .edge(1, 2)
    .edge(1, 3)
    .edge(2, 4)
    .build()
    .unwrap();
  let bus = SignalBus::new(Arc::new(graph));
  let log: Log = Default::default();

  bus.register_handler(
    2,
    handler_fn(|_signal, _bus| async { Err(HandlerError::failed("boom")) }),
  );
  bus.register_handler(3, recorder(3, &log));
  bus.register_handler(4, recorder(4, &log));

  bus.emit_signal(1, None).await.unwrap();

  assert_eq!(seen(&log), vec![3]);
  assert_eq!(bus.stats().failed, 1);
}

#[tokio::test]
async fn test_handler_panic_is_contained() {
  let graph = Graph::builder()
    .node(1, "trigger.manual")
    .node(2, "action.log")
    .node(3, "action.log")
    .edge(1, 2)
    .edge(1, 3)
    .build()
    .unwrap();
  let bus = SignalBus::new(Arc::new(graph));
  let log: Log = Default::default();

  bus.register_handler(
    2,
    handler_fn(|_signal, _bus| async {
      if true {
        panic!("handler exploded");
      }
      Ok(SignalPropagation::forward())
    }),
  );
  bus.register_handler(3, recorder(3, &log));

  bus.emit_signal(1, None).await.unwrap();
  bus.emit_signal(1, None).await.unwrap();

  assert_eq!(seen(&log), vec![3, 3]);
  assert_eq!(bus.stats().failed, 2);
}

#[tokio::test]
async fn test_blocked_signal_stops_branch() {
  let bus = SignalBus::new(chain(&[1, 2, 3]));
  let log: Log = Default::default();
  bus.register_handler(
    2,
    handler_fn(|_signal, _bus| async { Ok(SignalPropagation::block()) }),
  );
  bus.register_handler(3, recorder(3, &log));

  bus.emit_signal(1, None).await.unwrap();

  assert!(log.lock().is_empty());
  assert_eq!(bus.stats().blocked, 1);
}

#[tokio::test]
async fn test_target_outputs_restrict_fan_out() {
  let graph = Graph::builder()
    .node(1, "trigger.manual")
    .node(2, "logic.if_else")
    .node(3, "action.log")
    .node(4, "action.log")
    .edge(1, 2)
    .edge(2, 3)
    .edge(2, 4)
    .build()
    .unwrap();
  let bus = SignalBus::new(Arc::new(graph));
  let log: Log = Default::default();

  bus.register_handler(
    2,
    handler_fn(|_signal, _bus| async { Ok(SignalPropagation::forward().to_outputs(vec![4])) }),
  );
  bus.register_handler(3, recorder(3, &log));
  bus.register_handler(4, recorder(4, &log));

  bus.emit_signal(1, None).await.unwrap();

  assert_eq!(seen(&log), vec![4]);
}

#[tokio::test(start_paused = true)]
async fn test_verdict_delay_holds_the_next_hop() {
  let bus = SignalBus::new(chain(&[1, 2, 3]));
  let log: Log = Default::default();
  bus.register_handler(
    2,
    handler_fn(|_signal, _bus| async {
      Ok(SignalPropagation::forward().after(Duration::from_millis(500)))
    }),
  );
  bus.register_handler(3, recorder(3, &log));

  let start = tokio::time::Instant::now();
  bus.emit_signal(1, None).await.unwrap();

  assert_eq!(seen(&log), vec![3]);
  assert!(start.elapsed() >= Duration::from_millis(500));
}

#[tokio::test]
async fn test_unknown_source_is_rejected() {
  let bus = SignalBus::new(chain(&[1, 2]));
  let result = bus.emit_signal(99, None).await;
  assert!(matches!(result, Err(BusError::UnknownNode { node_id: 99 })));
  assert_eq!(bus.stats().emitted, 0);
}

#[tokio::test]
async fn test_queue_rejects_beyond_capacity() {
  let graph = Graph::builder()
    .node(1, "trigger.manual")
    .node(2, "flow.loop")
    .node(3, "action.log")
    .edge(1, 2)
    .build()
    .unwrap();
  let bus = SignalBus::with_config(
    Arc::new(graph),
    BusConfig {
      max_execution_stack: 16,
      max_queue_length: 2,
    },
  );
  let results = Arc::new(Mutex::new(Vec::new()));

  let recorded = results.clone();
  bus.register_handler(
    2,
    handler_fn(move |_signal, bus: SignalBus| {
      let recorded = recorded.clone();
      async move {
        for _ in 0..3 {
          let result = bus.emit_signal(3, None).await;
          recorded.lock().push(result.is_ok());
        }
        Ok(SignalPropagation::block())
      }
    }),
  );

  bus.emit_signal(1, None).await.unwrap();

  assert_eq!(results.lock().clone(), vec![true, true, false]);
}

#[tokio::test]
async fn test_emit_immediate_bypasses_queue() {
  let bus = SignalBus::new(chain(&[1, 2]));
  let log: Log = Default::default();
  bus.register_handler(2, recorder(2, &log));

  bus.emit_signal_immediate(1, Some(json!(1))).await.unwrap();

  assert_eq!(seen(&log), vec![2]);
  assert_eq!(bus.pending(), 0);
}

#[tokio::test]
async fn test_signals_share_context_variables() {
  let bus = SignalBus::new(chain(&[1, 2]));
  let seen_value = Arc::new(Mutex::new(None));
  let out = seen_value.clone();
  bus.register_handler(
    2,
    handler_fn(move |signal, _bus| {
      let out = out.clone();
      async move {
        *out.lock() = signal.variable("mode");
        Ok(SignalPropagation::forward())
      }
    }),
  );

  bus.set_variable("mode", json!("night"));
  bus.emit_signal(1, None).await.unwrap();

  assert_eq!(seen_value.lock().clone(), Some(json!("night")));
  assert_eq!(bus.context().execution_stack(), vec![1, 2]);
}

#[tokio::test]
async fn test_event_callback_once_per_emission_until_unsubscribed() {
  let bus = SignalBus::new(chain(&[1]));
  let received = Arc::new(Mutex::new(Vec::new()));

  let sink = received.clone();
  let subscription = bus.subscribe_to_event("x", 1, move |data| {
    let sink = sink.clone();
    async move {
      sink.lock().push(data);
    }
  });

  bus.emit_event("x", Some(json!({ "n": 1 }))).await;
  bus.emit_event("y", Some(json!({ "n": 2 }))).await;
  bus.emit_event("x", None).await;
  assert_eq!(received.lock().clone(), vec![Some(json!({ "n": 1 })), None]);

  assert!(subscription.unsubscribe());
  bus.emit_event("x", Some(json!(3))).await;
  assert_eq!(received.lock().len(), 2);
}

#[tokio::test]
async fn test_unsubscribe_node_drops_its_subscriptions() {
  let bus = SignalBus::new(chain(&[1, 2]));
  bus.subscribe_to_event("a", 1, |_| async {});
  bus.subscribe_to_event("b", 1, |_| async {});
  bus.subscribe_to_event("a", 2, |_| async {});

  assert_eq!(bus.unsubscribe_node(1), 2);
  assert_eq!(bus.subscriber_count("a"), 1);
  assert_eq!(bus.subscriber_count("b"), 0);
}

struct Disposable {
  disposed: Arc<Mutex<u32>>,
}

#[async_trait::async_trait]
impl SignalHandler for Disposable {
  async fn handle(
    &self,
    _signal: &lumen_signal::Signal,
    _bus: &SignalBus,
  ) -> Result<SignalPropagation, HandlerError> {
    Ok(SignalPropagation::forward())
  }

  fn dispose(&self) {
    *self.disposed.lock() += 1;
  }
}

#[tokio::test]
async fn test_replacing_and_unregistering_dispose_handlers() {
  let bus = SignalBus::new(chain(&[1, 2]));
  let disposed = Arc::new(Mutex::new(0));

  bus.register_handler(2, Disposable { disposed: disposed.clone() });
  bus.register_handler(2, Disposable { disposed: disposed.clone() });
  assert_eq!(*disposed.lock(), 1);

  assert!(bus.unregister_handler(2));
  assert!(!bus.unregister_handler(2));
  assert_eq!(*disposed.lock(), 2);
}

#[tokio::test]
async fn test_reset_clears_everything() {
  let bus = SignalBus::new(chain(&[1, 2]));
  let disposed = Arc::new(Mutex::new(0));
  bus.register_handler(2, Disposable { disposed: disposed.clone() });
  bus.subscribe_to_event("x", 2, |_| async {});
  bus.set_variable("k", json!(1));
  bus.emit_signal(1, None).await.unwrap();
  let old_context = bus.context();

  bus.reset();

  assert_eq!(*disposed.lock(), 1);
  assert!(!bus.has_handler(2));
  assert_eq!(bus.subscriber_count("x"), 0);
  assert!(bus.get_all_variables().is_empty());
  assert_eq!(bus.stats(), Default::default());
  assert!(old_context.get_variable("k").is_some());

  // Still usable afterwards.
  bus.emit_signal(1, None).await.unwrap();
  assert_eq!(bus.stats().emitted, 1);
}

#[tokio::test(start_paused = true)]
async fn test_reset_abandons_in_flight_traversal() {
  let bus = SignalBus::new(chain(&[1, 2, 3]));
  let log: Log = Default::default();

  let late_log = log.clone();
  bus.register_handler(
    2,
    handler_fn(move |_signal, bus: SignalBus| {
      let log = late_log.clone();
      async move {
        bus.reset();
        // Registered on the fresh bus; the old traversal must not reach it.
        bus.register_handler(3, recorder(3, &log));
        Ok(SignalPropagation::forward())
      }
    }),
  );

  bus.emit_signal(1, None).await.unwrap();

  assert!(log.lock().is_empty());
  assert!(bus.has_handler(3));
}
