//! Executor and lifecycle tests.

use std::time::Duration;

use async_trait::async_trait;
use lumen_graph::{Graph, GraphError};
use lumen_nodes::{SimulatedDevices, builtin_registry};
use lumen_registry::{
  NodeBehavior, NodeCategory, NodeContext, NodeDescriptor, NodeError, NodeOutput, NodeTypeRegistry,
};
use lumen_runtime::{Executor, GraphRuntime, RuntimeError};
use lumen_signal::SignalBus;
use serde_json::json;

struct Exploding {
  descriptor: NodeDescriptor,
}

impl Exploding {
  fn new() -> Self {
    Self {
      descriptor: NodeDescriptor::new("test.explode", "Explode", NodeCategory::Action),
    }
  }
}

#[async_trait]
impl NodeBehavior for Exploding {
  fn descriptor(&self) -> &NodeDescriptor {
    &self.descriptor
  }

  async fn execute(&self, _ctx: NodeContext) -> Result<NodeOutput, NodeError> {
    panic!("initializer blew up");
  }
}

fn registry(devices: &SimulatedDevices) -> NodeTypeRegistry {
  let mut registry = builtin_registry(&devices.capabilities()).unwrap();
  registry.register(Exploding::new()).unwrap();
  registry
}

#[tokio::test]
async fn test_order_respects_edges() {
  let devices = SimulatedDevices::new();
  let registry = registry(&devices);
  let graph = Graph::builder()
    .node(4, "action.log")
    .node(3, "flow.delay")
    .node(2, "flow.delay")
    .node(1, "trigger.manual")
    .edge(1, 2)
    .edge(1, 3)
    .edge(2, 4)
    .edge(3, 4)
    .build()
    .unwrap();

  let bus = SignalBus::new(graph.into());
  let report = Executor::new(&registry).execute(&bus).await.unwrap();

  assert_eq!(report.order.len(), 4);
  let position = |id| report.order.iter().position(|n| *n == id).unwrap();
  for (from, to) in bus.graph().edges() {
    assert!(position(*from) < position(*to), "{} before {}", from, to);
  }
  assert!(report.is_clean());
  assert_eq!(report.initialized.len(), 4);
}

#[tokio::test]
async fn test_cycle_aborts_before_initialization() {
  let devices = SimulatedDevices::new();
  let registry = registry(&devices);
  let graph = Graph::builder()
    .node(1, "flow.delay")
    .node(2, "flow.delay")
    .edge(1, 2)
    .edge(2, 1)
    .build()
    .unwrap();

  let bus = SignalBus::new(graph.into());
  let result = Executor::new(&registry).execute(&bus).await;

  assert!(matches!(
    result,
    Err(RuntimeError::Graph(GraphError::CycleDetected { .. }))
  ));
  assert!(!bus.has_handler(1));
  assert!(!bus.has_handler(2));
}

#[tokio::test]
async fn test_unknown_type_is_structural() {
  let devices = SimulatedDevices::new();
  let graph = Graph::builder()
    .node(1, "flow.delay")
    .node(2, "teleport")
    .edge(1, 2)
    .build()
    .unwrap();

  let mut runtime = GraphRuntime::new(graph, registry(&devices));
  let result = runtime.start().await;

  match result {
    Err(RuntimeError::UnknownNodeType { node_id, node_type }) => {
      assert_eq!(node_id, 2);
      assert_eq!(node_type, "teleport");
    }
    other => panic!("unexpected: {:?}", other),
  }
  assert!(!runtime.bus().has_handler(1));
  assert!(!runtime.is_running());
}

#[tokio::test]
async fn test_instance_limit() {
  let devices = SimulatedDevices::new();
  let mut builder = Graph::builder();
  for id in 1..=9 {
    builder = builder.node(id, "trigger.interval");
  }

  let mut runtime = GraphRuntime::new(builder.build().unwrap(), registry(&devices));
  let result = runtime.start().await;

  assert!(matches!(
    result,
    Err(RuntimeError::InstanceLimit { limit: 8, count: 9, .. })
  ));
}

#[tokio::test]
async fn test_node_failures_are_isolated() {
  let devices = SimulatedDevices::new();
  let graph = Graph::builder()
    .node(1, "trigger.manual")
    .node(2, "action.set_variable")
    .node(3, "test.explode")
    .node_with(4, "action.set_variable", json!({ "key": "reached", "value": true }))
    .edge(1, 2)
    .edge(2, 3)
    .edge(3, 4)
    .build()
    .unwrap();

  let mut runtime = GraphRuntime::new(graph, registry(&devices));
  let report = runtime.start().await.unwrap().clone();

  assert!(report.errors[&2].contains("'key' is required"));
  assert!(report.errors[&3].contains("initializer blew up"));
  assert_eq!(report.initialized, vec![1, 4]);

  // Failed nodes have no handler and pass signals through.
  runtime.trigger(1, None).await.unwrap();
  assert_eq!(runtime.bus().get_variable("reached"), Some(json!(true)));
}

#[tokio::test]
async fn test_value_nodes_feed_downstream_inputs() {
  let devices = SimulatedDevices::new();
  let graph = Graph::builder()
    .node_with(1, "data.constant", json!({ "value": 42 }))
    .node(2, "trigger.manual")
    .node_with(3, "action.set_variable", json!({ "key": "answer" }))
    .edge(1, 3)
    .edge(2, 3)
    .build()
    .unwrap();

  let mut runtime = GraphRuntime::new(graph, registry(&devices));
  let report = runtime.start().await.unwrap();
  assert_eq!(report.outputs[&1], json!(42));

  runtime.trigger(2, Some(json!("ignored"))).await.unwrap();
  assert_eq!(runtime.bus().get_variable("answer"), Some(json!(42)));
}

#[tokio::test]
async fn test_trigger_requires_start() {
  let devices = SimulatedDevices::new();
  let graph = Graph::builder().node(1, "trigger.manual").build().unwrap();
  let mut runtime = GraphRuntime::new(graph, registry(&devices));
  assert!(runtime.registry().get("trigger.manual").is_some());
  assert!(runtime.registry().get("test.explode").is_some());

  assert!(matches!(
    runtime.trigger(1, None).await,
    Err(RuntimeError::NotStarted)
  ));

  runtime.start().await.unwrap();
  assert!(runtime.trigger(1, None).await.is_ok());
  assert!(matches!(
    runtime.trigger(99, None).await,
    Err(RuntimeError::Bus(_))
  ));
}

#[tokio::test]
async fn test_if_else_from_editor_document() {
  let document = json!({
    "drawflow": {
      "Home": {
        "data": {
          "1": {
            "id": 1,
            "name": "start",
            "data": { "type": "trigger.manual" },
            "outputs": {
              "output_1": { "connections": [{ "node": "2", "output": "input_1" }] }
            }
          },
          "2": {
            "id": 2,
            "name": "check",
            "data": { "type": "logic.if_else", "expression": "signal.data.pass" },
            "outputs": {
              "output_1": { "connections": [{ "node": "3", "output": "input_1" }] },
              "output_2": { "connections": [] }
            }
          },
          "3": {
            "id": 3,
            "name": "passed",
            "data": { "type": "action.set_variable", "key": "passed", "value": true }
          }
        }
      }
    }
  });
  let graph = Graph::from_json_str(&document.to_string(), "Home").unwrap();
  let devices = SimulatedDevices::new();
  let mut runtime = GraphRuntime::new(graph, registry(&devices));
  runtime.start().await.unwrap();

  runtime.trigger(1, Some(json!({ "pass": false }))).await.unwrap();
  assert_eq!(runtime.bus().get_variable("passed"), None);
  assert_eq!(runtime.bus().stats().blocked, 1);

  runtime.trigger(1, Some(json!({ "pass": true }))).await.unwrap();
  assert_eq!(runtime.bus().get_variable("passed"), Some(json!(true)));
  assert_eq!(runtime.bus().stats().delivered, 2);
}

#[tokio::test]
async fn test_reinitialize_clears_condition_state() {
  let devices = SimulatedDevices::new();
  let graph = Graph::builder()
    .node(1, "trigger.manual")
    .node_with(2, "condition.event", json!({ "event": "door" }))
    .node_with(3, "action.set_variable", json!({ "key": "door.seen" }))
    .edge(1, 2)
    .edge(2, 3)
    .build()
    .unwrap();
  let mut runtime = GraphRuntime::new(graph, registry(&devices));
  runtime.start().await.unwrap();

  // Armed and waiting on the event.
  runtime.trigger(1, None).await.unwrap();
  runtime.reinitialize_node(2).await.unwrap();
  assert_eq!(runtime.bus().subscriber_count("door"), 1);

  // The fresh machine has no resting signal, so the event passes nothing.
  runtime.bus().emit_event("door", Some(json!(true))).await;
  assert_eq!(runtime.bus().get_variable("door.seen"), None);

  runtime.trigger(1, None).await.unwrap();
  assert!(runtime.bus().get_variable("door.seen").is_some());
}

#[tokio::test]
async fn test_reinitialize_unknown_node() {
  let devices = SimulatedDevices::new();
  let graph = Graph::builder().node(1, "trigger.manual").build().unwrap();
  let mut runtime = GraphRuntime::new(graph, registry(&devices));

  assert!(matches!(
    runtime.reinitialize_node(1).await,
    Err(RuntimeError::NotStarted)
  ));
  runtime.start().await.unwrap();
  assert!(matches!(
    runtime.reinitialize_node(7).await,
    Err(RuntimeError::NodeNotFound { node_id: 7 })
  ));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_timers_and_subscriptions() {
  let devices = SimulatedDevices::new();
  let graph = Graph::builder()
    .node(1, "trigger.manual")
    .node_with(
      2,
      "condition.event",
      json!({ "event": "door", "initial": true, "timer_duration": 1000 }),
    )
    .node_with(3, "action.set_variable", json!({ "key": "door.open" }))
    .edge(1, 2)
    .edge(2, 3)
    .build()
    .unwrap();
  let mut runtime = GraphRuntime::new(graph, registry(&devices));
  runtime.start().await.unwrap();

  runtime.trigger(1, None).await.unwrap();
  assert_eq!(
    runtime.bus().get_variable("door.open"),
    Some(json!({ "state": true }))
  );

  let bus = runtime.bus().clone();
  runtime.shutdown();
  assert!(!runtime.is_running());
  assert_eq!(bus.subscriber_count("door"), 0);
  assert!(!bus.has_handler(2));

  tokio::time::sleep(Duration::from_millis(2000)).await;
  assert_eq!(bus.stats().emitted, 0);
  assert!(bus.get_all_variables().is_empty());
}

#[tokio::test]
async fn test_engine_config_bounds_queue() {
  let config = lumen_config::EngineConfig {
    max_queue_length: 1,
    ..Default::default()
  };
  let devices = SimulatedDevices::new();
  let graph = Graph::builder()
    .node(1, "trigger.manual")
    .node_with(2, "flow.loop", json!({ "count": 3 }))
    .node_with(3, "action.set_variable", json!({ "key": "last" }))
    .edge(1, 2)
    .edge(2, 3)
    .build()
    .unwrap();
  let mut runtime =
    GraphRuntime::with_config(graph, registry(&devices), (&config).into());
  runtime.start().await.unwrap();

  runtime.trigger(1, None).await.unwrap();
  // The loop's first re-emission fits; the second is rejected.
  assert_eq!(runtime.bus().stats().failed, 1);
  assert_eq!(
    runtime.bus().get_variable("last"),
    Some(json!({ "index": 0, "count": 3 }))
  );
}
