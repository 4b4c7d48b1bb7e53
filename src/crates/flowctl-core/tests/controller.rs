//! Black-box integration tests for [`Controller`] covering the scenarios
//! from the controller's testable-properties section: propagation,
//! reload identity, cycle rejection, unhealthy-keeps-last-export, burst
//! coalescing, and close-during-evaluation.

use async_trait::async_trait;
use flowctl_core::component::{Component, RunContext};
use flowctl_core::controller::{Controller, ControllerOptions};
use flowctl_core::document::Document;
use flowctl_core::error::ControllerError;
use flowctl_core::id::NodeId;
use flowctl_core::registry::{ComponentRegistry, GlobalsBase, HttpHandler, MetricsScope};
use flowctl_core::schema::{ComponentSchema, FieldKind, FieldSchema};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct NoopMetrics;
impl MetricsScope for NoopMetrics {
    fn scoped(&self, _node: &str) -> Arc<dyn MetricsScope> {
        Arc::new(NoopMetrics)
    }
}

struct NoopHttp;
impl HttpHandler for NoopHttp {
    fn handle(&self, _path: &str) -> String {
        String::new()
    }
}

/// Mirrors whatever argument it's given back out as its exports, and
/// counts how many times `run` starts (used to check a retained node's
/// worker is never restarted across a reload).
struct Passthrough {
    starts: Arc<AtomicUsize>,
}

#[async_trait]
impl Component for Passthrough {
    async fn update(&self, args: Value) -> Result<Value, String> {
        Ok(args)
    }

    async fn run(&self, ctx: RunContext) -> Result<(), String> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        ctx.cancellation.cancelled().await;
        Ok(())
    }
}

/// Rejects arguments containing `"fail": true`; otherwise mirrors them.
struct Flaky;

#[async_trait]
impl Component for Flaky {
    async fn update(&self, args: Value) -> Result<Value, String> {
        if args.get("fail").and_then(Value::as_bool).unwrap_or(false) {
            Err("flaky: told to fail".to_string())
        } else {
            Ok(args)
        }
    }

    async fn run(&self, ctx: RunContext) -> Result<(), String> {
        ctx.cancellation.cancelled().await;
        Ok(())
    }
}

fn any_field() -> BTreeMap<String, FieldSchema> {
    let mut args = BTreeMap::new();
    args.insert("value".to_string(), FieldSchema { kind: FieldKind::Any, required: false, default: Some(Value::Null) });
    args.insert("fail".to_string(), FieldSchema { kind: FieldKind::Bool, required: false, default: Some(Value::Bool(false)) });
    args
}

fn new_controller(starts: Arc<AtomicUsize>) -> Controller {
    let mut registry = ComponentRegistry::new();
    let args = any_field();
    registry.register(
        "source",
        ComponentSchema { arguments: args.clone(), exports: BTreeMap::new() },
        Arc::new({
            let starts = starts.clone();
            move |_globals, _args| Ok(Box::new(Passthrough { starts: starts.clone() }) as Box<dyn Component>)
        }),
    );
    registry.register(
        "sink",
        ComponentSchema { arguments: args.clone(), exports: BTreeMap::new() },
        Arc::new({
            let starts = starts.clone();
            move |_globals, _args| Ok(Box::new(Passthrough { starts: starts.clone() }) as Box<dyn Component>)
        }),
    );
    registry.register(
        "flaky",
        ComponentSchema { arguments: args, exports: BTreeMap::new() },
        Arc::new(|_globals, _args| Ok(Box::new(Flaky) as Box<dyn Component>)),
    );

    let globals = GlobalsBase::new(std::env::temp_dir().join("flowctl-controller-tests"), None, Arc::new(NoopMetrics), Arc::new(NoopHttp));
    Controller::new(ControllerOptions { registry, globals })
}

fn chain_document(source_value: i64) -> Document {
    Document::from_str(&format!(
        r#"
blocks:
  - type: source
    label: a
    arguments:
      value: {source_value}
  - type: sink
    label: b
    arguments:
      value: "source.a.value"
"#
    ))
    .unwrap()
}

async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

#[tokio::test]
async fn scenario_1_two_node_chain_propagates_within_one_tick() {
    let mut controller = new_controller(Arc::new(AtomicUsize::new(0)));
    let report = controller.load(&chain_document(1)).await.unwrap();
    assert!(report.accepted);

    let infos = controller.component_infos().await;
    let b = infos.iter().find(|i| i.id == NodeId::parse("sink.b").unwrap()).unwrap();
    assert_eq!(b.exports, serde_json::json!({ "value": 1, "fail": false }));

    controller.close().await.unwrap();
}

#[tokio::test]
async fn scenario_2_label_only_reload_does_not_restart_the_worker() {
    let starts = Arc::new(AtomicUsize::new(0));
    let mut controller = new_controller(starts.clone());
    controller.load(&chain_document(1)).await.unwrap();
    assert!(wait_until(|| starts.load(Ordering::SeqCst) >= 2).await, "both workers should have started");
    let after_first_load = starts.load(Ordering::SeqCst);

    // Re-apply the identical document. Node identity (by NodeId) is
    // unchanged, so neither worker should restart.
    let report = controller.load(&chain_document(1)).await.unwrap();
    assert!(report.accepted);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(starts.load(Ordering::SeqCst), after_first_load);

    controller.close().await.unwrap();
}

#[tokio::test]
async fn scenario_3_cycle_is_rejected_and_previous_graph_keeps_running() {
    let mut controller = new_controller(Arc::new(AtomicUsize::new(0)));
    controller.load(&chain_document(1)).await.unwrap();

    let cyclic = Document::from_str(
        r#"
blocks:
  - type: source
    label: a
    arguments:
      value: "sink.b.value"
  - type: sink
    label: b
    arguments:
      value: "source.a.value"
"#,
    )
    .unwrap();
    let report = controller.load(&cyclic).await.unwrap();
    assert!(!report.accepted);
    assert!(report.diagnostics.iter().any(|d| d.contains("cycle")));

    // The previous, acyclic graph is still the live one.
    let infos = controller.component_infos().await;
    assert_eq!(infos.len(), 2);

    controller.close().await.unwrap();
}

#[tokio::test]
async fn scenario_4_unhealthy_dependency_keeps_downstream_on_last_good_value() {
    let mut controller = new_controller(Arc::new(AtomicUsize::new(0)));
    let document = Document::from_str(
        r#"
blocks:
  - type: flaky
    label: producer
    arguments:
      value: 10
      fail: false
  - type: sink
    label: consumer
    arguments:
      value: "flaky.producer.value"
"#,
    )
    .unwrap();
    controller.load(&document).await.unwrap();

    let infos = controller.component_infos().await;
    let consumer = infos.iter().find(|i| i.id == NodeId::parse("sink.consumer").unwrap()).unwrap();
    assert_eq!(consumer.exports["value"], 10);

    // Producer starts failing; its own node goes Unhealthy but keeps
    // exporting its last good value, so the consumer is unaffected.
    let failing = Document::from_str(
        r#"
blocks:
  - type: flaky
    label: producer
    arguments:
      value: 999
      fail: true
  - type: sink
    label: consumer
    arguments:
      value: "flaky.producer.value"
"#,
    )
    .unwrap();
    let report = controller.load(&failing).await.unwrap();
    assert!(report.accepted, "a single node's evaluation failure doesn't reject the whole load");

    let infos = controller.component_infos().await;
    let producer = infos.iter().find(|i| i.id == NodeId::parse("flaky.producer").unwrap()).unwrap();
    assert_eq!(producer.health.state, flowctl_core::health::HealthState::Unhealthy);
    assert_eq!(producer.exports["value"], 10, "exports must retain the last good value");

    let consumer = infos.iter().find(|i| i.id == NodeId::parse("sink.consumer").unwrap()).unwrap();
    assert_eq!(consumer.exports["value"], 10);
    assert_eq!(consumer.health.state, flowctl_core::health::HealthState::Healthy);

    // Producer recovers; consumer should see the new value within a tick.
    let recovered = Document::from_str(
        r#"
blocks:
  - type: flaky
    label: producer
    arguments:
      value: 20
      fail: false
  - type: sink
    label: consumer
    arguments:
      value: "flaky.producer.value"
"#,
    )
    .unwrap();
    controller.load(&recovered).await.unwrap();
    let infos = controller.component_infos().await;
    let consumer = infos.iter().find(|i| i.id == NodeId::parse("sink.consumer").unwrap()).unwrap();
    assert_eq!(consumer.exports["value"], 20);

    controller.close().await.unwrap();
}

#[tokio::test]
async fn scenario_5_burst_of_exports_changes_converges_to_the_final_value() {
    let mut controller = new_controller(Arc::new(AtomicUsize::new(0)));
    controller.load(&chain_document(0)).await.unwrap();

    let a = {
        // Not exposed publicly on Controller; drive through Document reloads
        // instead, which is the supported way to change a node's arguments
        // from outside the controller.
    };
    let _ = a;
    for i in 1..=1000 {
        controller.load(&chain_document(i)).await.unwrap();
    }

    let converged = wait_until(|| {
        futures::executor::block_on(async {
            let infos = controller.component_infos().await;
            infos.iter().any(|i| i.id == NodeId::parse("sink.b").unwrap() && i.exports["value"] == 1000)
        })
    })
    .await;
    assert!(converged, "burst of exports changes should quiesce at the final value");

    controller.close().await.unwrap();
}

#[tokio::test]
async fn scenario_6_close_during_active_evaluation_cancels_cleanly() {
    let mut controller = new_controller(Arc::new(AtomicUsize::new(0)));
    controller.load(&chain_document(1)).await.unwrap();
    controller.close().await.unwrap();

    let err = controller.close().await.unwrap_err();
    assert!(matches!(err, ControllerError::Fatal(_)));
}

#[tokio::test]
async fn empty_configuration_yields_zero_nodes_and_clean_close() {
    let mut controller = new_controller(Arc::new(AtomicUsize::new(0)));
    let report = controller.load(&Document::default()).await.unwrap();
    assert!(report.accepted);
    assert!(controller.component_infos().await.is_empty());
    controller.close().await.unwrap();
}

#[tokio::test]
async fn dangling_reference_in_a_reload_is_rejected_without_disturbing_survivors() {
    let mut controller = new_controller(Arc::new(AtomicUsize::new(0)));
    controller.load(&chain_document(1)).await.unwrap();

    let dangling = Document::from_str(
        r#"
blocks:
  - type: sink
    label: b
    arguments:
      value: "source.nonexistent.value"
"#,
    )
    .unwrap();
    let report = controller.load(&dangling).await.unwrap();
    assert!(!report.accepted);
    assert!(report.diagnostics.iter().any(|d| d.contains("unknown component")));

    let infos = controller.component_infos().await;
    assert_eq!(infos.len(), 2, "the previous, valid graph must still be live");

    controller.close().await.unwrap();
}
