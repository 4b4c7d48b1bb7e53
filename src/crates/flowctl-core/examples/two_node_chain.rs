//! A minimal two-node chain: a source component that exports whatever
//! number it's given, and a sink that reads it by reference. Demonstrates
//! `Controller::load`, the resulting propagation, and `component_infos`.

use async_trait::async_trait;
use flowctl_core::component::{Component, RunContext};
use flowctl_core::controller::{Controller, ControllerOptions};
use flowctl_core::document::Document;
use flowctl_core::registry::{ComponentRegistry, GlobalsBase, HttpHandler, MetricsScope};
use flowctl_core::schema::{ComponentSchema, FieldKind, FieldSchema};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

struct Counter;

#[async_trait]
impl Component for Counter {
    async fn update(&self, args: Value) -> Result<Value, String> {
        Ok(args)
    }
    async fn run(&self, ctx: RunContext) -> Result<(), String> {
        ctx.cancellation.cancelled().await;
        Ok(())
    }
}

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

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let mut registry = ComponentRegistry::new();
    let mut args = BTreeMap::new();
    args.insert("value".to_string(), FieldSchema { kind: FieldKind::Any, required: false, default: Some(Value::Null) });
    registry.register(
        "counter",
        ComponentSchema { arguments: args, exports: BTreeMap::new() },
        Arc::new(|_globals, _args| Ok(Box::new(Counter) as Box<dyn Component>)),
    );

    let globals = GlobalsBase::new(std::env::temp_dir().join("two_node_chain"), None, Arc::new(NoopMetrics), Arc::new(NoopHttp));
    let mut controller = Controller::new(ControllerOptions { registry, globals });

    let document = Document::from_str(
        r#"
blocks:
  - type: counter
    label: source
    arguments:
      value: 1
  - type: counter
    label: sink
    arguments:
      value: "counter.source.value"
"#,
    )
    .expect("document parses");

    let report = controller.load(&document).await.expect("load did not hit a fatal error");
    println!("accepted: {}", report.accepted);
    for info in controller.component_infos().await {
        println!("{}: health={:?} exports={}", info.id, info.health.state, info.exports);
    }

    controller.close().await.expect("clean shutdown");
}
