//! Render a small configuration's dependency graph as Graphviz `dot`.
//!
//! Run with `cargo run --example visualize_dot | dot -Tpng -o graph.png`.

use async_trait::async_trait;
use flowctl_core::component::{Component, RunContext};
use flowctl_core::controller::{Controller, ControllerOptions};
use flowctl_core::document::Document;
use flowctl_core::registry::{ComponentRegistry, GlobalsBase, HttpHandler, MetricsScope};
use flowctl_core::schema::{ComponentSchema, FieldKind, FieldSchema};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

struct Passthrough;

#[async_trait]
impl Component for Passthrough {
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
    let mut with_input = BTreeMap::new();
    with_input.insert("input".to_string(), FieldSchema { kind: FieldKind::Any, required: false, default: Some(Value::Null) });

    let mut registry = ComponentRegistry::new();
    registry.register(
        "discovery",
        ComponentSchema::default(),
        Arc::new(|_globals, _args| Ok(Box::new(Passthrough) as Box<dyn Component>)),
    );
    for ty in ["relabel", "remote"] {
        registry.register(
            ty,
            ComponentSchema { arguments: with_input.clone(), exports: BTreeMap::new() },
            Arc::new(|_globals, _args| Ok(Box::new(Passthrough) as Box<dyn Component>)),
        );
    }

    let globals = GlobalsBase::new(std::env::temp_dir().join("visualize_dot"), None, Arc::new(NoopMetrics), Arc::new(NoopHttp));
    let mut controller = Controller::new(ControllerOptions { registry, globals });

    let document = Document::from_str(
        r#"
blocks:
  - type: discovery
    label: pods
  - type: relabel
    label: filter
    arguments:
      input: "discovery.pods"
  - type: remote
    label: write
    arguments:
      input: "relabel.filter"
"#,
    )
    .expect("document parses");

    controller.load(&document).await.expect("load did not hit a fatal error");
    print!("{}", controller.graph_dot().await);
    controller.close().await.expect("clean shutdown");
}
