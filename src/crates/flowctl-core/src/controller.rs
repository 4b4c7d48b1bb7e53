//! The top-level binding of graph, queue, loader and scheduler.
//!
//! [`Controller`] is the only piece of this crate an agent binary talks to
//! directly (see `flowctl-cli`). It owns a background task — the
//! "controller event loop" of spec §4.6 — that reacts to the [`Queue`]
//! whenever a running component pushes new exports, re-evaluating exactly
//! the nodes downstream of the change. Configuration reloads
//! ([`Controller::load_file`]) and worker reconciliation
//! ([`Scheduler::synchronize`]) are driven directly from the calling task
//! rather than funneled through that same loop: both already take the
//! [`Loader`]'s own mutex for the duration of the mutation, which gives the
//! same single-writer guarantee spec §5 asks for ("the Graph is
//! single-writer") without needing a second hop through a channel, and it
//! keeps `load_file`'s result (including whether workers actually started)
//! observable the moment it returns rather than on some later loop tick.
//! This is recorded as an intentional simplification in `DESIGN.md`.

use crate::component::ComponentNode;
use crate::document::Document;
use crate::error::{ControllerError, Result};
use crate::health::Health;
use crate::id::NodeId;
use crate::loader::{LoadReport, Loader};
use crate::queue::Queue;
use crate::registry::{ComponentRegistry, GlobalsBase, HttpHandler};
use crate::scheduler::Scheduler;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Construction-time configuration for a [`Controller`].
#[derive(Clone)]
pub struct ControllerOptions {
    pub registry: ComponentRegistry,
    pub globals: GlobalsBase,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            registry: ComponentRegistry::new(),
            globals: GlobalsBase::new(
                std::env::temp_dir().join("flowctl"),
                None,
                Arc::new(crate::registry::NoopMetricsScope),
                Arc::new(crate::registry::NoopHttpHandler),
            ),
        }
    }
}

/// One row of [`Controller::component_infos`]'s report.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ComponentInfo {
    pub id: NodeId,
    pub component_type: String,
    pub label: String,
    /// Direct dependencies: nodes whose exports this node's arguments read.
    pub references: Vec<NodeId>,
    /// Direct dependents: nodes that read this node's exports.
    pub referenced_by: Vec<NodeId>,
    pub health: Health,
    pub arguments: Value,
    pub exports: Value,
}

/// Routes `/component/{id}/...` requests to the handler a component
/// registered through its [`Globals::register_http_handler`](crate::registry::Globals).
///
/// A thin dispatch-by-prefix layer, not a server: binding a socket and
/// driving an actual HTTP stack is the agent binary's job (spec §1 puts
/// "the HTTP debug server" out of scope), this only answers "which
/// component owns this path, and what does it say".
#[derive(Clone)]
pub struct ComponentRouter {
    globals: GlobalsBase,
}

impl ComponentRouter {
    /// Route `path` (expected to start with `/component/<id>/`) to the
    /// named component's registered handler. Returns `None` if the prefix
    /// doesn't match a live, handler-registering component.
    pub fn route(&self, path: &str) -> Option<String> {
        let rest = path.strip_prefix("/component/")?;
        let (node_id, sub_path) = rest.split_once('/').unwrap_or((rest, ""));
        let handler = self.globals.handler_for(node_id)?;
        Some(handler.handle(sub_path))
    }
}

/// The component-graph controller: owns the [`Loader`]/[`Graph`](crate::graph::Graph),
/// the [`Queue`], and the [`Scheduler`], and runs the event loop that keeps
/// them converging as components push exports changes.
pub struct Controller {
    loader: Arc<AsyncMutex<Loader>>,
    scheduler: Arc<AsyncMutex<Scheduler>>,
    queue: Arc<Queue>,
    globals: GlobalsBase,
    cancellation: CancellationToken,
    loop_handle: Option<JoinHandle<()>>,
    first_load_done: Arc<AtomicBool>,
    closed: AtomicBool,
}

impl Controller {
    /// Construct a controller and start its background event loop. No
    /// configuration is loaded and no workers run until
    /// [`Controller::load_file`] is called.
    pub fn new(options: ControllerOptions) -> Self {
        let queue = Arc::new(Queue::new());
        let loader = Arc::new(AsyncMutex::new(Loader::new(options.registry, options.globals.clone(), queue.clone())));
        let scheduler = Arc::new(AsyncMutex::new(Scheduler::new()));
        let cancellation = CancellationToken::new();

        let loop_handle = Some(tokio::spawn(Self::event_loop(
            loader.clone(),
            queue.clone(),
            cancellation.clone(),
        )));

        Self {
            loader,
            scheduler,
            queue,
            globals: options.globals,
            cancellation,
            loop_handle,
            first_load_done: Arc::new(AtomicBool::new(false)),
            closed: AtomicBool::new(false),
        }
    }

    /// The controller event loop: wait for either a queue notification or
    /// cancellation, and on a notification drain the whole coalesced batch
    /// before re-evaluating — so a burst of pushes from one producer costs
    /// one evaluation pass per downstream hop, not one per push.
    async fn event_loop(loader: Arc<AsyncMutex<Loader>>, queue: Arc<Queue>, cancellation: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    info!("controller event loop shutting down");
                    return;
                }
                _ = queue.notified() => {
                    let batch = queue.drain();
                    if batch.is_empty() {
                        continue;
                    }
                    let mut loader = loader.lock().await;
                    for node in &batch {
                        let evaluated = loader.evaluate_dependencies(node).await;
                        if !evaluated.is_empty() {
                            tracing::debug!(changed = %node, downstream = evaluated.len(), "propagated exports change");
                        }
                    }
                }
            }
        }
    }

    /// Read a document from `path` and fully reconcile the graph against
    /// it (see [`Loader::apply`]), then reconcile the scheduler's running
    /// workers against the resulting node set.
    ///
    /// On a first-ever load that fails structurally, no workers are
    /// started — the node set stays empty, so there is nothing for
    /// `Scheduler::synchronize` to start. On a later failed reload the
    /// previous graph and worker set are left completely undisturbed;
    /// `report.accepted` is `false` but the call still returns `Ok`, since
    /// only the diagnostics — not a hard error — resulted.
    pub async fn load_file(&self, path: impl AsRef<Path>) -> Result<LoadReport> {
        let document = Document::from_file(path)?;
        self.load(&document).await
    }

    /// As [`Controller::load_file`], but from an already-parsed [`Document`]
    /// rather than a path — what `flowctl-cli` uses after reading a file
    /// once, and what tests use directly.
    pub async fn load(&self, document: &Document) -> Result<LoadReport> {
        let report = {
            let mut loader = self.loader.lock().await;
            loader.apply(document).await
        };

        if report.accepted {
            self.first_load_done.store(true, Ordering::SeqCst);
            let desired: HashMap<NodeId, Arc<ComponentNode>> = {
                let loader = self.loader.lock().await;
                loader.nodes().map(|(id, node)| (id.clone(), node.clone())).collect()
            };
            let mut scheduler = self.scheduler.lock().await;
            if let Err(errors) = scheduler.synchronize(&desired).await {
                for e in &errors {
                    warn!(error = %e, "scheduler failed to start a worker");
                }
            }
        } else {
            warn!(diagnostics = ?report.diagnostics, "load rejected");
        }

        Ok(report)
    }

    /// A snapshot of every live component: its id, type/label, direct
    /// references in both directions, merged health, and current
    /// arguments/exports. Equal to the pre-reload snapshot after a
    /// no-op reload, save for health timestamps.
    pub async fn component_infos(&self) -> Vec<ComponentInfo> {
        let loader = self.loader.lock().await;
        let graph = loader.graph();
        let mut infos: Vec<ComponentInfo> = loader
            .nodes()
            .map(|(id, node)| ComponentInfo {
                id: id.clone(),
                component_type: node.component_type().to_string(),
                label: node.label().to_string(),
                references: graph.dependencies_of(id).into_iter().collect(),
                referenced_by: graph.dependents_of(id).into_iter().collect(),
                health: node.current_health(),
                arguments: (*node.current_arguments()).clone(),
                exports: (*node.current_exports()).clone(),
            })
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// An HTTP multiplexer-style router over every running component's
    /// self-registered debug handler.
    pub fn component_handler(&self) -> ComponentRouter {
        ComponentRouter { globals: self.globals.clone() }
    }

    /// Render the current dependency graph as Graphviz `dot`, for
    /// `flowctl dot` and other operator-facing introspection.
    pub async fn graph_dot(&self) -> String {
        self.loader.lock().await.graph().to_dot()
    }

    /// Stop the event loop, cancel every running worker, and await their
    /// exit. Calling this a second time is a [`ControllerError::Fatal`]:
    /// spec §7 treats a double close as a broken controller invariant,
    /// not a recoverable error.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(ControllerError::Fatal("Controller::close called twice".to_string()));
        }

        self.cancellation.cancel();
        if let Some(handle) = self.loop_handle.take() {
            let _ = handle.await;
        }

        let mut scheduler = self.scheduler.lock().await;
        if let Err(errors) = scheduler.close().await {
            let message = errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ");
            return Err(ControllerError::Fatal(format!("errors while closing scheduler: {message}")));
        }
        Ok(())
    }

    /// Whether at least one `load_file`/`load` call has ever been accepted.
    pub fn has_completed_first_load(&self) -> bool {
        self.first_load_done.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{Component, RunContext};
    use crate::registry::{ComponentRegistry, MetricsScope};
    use crate::schema::{ComponentSchema, FieldKind, FieldSchema};
    use async_trait::async_trait;
    use std::collections::BTreeMap;

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

    struct Echo;
    #[async_trait]
    impl Component for Echo {
        async fn update(&self, args: Value) -> Result<Value, String> {
            Ok(args)
        }
        async fn run(&self, ctx: RunContext) -> Result<(), String> {
            ctx.cancellation.cancelled().await;
            Ok(())
        }
    }

    struct DebugHandler(String);
    impl HttpHandler for DebugHandler {
        fn handle(&self, path: &str) -> String {
            format!("{}:{}", self.0, path)
        }
    }

    struct SelfRegistering;
    #[async_trait]
    impl Component for SelfRegistering {
        async fn update(&self, args: Value) -> Result<Value, String> {
            Ok(args)
        }
        async fn run(&self, ctx: RunContext) -> Result<(), String> {
            ctx.cancellation.cancelled().await;
            Ok(())
        }
    }

    fn options_with_echo_and_sink() -> ControllerOptions {
        let mut registry = ComponentRegistry::new();
        let mut args = BTreeMap::new();
        args.insert("value".to_string(), FieldSchema { kind: FieldKind::Any, required: false, default: Some(Value::Null) });
        registry.register(
            "source",
            ComponentSchema { arguments: args.clone(), exports: BTreeMap::new() },
            Arc::new(|_g, _a| Ok(Box::new(Echo) as Box<dyn Component>)),
        );
        registry.register(
            "sink",
            ComponentSchema { arguments: args, exports: BTreeMap::new() },
            Arc::new(|_g, _a| Ok(Box::new(Echo) as Box<dyn Component>)),
        );
        ControllerOptions {
            registry,
            globals: GlobalsBase::new(std::path::PathBuf::from("/tmp"), None, Arc::new(NoopMetrics), Arc::new(NoopHttp)),
        }
    }

    fn chain_document() -> Document {
        Document::from_str(
            r#"
blocks:
  - type: source
    label: a
    arguments:
      value: 1
  - type: sink
    label: b
    arguments:
      value: "source.a.value"
"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn load_starts_workers_and_component_infos_reports_them() {
        let mut controller = Controller::new(options_with_echo_and_sink());
        let report = controller.load(&chain_document()).await.unwrap();
        assert!(report.accepted);

        let infos = controller.component_infos().await;
        assert_eq!(infos.len(), 2);
        let b = infos.iter().find(|i| i.id == NodeId::parse("sink.b").unwrap()).unwrap();
        assert_eq!(b.references, vec![NodeId::parse("source.a").unwrap()]);
        assert_eq!(b.exports, serde_json::json!({ "value": 1 }));

        controller.close().await.unwrap();
    }

    #[tokio::test]
    async fn first_failed_load_starts_no_workers() {
        let mut controller = Controller::new(options_with_echo_and_sink());
        let bad = Document::from_str("blocks:\n  - type: nonexistent\n    label: a\n").unwrap();
        let report = controller.load(&bad).await.unwrap();
        assert!(!report.accepted);
        assert!(!controller.has_completed_first_load());
        assert!(controller.component_infos().await.is_empty());
        controller.close().await.unwrap();
    }

    #[tokio::test]
    async fn later_failed_reload_leaves_previous_workers_running() {
        let mut controller = Controller::new(options_with_echo_and_sink());
        controller.load(&chain_document()).await.unwrap();
        assert!(controller.has_completed_first_load());

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
        assert_eq!(controller.component_infos().await.len(), 2);
        controller.close().await.unwrap();
    }

    #[tokio::test]
    async fn closing_twice_is_fatal() {
        let mut controller = Controller::new(options_with_echo_and_sink());
        controller.close().await.unwrap();
        let err = controller.close().await.unwrap_err();
        assert!(matches!(err, ControllerError::Fatal(_)));
    }

    #[tokio::test]
    async fn exports_change_propagates_to_dependent_within_one_tick() {
        let mut controller = Controller::new(options_with_echo_and_sink());
        controller.load(&chain_document()).await.unwrap();

        let a = {
            let loader = controller.loader.lock().await;
            loader.node(&NodeId::parse("source.a").unwrap()).unwrap().clone()
        };
        a.update(serde_json::json!({ "value": 42 })).await.unwrap();

        let mut converged = false;
        for _ in 0..200 {
            let infos = controller.component_infos().await;
            let b = infos.iter().find(|i| i.id == NodeId::parse("sink.b").unwrap()).unwrap();
            if b.exports == serde_json::json!({ "value": 42 }) {
                converged = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(converged, "dependent never observed the new export");
        controller.close().await.unwrap();
    }

    #[tokio::test]
    async fn component_handler_routes_to_registered_debug_handler() {
        let mut registry = ComponentRegistry::new();
        registry.register(
            "testing",
            ComponentSchema::default(),
            Arc::new(move |globals, _args| {
                (globals.register_http_handler)(Arc::new(DebugHandler("hello".to_string())));
                Ok(Box::new(SelfRegistering) as Box<dyn Component>)
            }),
        );

        let globals = GlobalsBase::new(std::path::PathBuf::from("/tmp"), None, Arc::new(NoopMetrics), Arc::new(NoopHttp));
        let mut controller = Controller::new(ControllerOptions { registry, globals });
        let doc = Document::from_str("blocks:\n  - type: testing\n    label: handler\n").unwrap();
        let report = controller.load(&doc).await.unwrap();
        assert!(report.accepted);

        let router = controller.component_handler();
        let response = router.route("/component/testing.handler/status");
        assert_eq!(response, Some("hello:status".to_string()));
        assert_eq!(router.route("/component/unknown.node/status"), None);

        controller.close().await.unwrap();
    }
}
