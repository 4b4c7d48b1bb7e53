//! Component factories and the globals they're constructed with.
//!
//! A real agent binary registers one [`ComponentFactory`] per dotted
//! component type (`prometheus.scrape`, `discovery.kubernetes`, ...) before
//! starting the controller. The factory, the HTTP debug-page handler, and
//! the metrics registration surface are all external collaborators this
//! crate depends on only through the trait objects below — it never knows
//! what a `prometheus.scrape` component actually does.

use crate::component::{Component, ComponentNode};
use crate::id::NodeId;
use crate::schema::ComponentSchema;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Shared services every component instance is constructed with.
///
/// Cloned cheaply (an `Arc` bundle) and handed to each [`ComponentFactory`]
/// invocation; what's inside is opaque to the controller beyond this
/// struct's fields existing. The logging transport, metrics scope and debug
/// HTTP mux are all supplied by the agent binary, not this crate.
#[derive(Clone)]
pub struct Globals {
    /// Scratch directory a component instance may use for its own state,
    /// scoped under the agent's data path by node id.
    pub data_path: std::path::PathBuf,
    /// The address the agent's debug HTTP server listens on, for components
    /// that need to report it back to users (e.g. in their own exports).
    pub http_addr: Option<std::net::SocketAddr>,
    pub metrics: Arc<dyn MetricsScope>,
    pub http: Arc<dyn HttpHandler>,
    /// A tracing span scoped to this node; components should emit their own
    /// spans and events as children of it.
    pub logger: tracing::Span,
    /// Push a new exports value outside of `update`, e.g. from a background
    /// task in `run`. A no-op if the value is unchanged from what's already
    /// published.
    pub on_exports_change: Arc<dyn Fn(Value) + Send + Sync>,
    /// Register this node's own handler under the agent's debug HTTP mux.
    pub register_http_handler: Arc<dyn Fn(Arc<dyn HttpHandler>) + Send + Sync>,
}

/// The services shared across every node, before they're scoped to one.
///
/// Constructed once by the controller at startup; [`GlobalsBase::scoped`]
/// derives a per-node [`Globals`] bundle for each component instance the
/// loader constructs.
#[derive(Clone)]
pub struct GlobalsBase {
    pub data_path: std::path::PathBuf,
    pub http_addr: Option<std::net::SocketAddr>,
    pub metrics: Arc<dyn MetricsScope>,
    pub http: Arc<dyn HttpHandler>,
    /// Backing store for [`Controller::component_handler`](crate::controller::Controller::component_handler):
    /// every node's `register_http_handler` call lands here, keyed by its
    /// dotted id, so the controller can route `/component/{id}/...`
    /// requests without knowing anything about individual component types.
    pub handlers: Arc<Mutex<HashMap<String, Arc<dyn HttpHandler>>>>,
}

impl GlobalsBase {
    pub fn new(data_path: std::path::PathBuf, http_addr: Option<std::net::SocketAddr>, metrics: Arc<dyn MetricsScope>, http: Arc<dyn HttpHandler>) -> Self {
        Self { data_path, http_addr, metrics, http, handlers: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Build the `Globals` one node's component factory and instance will
    /// see: a data path scoped by node id, a metrics scope scoped by node
    /// id, a logger span scoped by node id, and an exports-change callback
    /// wired directly to `node`.
    pub fn scoped(&self, id: &NodeId, node: &Arc<ComponentNode>) -> Globals {
        let node_name = id.to_string();
        let handlers = self.handlers.clone();
        let register_key = node_name.clone();
        Globals {
            data_path: self.data_path.join(&node_name),
            http_addr: self.http_addr,
            metrics: self.metrics.scoped(&node_name),
            http: self.http.clone(),
            logger: tracing::info_span!("component", node = %node_name),
            on_exports_change: node.exports_setter(),
            register_http_handler: Arc::new(move |handler: Arc<dyn HttpHandler>| {
                handlers.lock().expect("handler registry mutex poisoned").insert(register_key.clone(), handler);
            }),
        }
    }

    /// Look up the debug handler a node registered, if any.
    pub fn handler_for(&self, node_name: &str) -> Option<Arc<dyn HttpHandler>> {
        self.handlers.lock().expect("handler registry mutex poisoned").get(node_name).cloned()
    }

    /// Drop a node's registered handler, if any. Called when a node is
    /// removed from the graph so `ComponentHandler` never routes to a
    /// since-removed component.
    pub fn forget(&self, node_name: &str) {
        self.handlers.lock().expect("handler registry mutex poisoned").remove(node_name);
    }
}

/// A namespace components register Prometheus-style metrics under.
///
/// The concrete registry (and what happens to the metrics afterward) is the
/// agent binary's concern; the controller only ever hands this trait object
/// to components.
pub trait MetricsScope: Send + Sync {
    /// A metrics namespace scoped to one node, e.g. for a registry prefixed
    /// with the node's dotted id.
    fn scoped(&self, node: &str) -> Arc<dyn MetricsScope>;
}

/// One component's slice of the agent's debug HTTP server.
///
/// Registered once per running node; the controller neither starts an HTTP
/// server nor dispatches requests to these handlers itself.
pub trait HttpHandler: Send + Sync {
    fn handle(&self, path: &str) -> String;
}

/// A [`MetricsScope`] that discards everything. Used as the
/// [`crate::controller::ControllerOptions`] default for callers that don't
/// care about metrics wiring (tests, `flowctl-cli` without `--metrics`).
pub struct NoopMetricsScope;

impl MetricsScope for NoopMetricsScope {
    fn scoped(&self, _node: &str) -> Arc<dyn MetricsScope> {
        Arc::new(NoopMetricsScope)
    }
}

/// An [`HttpHandler`] that answers every path with an empty body. The
/// `Controller`-level default; a real agent binary supplies its own.
pub struct NoopHttpHandler;

impl HttpHandler for NoopHttpHandler {
    fn handle(&self, _path: &str) -> String {
        String::new()
    }
}

/// Constructs a fresh [`Component`] instance for one node.
///
/// `args` has already been validated against the factory's
/// [`ComponentSchema`] by the time this is called.
pub type ComponentFactory =
    Arc<dyn Fn(Globals, Value) -> Result<Box<dyn Component>, String> + Send + Sync>;

/// One registered component type: its schema plus how to build an instance.
#[derive(Clone)]
pub struct Registration {
    pub schema: ComponentSchema,
    pub factory: ComponentFactory,
}

/// The set of component types a controller knows how to instantiate.
///
/// Populated once at startup by the agent binary; the [`loader`](crate::loader)
/// consults it to reject configuration blocks naming an unregistered type
/// before any graph mutation happens.
#[derive(Clone, Default)]
pub struct ComponentRegistry {
    registrations: HashMap<String, Registration>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, component_type: impl Into<String>, schema: ComponentSchema, factory: ComponentFactory) {
        self.registrations.insert(component_type.into(), Registration { schema, factory });
    }

    pub fn get(&self, component_type: &str) -> Option<&Registration> {
        self.registrations.get(component_type)
    }

    pub fn contains(&self, component_type: &str) -> bool {
        self.registrations.contains_key(component_type)
    }
}
