//! The `Component` trait and the live node wrapper around an instance.
//!
//! A component implementation is an external collaborator — this crate
//! defines the contract ([`Component`]) and the bookkeeping around one
//! running instance ([`ComponentNode`]), never a concrete component.

use crate::health::Health;
use crate::id::NodeId;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;

/// Context handed to a component's `run` for the lifetime of one worker task.
#[derive(Clone)]
pub struct RunContext {
    /// Cancelled when the node should shut down: it was removed from the
    /// configuration, or the controller is closing.
    pub cancellation: CancellationToken,
}

/// The behaviour every component type implements.
///
/// `update` is called synchronously during evaluation, with already
/// reference-resolved and schema-bound arguments; it must return quickly and
/// without blocking. `run` is spawned once per node onto its own task and is
/// expected to live for as long as the node exists, exiting only when
/// `ctx.cancellation` fires or it encounters an unrecoverable error.
///
/// Both methods take `&self`, not `&mut self`: `update` is called from the
/// loader's evaluation pass while `run` may already be under way on its own
/// task for the lifetime of the node, so the two must be safe to execute
/// concurrently on the same instance. An implementation with mutable state
/// holds it behind its own interior mutability (a `tokio::sync::Mutex`/
/// `RwLock`, an atomic, or a channel into whatever loop `run` drives) rather
/// than relying on the framework to serialize the two calls for it — the
/// framework only ever hands out a shared reference.
///
/// A component that wants to push exports changes that aren't driven by
/// `update` (a discovery component watching an external API, say) stashes
/// the `on_exports_change` closure handed to its factory in
/// [`Globals`](crate::registry::Globals) and calls it from within `run`.
#[async_trait]
pub trait Component: Send + Sync {
    /// Validate and act on a new set of arguments. Returns the component's
    /// exports, or an error message that marks the node `Unhealthy`. May be
    /// called while `run` is already in progress on another task.
    async fn update(&self, args: Value) -> Result<Value, String>;

    /// Run the component's background work until cancelled. A `run` that
    /// returns `Ok(())` or `Err` before cancellation marks the node
    /// `Exited`. May be called concurrently with `update`.
    async fn run(&self, ctx: RunContext) -> Result<(), String>;
}

/// The controller's live bookkeeping for one configured component.
///
/// Arguments and exports are stored behind a lock that is held only across
/// the pointer swap when a new value is published — readers clone an `Arc`
/// snapshot and never hold the lock during their own work.
///
/// Health is tracked as two independent values — `eval_health`, set by the
/// controller whenever it evaluates this node's arguments, and
/// `runtime_health`, set by the component's own `run` — and merged on read
/// per the data model's rule: `Unhealthy` from either source wins, `Exited`
/// is terminal. Keeping them separate means a node that is currently
/// `Unhealthy` from a bad argument can still later report `Exited` from its
/// `run` returning, without the reverse ever clobbering a terminal state.
///
/// The component instance is installed after construction rather than
/// passed to `new`: the loader needs a stable `Arc<ComponentNode>` to close
/// over in the `on_exports_change` notifier *before* the component factory
/// (which receives that notifier via `Globals`) has run.
///
/// `instance` is a `OnceCell`, not a `Mutex`, deliberately: once installed it
/// is read through a shared reference by both [`update`](Self::update) and
/// [`run`](Self::run), which must be callable concurrently with each other
/// (`run` is expected to stay in progress for as long as the node exists). A
/// `Mutex` held across `run`'s full lifetime would serialize every `update`
/// behind it for that whole time; a `OnceCell` gives both callers the same
/// `&dyn Component` without either blocking the other.
pub struct ComponentNode {
    id: NodeId,
    arguments: RwLock<Arc<Value>>,
    exports: RwLock<Arc<Value>>,
    eval_health: RwLock<Health>,
    runtime_health: RwLock<Health>,
    instance: tokio::sync::OnceCell<Box<dyn Component>>,
    on_exports_change: Arc<dyn Fn(NodeId) + Send + Sync>,
}

impl ComponentNode {
    /// Construct a node with no component instance installed yet.
    ///
    /// `on_exports_change` is invoked with this node's own id whenever its
    /// exports actually change (content-unequal to the previous value),
    /// whether from [`update`](Self::update) or from a background push
    /// through the [`Globals`](crate::registry::Globals)-provided setter.
    /// The loader wires it to `Queue::enqueue`.
    pub fn new_uninit(id: NodeId, on_exports_change: Arc<dyn Fn(NodeId) + Send + Sync>) -> Self {
        Self {
            id,
            arguments: RwLock::new(Arc::new(Value::Null)),
            exports: RwLock::new(Arc::new(Value::Null)),
            eval_health: RwLock::new(Health::unknown()),
            runtime_health: RwLock::new(Health::unknown()),
            instance: tokio::sync::OnceCell::new(),
            on_exports_change,
        }
    }

    /// Install the component instance the factory produced. Must be called
    /// exactly once, before this node's `update` or `run` is ever invoked.
    pub async fn install_instance(&self, instance: Box<dyn Component>) {
        if self.instance.set(instance).is_err() {
            panic!("install_instance called more than once for '{}'", self.id);
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn component_type(&self) -> &str {
        self.id.component_type()
    }

    pub fn label(&self) -> &str {
        self.id.label()
    }

    /// A lock-free snapshot of the current arguments.
    pub fn current_arguments(&self) -> Arc<Value> {
        self.arguments.read().expect("arguments lock poisoned").clone()
    }

    /// A lock-free snapshot of the current exports.
    pub fn current_exports(&self) -> Arc<Value> {
        self.exports.read().expect("exports lock poisoned").clone()
    }

    /// The merge of evaluation health and runtime health: `Unhealthy` from
    /// either source wins, `Exited` overrides both.
    pub fn current_health(&self) -> Health {
        let eval = self.eval_health.read().expect("health lock poisoned").clone();
        let runtime = self.runtime_health.read().expect("health lock poisoned").clone();
        Health::merge(&eval, &runtime)
    }

    pub fn set_eval_health(&self, health: Health) {
        *self.eval_health.write().expect("health lock poisoned") = health;
    }

    pub fn set_runtime_health(&self, health: Health) {
        *self.runtime_health.write().expect("health lock poisoned") = health;
    }

    fn publish_arguments(&self, args: Value) {
        *self.arguments.write().expect("arguments lock poisoned") = Arc::new(args);
    }

    /// Swap in `new_exports` and notify dependents, but only if the value
    /// actually differs from what's currently published — this is what
    /// keeps a node from re-enqueueing itself forever on an unchanged
    /// re-evaluation.
    fn publish_exports_if_changed(&self, new_exports: Value) {
        let mut guard = self.exports.write().expect("exports lock poisoned");
        if **guard == new_exports {
            return;
        }
        *guard = Arc::new(new_exports);
        drop(guard);
        (self.on_exports_change)(self.id.clone());
    }

    /// The setter a background `run` task uses to push exports that aren't
    /// the direct result of an `update` call. Bundled into
    /// [`Globals`](crate::registry::Globals) by the loader at construction.
    pub fn exports_setter(self: &Arc<Self>) -> Arc<dyn Fn(Value) + Send + Sync> {
        let node = Arc::clone(self);
        Arc::new(move |exports: Value| node.publish_exports_if_changed(exports))
    }

    /// Evaluate new arguments against the component instance. On success,
    /// publishes both the new arguments and the resulting exports and marks
    /// evaluation health healthy. On failure, arguments still publish (so
    /// references see what was *attempted*) but exports are left untouched
    /// and evaluation health is marked unhealthy — the
    /// dependency-keeps-last-export rule.
    pub async fn update(&self, args: Value) -> Result<(), String> {
        self.publish_arguments(args.clone());
        let instance = self.instance.get().expect("update called before install_instance");
        match instance.update(args).await {
            Ok(exports) => {
                self.publish_exports_if_changed(exports);
                self.set_eval_health(Health::healthy());
                Ok(())
            }
            Err(message) => {
                self.set_eval_health(Health::unhealthy(message.clone()));
                Err(message)
            }
        }
    }

    /// Run the component's background task to completion or cancellation.
    ///
    /// Reads `instance` through the same `OnceCell` [`update`](Self::update)
    /// does, so a long-running `run` never blocks a concurrent `update` (or
    /// vice versa) on a lock — see the field doc on [`ComponentNode`].
    pub async fn run(&self, ctx: RunContext) -> Result<(), String> {
        let instance = self.instance.get().expect("run called before install_instance");
        let result = instance.run(ctx).await;
        match &result {
            Ok(()) => self.set_runtime_health(Health::exited("component run() returned")),
            Err(message) => self.set_runtime_health(Health::exited(message.clone())),
        }
        result
    }
}
