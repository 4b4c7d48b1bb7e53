//! Turning a [`Document`] into a live [`Graph`] of [`ComponentNode`]s.
//!
//! The loader is the only subsystem that looks inside a [`Block`]. It:
//!
//! 1. diffs the document's blocks against the previous load's node set,
//! 2. derives edges from each block's [`Expr::Reference`] arguments,
//! 3. topologically evaluates every node whose arguments or dependencies
//!    changed, resolving references against dependency exports and binding
//!    the result against the component's schema before calling `update`.
//!
//! A full reconciliation ([`Loader::apply`]) never partially applies: if the
//! new document's derived graph contains a cycle, a duplicate label, or
//! references an unregistered component type, the previous graph and node
//! set are left untouched and every problem found is reported in the
//! returned [`LoadReport`] — not just the first.
//!
//! Incremental re-evaluation ([`Loader::evaluate_dependencies`]) only walks
//! one hop: the *direct* dependents of a changed node. A node whose own
//! exports change as a result enqueues itself again through the same
//! `on_exports_change` notifier that drove this pass, so a change still
//! propagates across the whole dependent chain — just one controller tick
//! per hop rather than one eager transitive sweep. That keeps a single
//! evaluation pass bounded by fan-out at one level instead of the size of
//! the whole reachable set.

use crate::component::ComponentNode;
use crate::document::{reference_target, Block, Document, Expr};
use crate::graph::Graph;
use crate::id::NodeId;
use crate::queue::Queue;
use crate::registry::{ComponentRegistry, GlobalsBase};
use crate::schema::bind;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// The outcome of a single [`Loader::apply`] call.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// `true` if the document was structurally valid and applied.
    pub accepted: bool,
    /// Parse/validation/evaluation problems, whether or not the load was
    /// accepted — evaluation failures of individual nodes still count as
    /// an accepted load, since they only make one node unhealthy.
    pub diagnostics: Vec<String>,
    /// Nodes added by this load.
    pub added: Vec<NodeId>,
    /// Nodes removed by this load.
    pub removed: Vec<NodeId>,
    /// Nodes (re-)evaluated by this load, in evaluation order.
    pub evaluated: Vec<NodeId>,
}

/// Owns the dependency graph and the live node set it was built from.
pub struct Loader {
    registry: ComponentRegistry,
    base: GlobalsBase,
    queue: Arc<Queue>,
    graph: Graph,
    nodes: HashMap<NodeId, Arc<ComponentNode>>,
    /// The block each node was most recently declared with, kept so
    /// `evaluate_dependencies` can re-resolve references without needing
    /// the whole document again.
    blocks: HashMap<NodeId, Block>,
}

impl Loader {
    pub fn new(registry: ComponentRegistry, base: GlobalsBase, queue: Arc<Queue>) -> Self {
        Self {
            registry,
            base,
            queue,
            graph: Graph::new(),
            nodes: HashMap::new(),
            blocks: HashMap::new(),
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn node(&self, id: &NodeId) -> Option<&Arc<ComponentNode>> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&NodeId, &Arc<ComponentNode>)> {
        self.nodes.iter()
    }

    /// Fully reconcile the live graph against `document`.
    ///
    /// On structural failure (unregistered type, duplicate label, cycle,
    /// dangling reference), the previous graph and node set are left
    /// entirely untouched and the report is marked not accepted, carrying
    /// every structural problem found rather than stopping at the first.
    pub async fn apply(&mut self, document: &Document) -> LoadReport {
        let mut report = LoadReport::default();

        let mut seen_ids = HashSet::new();
        let mut structurally_valid_ids = HashSet::new();
        for block in &document.blocks {
            let id = match NodeId::new(&block.component_type, &block.label) {
                Ok(id) => id,
                Err(e) => {
                    report.diagnostics.push(e.to_string());
                    continue;
                }
            };
            if !seen_ids.insert(id.clone()) {
                report.diagnostics.push(format!("duplicate component '{id}'"));
                continue;
            }
            if !self.registry.contains(&block.component_type) {
                report.diagnostics.push(format!("unregistered component type '{}'", block.component_type));
                continue;
            }
            structurally_valid_ids.insert(id);
        }

        if !report.diagnostics.is_empty() {
            return report;
        }

        let mut new_graph = Graph::new();
        for id in &structurally_valid_ids {
            new_graph.add_node(id.clone()).expect("ids are deduplicated above");
        }
        for block in &document.blocks {
            let id = NodeId::new(&block.component_type, &block.label).expect("validated above");
            for expr in block.arguments.values() {
                if let Expr::Reference(r) = expr {
                    if let Some((dep, _path)) = reference_target(r) {
                        if new_graph.add_edge(&dep, &id).is_err() {
                            report.diagnostics.push(format!("'{id}' references unknown component '{dep}'"));
                        }
                    }
                }
            }
        }

        if !report.diagnostics.is_empty() {
            return report;
        }

        let order = match new_graph.topological_sort() {
            Ok(order) => order,
            Err(e) => {
                report.diagnostics.push(e.to_string());
                return report;
            }
        };

        let previous_ids: HashSet<NodeId> = self.nodes.keys().cloned().collect();
        let removed: Vec<NodeId> = previous_ids.difference(&seen_ids).cloned().collect();
        let added: Vec<NodeId> = seen_ids.difference(&previous_ids).cloned().collect();

        // Stage the new node/block maps rather than mutating `self` in
        // place: a construction failure partway through must leave the
        // previous graph and node set completely untouched, the same
        // guarantee the checks above already give for a cycle or a
        // dangling reference. Retained nodes are carried over by `Arc`
        // clone, not reconstructed.
        let mut new_nodes: HashMap<NodeId, Arc<ComponentNode>> = HashMap::new();
        let mut new_blocks: HashMap<NodeId, Block> = HashMap::new();
        for block in &document.blocks {
            let id = NodeId::new(&block.component_type, &block.label).expect("validated above");
            new_blocks.insert(id.clone(), block.clone());
            if let Some(existing) = self.nodes.get(&id) {
                new_nodes.insert(id, existing.clone());
                continue;
            }
            match self.construct_node(&id, &block.component_type).await {
                Ok(node) => {
                    new_nodes.insert(id, node);
                }
                Err(e) => {
                    report.diagnostics.push(format!("'{id}' failed to construct: {e}"));
                }
            }
        }

        if !report.diagnostics.is_empty() {
            return report;
        }

        for id in &removed {
            self.base.forget(&id.to_string());
        }
        self.nodes = new_nodes;
        self.blocks = new_blocks;
        self.graph = new_graph;
        report.removed = removed;
        report.added = added;
        report.accepted = true;

        for id in order {
            self.evaluate_one(&id, &mut report).await;
        }
        report
    }

    /// Build a fresh `ComponentNode`, wire its exports-change notifier to
    /// this loader's queue, and run its component factory.
    ///
    /// Two-phase: `ComponentNode::new_uninit` exists before the factory
    /// runs, so the `Globals` handed to the factory can already carry a
    /// working exports setter that closes over this exact node.
    async fn construct_node(&self, id: &NodeId, component_type: &str) -> Result<Arc<ComponentNode>, String> {
        let queue = self.queue.clone();
        let enqueue_id = id.clone();
        let node = Arc::new(ComponentNode::new_uninit(
            id.clone(),
            Arc::new(move |changed: NodeId| {
                debug_assert_eq!(changed, enqueue_id);
                queue.enqueue(changed);
            }),
        ));

        let registration = self.registry.get(component_type).expect("checked by caller");
        let globals = self.base.scoped(id, &node);
        let instance = (registration.factory)(globals, Value::Null)?;
        node.install_instance(instance).await;
        Ok(node)
    }

    /// Re-evaluate the direct dependents of `changed`, in dependency order.
    /// Used after a component publishes new exports at runtime, rather than
    /// after a document reload. See the module docs for why this only
    /// walks one hop.
    pub async fn evaluate_dependencies(&mut self, changed: &NodeId) -> Vec<NodeId> {
        let affected = self.graph.dependents_of(changed);
        if affected.is_empty() {
            return Vec::new();
        }

        let order = match self.graph.topological_sort() {
            Ok(order) => order,
            Err(e) => {
                warn!(error = %e, "topological sort failed during incremental evaluation");
                return Vec::new();
            }
        };

        let mut report = LoadReport::default();
        for id in order {
            if affected.contains(&id) {
                self.evaluate_one(&id, &mut report).await;
            }
        }
        report.evaluated
    }

    /// Resolve `id`'s declared arguments against its dependencies' current
    /// exports, bind the result against the component's schema, and call
    /// `update`. Failures mark the node unhealthy but never abort the
    /// surrounding evaluation pass.
    async fn evaluate_one(&mut self, id: &NodeId, report: &mut LoadReport) {
        let Some(block) = self.blocks.get(id).cloned() else {
            return;
        };
        let Some(node) = self.nodes.get(id).cloned() else {
            return;
        };

        let mut resolved = serde_json::Map::new();
        for (key, expr) in &block.arguments {
            let value = match expr {
                Expr::Literal(v) => v.clone(),
                Expr::Reference(r) => match self.resolve_reference(r) {
                    Ok(v) => v,
                    Err(message) => {
                        node.set_eval_health(crate::health::Health::unhealthy(message.clone()));
                        report.diagnostics.push(format!("'{id}': {message}"));
                        report.evaluated.push(id.clone());
                        return;
                    }
                },
            };
            resolved.insert(key.clone(), value);
        }

        let raw = Value::Object(resolved);
        let bound = match self.registry.get(&block.component_type) {
            Some(registration) => match bind(&registration.schema, &raw) {
                Ok(bound) => bound,
                Err(e) => {
                    node.set_eval_health(crate::health::Health::unhealthy(e.to_string()));
                    report.diagnostics.push(format!("'{id}': {e}"));
                    report.evaluated.push(id.clone());
                    return;
                }
            },
            None => raw,
        };

        report.evaluated.push(id.clone());
        debug!(node = %id, "evaluating component arguments");

        if let Err(e) = node.update(bound).await {
            warn!(node = %id, error = %e, "component update failed");
            report.diagnostics.push(format!("'{id}': {e}"));
        }
    }

    fn resolve_reference(&self, expr: &str) -> Result<Value, String> {
        let (dep_id, path) = reference_target(expr).ok_or_else(|| format!("'{expr}' is not a valid reference"))?;
        let dep = self.nodes.get(&dep_id).ok_or_else(|| format!("reference to unknown component '{dep_id}'"))?;
        let exports = dep.current_exports();
        if path.is_empty() {
            return Ok((*exports).clone());
        }
        let mut cursor = &*exports;
        for segment in path.split('.') {
            cursor = cursor
                .get(segment)
                .ok_or_else(|| format!("export path '{path}' not found on '{dep_id}'"))?;
        }
        Ok(cursor.clone())
    }
}
