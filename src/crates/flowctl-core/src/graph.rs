//! The component dependency graph.
//!
//! A [`Graph`] holds one node per configured component and one edge per
//! detected reference from one component's arguments to another's exports.
//! Edges are *derived*, never declared directly: [`Loader`](crate::loader::Loader)
//! rebuilds them from expression references each time a block's arguments are
//! re-evaluated. The graph itself only knows about [`NodeId`]s and the arrows
//! between them — it never looks inside a component.
//!
//! # Evaluation order
//!
//! Components must be evaluated in an order where every node's dependencies
//! are evaluated before the node itself. [`Graph::topological_sort`] produces
//! that order, or fails with [`GraphError::CycleDetected`] carrying one
//! concrete cycle for the caller to report.

use crate::id::NodeId;
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;

/// Errors produced by graph structural operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("node '{0}' already exists")]
    DuplicateNode(NodeId),

    #[error("node '{0}' does not exist")]
    UnknownNode(NodeId),

    #[error("edge '{from}' -> '{to}' references an unknown node")]
    DanglingEdge { from: NodeId, to: NodeId },

    #[error("dependency cycle detected: {}", cycle.iter().map(ToString::to_string).collect::<Vec<_>>().join(" -> "))]
    CycleDetected { cycle: Vec<String> },
}

/// The dependency graph over a controller's live component set.
///
/// Nodes are added and removed as the configuration is reconciled; edges are
/// recomputed wholesale by the loader on every full `apply`, and
/// incrementally for a single node by `evaluate_dependencies`.
#[derive(Debug, Default, Clone)]
pub struct Graph {
    nodes: HashSet<NodeId>,
    /// `from -> {to}`: `from`'s exports are read by every node in the set.
    forward: HashMap<NodeId, HashSet<NodeId>>,
    /// `to -> {from}`: `to`'s arguments reference every node in the set.
    reverse: HashMap<NodeId, HashSet<NodeId>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new node. Errors if the id is already present.
    pub fn add_node(&mut self, id: NodeId) -> Result<(), GraphError> {
        if self.nodes.contains(&id) {
            return Err(GraphError::DuplicateNode(id));
        }
        self.nodes.insert(id.clone());
        self.forward.entry(id.clone()).or_default();
        self.reverse.entry(id).or_default();
        Ok(())
    }

    /// Remove a node and every edge touching it.
    pub fn remove_node(&mut self, id: &NodeId) -> Result<(), GraphError> {
        if !self.nodes.remove(id) {
            return Err(GraphError::UnknownNode(id.clone()));
        }
        if let Some(downstream) = self.forward.remove(id) {
            for to in downstream {
                if let Some(set) = self.reverse.get_mut(&to) {
                    set.remove(id);
                }
            }
        }
        if let Some(upstream) = self.reverse.remove(id) {
            for from in upstream {
                if let Some(set) = self.forward.get_mut(&from) {
                    set.remove(id);
                }
            }
        }
        Ok(())
    }

    /// Look up a node by id without mutating the graph.
    pub fn get_by_id(&self, id: &NodeId) -> Option<&NodeId> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.iter()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// All `(from, to)` edges currently recorded, in no particular order.
    pub fn edges(&self) -> Vec<(NodeId, NodeId)> {
        self.forward
            .iter()
            .flat_map(|(from, tos)| tos.iter().map(move |to| (from.clone(), to.clone())))
            .collect()
    }

    /// Record that `to` depends on `from` (reads `from`'s exports).
    pub fn add_edge(&mut self, from: &NodeId, to: &NodeId) -> Result<(), GraphError> {
        if !self.nodes.contains(from) {
            return Err(GraphError::DanglingEdge { from: from.clone(), to: to.clone() });
        }
        if !self.nodes.contains(to) {
            return Err(GraphError::DanglingEdge { from: from.clone(), to: to.clone() });
        }
        self.forward.entry(from.clone()).or_default().insert(to.clone());
        self.reverse.entry(to.clone()).or_default().insert(from.clone());
        Ok(())
    }

    pub fn remove_edge(&mut self, from: &NodeId, to: &NodeId) {
        if let Some(set) = self.forward.get_mut(from) {
            set.remove(to);
        }
        if let Some(set) = self.reverse.get_mut(to) {
            set.remove(from);
        }
    }

    /// Replace all of `node`'s incoming edges (its dependencies) with `deps`.
    /// Used by the loader after re-evaluating a single node's arguments.
    pub fn set_dependencies(&mut self, node: &NodeId, deps: HashSet<NodeId>) -> Result<(), GraphError> {
        if !self.nodes.contains(node) {
            return Err(GraphError::UnknownNode(node.clone()));
        }
        for dep in &deps {
            if !self.nodes.contains(dep) {
                return Err(GraphError::DanglingEdge { from: dep.clone(), to: node.clone() });
            }
        }
        let old = self.reverse.insert(node.clone(), deps.clone()).unwrap_or_default();
        for from in old.difference(&deps) {
            if let Some(set) = self.forward.get_mut(from) {
                set.remove(node);
            }
        }
        for from in deps.difference(&old) {
            self.forward.entry(from.clone()).or_default().insert(node.clone());
        }
        Ok(())
    }

    /// Nodes with no dependents — leaves of the forward edge relation.
    pub fn leaves(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| self.forward.get(*n).map_or(true, |s| s.is_empty()))
            .cloned()
            .collect()
    }

    /// Direct dependencies of `node` (nodes whose exports `node` reads).
    pub fn dependencies_of(&self, node: &NodeId) -> HashSet<NodeId> {
        self.reverse.get(node).cloned().unwrap_or_default()
    }

    /// Direct dependents of `node` (nodes that read `node`'s exports).
    pub fn dependents_of(&self, node: &NodeId) -> HashSet<NodeId> {
        self.forward.get(node).cloned().unwrap_or_default()
    }

    /// A dependency-respecting evaluation order: every node appears after
    /// all the nodes it depends on. Kahn's algorithm over the reverse
    /// (dependency) edges, with ties broken by `NodeId` ordering so the
    /// result is deterministic across runs with the same graph.
    pub fn topological_sort(&self) -> Result<Vec<NodeId>, GraphError> {
        let mut in_degree: HashMap<&NodeId, usize> = self
            .nodes
            .iter()
            .map(|n| (n, self.reverse.get(n).map_or(0, |s| s.len())))
            .collect();

        let mut ready: Vec<&NodeId> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(n, _)| *n)
            .collect();
        ready.sort();
        let mut queue: VecDeque<&NodeId> = ready.into();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(n) = queue.pop_front() {
            order.push(n.clone());
            let mut unblocked: Vec<&NodeId> = Vec::new();
            if let Some(dependents) = self.forward.get(n) {
                for dependent in dependents {
                    if let Some(deg) = in_degree.get_mut(dependent) {
                        *deg -= 1;
                        if *deg == 0 {
                            unblocked.push(dependent);
                        }
                    }
                }
            }
            unblocked.sort();
            for n in unblocked {
                queue.push_back(n);
            }
        }

        if order.len() != self.nodes.len() {
            let cycle = self.find_cycle(&order);
            return Err(GraphError::CycleDetected {
                cycle: cycle.iter().map(|n| n.to_string()).collect(),
            });
        }
        Ok(order)
    }

    /// Find one concrete cycle among the nodes not covered by a partial
    /// topological order. Depth-first walk from any unresolved node,
    /// tracking the path stack; a repeated node closes the cycle.
    fn find_cycle(&self, resolved: &[NodeId]) -> Vec<NodeId> {
        let resolved: HashSet<&NodeId> = resolved.iter().collect();
        let remaining: Vec<&NodeId> = self.nodes.iter().filter(|n| !resolved.contains(*n)).collect();
        let Some(&start) = remaining.first() else {
            return Vec::new();
        };

        let mut path: Vec<NodeId> = vec![start.clone()];
        let mut current = start;
        loop {
            let deps = self.reverse.get(current);
            let next = deps
                .into_iter()
                .flatten()
                .find(|d| !resolved.contains(*d))
                .expect("unresolved node in a cycle must have an unresolved dependency");
            if let Some(pos) = path.iter().position(|n| n == next) {
                path.push(next.clone());
                return path[pos..].to_vec();
            }
            path.push(next.clone());
            current = next;
        }
    }

    /// Every node reachable by following dependents transitively from
    /// `from` (inclusive). This is the forward-propagation set: everything
    /// that must be re-evaluated after `from`'s exports change.
    pub fn reachable(&self, from: &NodeId) -> HashSet<NodeId> {
        let mut seen = HashSet::new();
        let mut stack = vec![from.clone()];
        while let Some(n) = stack.pop() {
            if !seen.insert(n.clone()) {
                continue;
            }
            if let Some(dependents) = self.forward.get(&n) {
                for d in dependents {
                    if !seen.contains(d) {
                        stack.push(d.clone());
                    }
                }
            }
        }
        seen
    }

    /// Render the graph as Graphviz `dot` for debugging and documentation.
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph flowctl {\n");
        let mut nodes: Vec<&NodeId> = self.nodes.iter().collect();
        nodes.sort();
        for n in &nodes {
            out.push_str(&format!("  \"{n}\";\n"));
        }
        let mut edges = self.edges();
        edges.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
        for (from, to) in edges {
            out.push_str(&format!("  \"{from}\" -> \"{to}\";\n"));
        }
        out.push_str("}\n");
        out
    }
}
