//! Owns a worker task per live component and reconciles it across reloads.
//!
//! The [`Loader`](crate::loader::Loader) decides which nodes exist and what
//! arguments they hold; the [`Scheduler`] decides which of those nodes have
//! a running [`Component::run`](crate::component::Component::run) task. The
//! two are deliberately separate: a reload that only changes a node's
//! arguments must never restart its worker, so `Synchronize` diffs by
//! [`NodeId`] against the currently running set rather than reacting to
//! every `Loader::apply`.

use crate::component::{ComponentNode, RunContext};
use crate::error::ControllerError;
use crate::health::Health;
use crate::id::NodeId;
use futures::FutureExt;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

struct Worker {
    cancellation: CancellationToken,
    handle: JoinHandle<()>,
}

/// Diffs a desired node set against the running set and owns the resulting
/// worker tasks.
///
/// Every worker's [`RunContext`] carries a child of this scheduler's root
/// [`CancellationToken`], so [`Scheduler::close`] tears every worker down
/// with a single cancellation regardless of how many are running.
pub struct Scheduler {
    workers: HashMap<NodeId, Worker>,
    root: CancellationToken,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            workers: HashMap::new(),
            root: CancellationToken::new(),
        }
    }

    /// The set of nodes currently running a worker.
    pub fn running(&self) -> impl Iterator<Item = &NodeId> {
        self.workers.keys()
    }

    pub fn is_running(&self, id: &NodeId) -> bool {
        self.workers.contains_key(id)
    }

    /// Reconcile the running set against `desired`.
    ///
    /// - Nodes in `desired` but not currently running are started.
    /// - Nodes currently running but not in `desired` are cancelled and
    ///   awaited to completion before this call returns.
    /// - Nodes in both are left entirely untouched: their worker keeps
    ///   running against whatever arguments the loader has already
    ///   delivered via `Update`.
    ///
    /// Errors starting individual workers are aggregated and returned
    /// rather than aborting the rest of the reconciliation; the offending
    /// node is left not running (and thus `Exited` once its `ComponentNode`
    /// health is queried, since it was never started).
    pub async fn synchronize(
        &mut self,
        desired: &HashMap<NodeId, Arc<ComponentNode>>,
    ) -> Result<(), Vec<ControllerError>> {
        let desired_ids: HashSet<NodeId> = desired.keys().cloned().collect();
        let running_ids: HashSet<NodeId> = self.workers.keys().cloned().collect();

        for id in running_ids.difference(&desired_ids) {
            self.stop_one(id).await;
        }

        let mut errors = Vec::new();
        for id in desired_ids.difference(&running_ids) {
            let Some(node) = desired.get(id) else {
                errors.push(ControllerError::scheduler(id.clone(), "node vanished from desired set mid-synchronize"));
                continue;
            };
            self.start_one(id.clone(), node.clone());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn start_one(&mut self, id: NodeId, node: Arc<ComponentNode>) {
        let cancellation = self.root.child_token();
        let ctx = RunContext { cancellation: cancellation.clone() };
        let health_node = node.clone();
        let log_id = id.clone();

        info!(node = %log_id, "starting worker");
        let handle = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(node.run(ctx)).catch_unwind().await;
            if let Err(panic) = outcome {
                let message = panic_message(&panic);
                warn!(node = %log_id, message = %message, "worker panicked");
                health_node.set_runtime_health(Health::exited(format!("panicked: {message}")));
            }
        });

        self.workers.insert(id, Worker { cancellation, handle });
    }

    async fn stop_one(&mut self, id: &NodeId) {
        if let Some(worker) = self.workers.remove(id) {
            info!(node = %id, "stopping worker");
            worker.cancellation.cancel();
            let _ = worker.handle.await;
        }
    }

    /// Cancel every running worker, await all of them, and clear the
    /// running set. Calling this twice is safe: the second call simply has
    /// nothing left to stop.
    pub async fn close(&mut self) -> Result<(), Vec<ControllerError>> {
        self.root.cancel();
        let ids: Vec<NodeId> = self.workers.keys().cloned().collect();
        for id in ids {
            self.stop_one(&id).await;
        }
        Ok(())
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Component;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRun {
        starts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Component for CountingRun {
        async fn update(&self, args: Value) -> Result<Value, String> {
            Ok(args)
        }
        async fn run(&self, ctx: RunContext) -> Result<(), String> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            ctx.cancellation.cancelled().await;
            Ok(())
        }
    }

    struct Panics;
    #[async_trait]
    impl Component for Panics {
        async fn update(&self, args: Value) -> Result<Value, String> {
            Ok(args)
        }
        async fn run(&self, _ctx: RunContext) -> Result<(), String> {
            panic!("boom");
        }
    }

    async fn node_with(id: &str, instance: impl Component + 'static) -> Arc<ComponentNode> {
        let node = Arc::new(ComponentNode::new_uninit(NodeId::parse(id).unwrap(), Arc::new(|_| {})));
        node.install_instance(Box::new(instance)).await;
        node
    }

    #[tokio::test]
    async fn synchronize_starts_and_stops_workers() {
        let mut scheduler = Scheduler::new();
        let starts = Arc::new(AtomicUsize::new(0));
        let node = node_with("testing.a", CountingRun { starts: starts.clone() }).await;

        let mut desired = HashMap::new();
        desired.insert(NodeId::parse("testing.a").unwrap(), node.clone());
        scheduler.synchronize(&desired).await.unwrap();
        tokio::task::yield_now().await;
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert!(scheduler.is_running(&NodeId::parse("testing.a").unwrap()));

        scheduler.synchronize(&HashMap::new()).await.unwrap();
        assert!(!scheduler.is_running(&NodeId::parse("testing.a").unwrap()));
    }

    #[tokio::test]
    async fn retained_node_is_not_restarted() {
        let mut scheduler = Scheduler::new();
        let starts = Arc::new(AtomicUsize::new(0));
        let node = node_with("testing.a", CountingRun { starts: starts.clone() }).await;

        let mut desired = HashMap::new();
        desired.insert(NodeId::parse("testing.a").unwrap(), node.clone());
        scheduler.synchronize(&desired).await.unwrap();
        tokio::task::yield_now().await;

        // A no-op reload with the same node set.
        scheduler.synchronize(&desired).await.unwrap();
        tokio::task::yield_now().await;

        assert_eq!(starts.load(Ordering::SeqCst), 1);
        scheduler.close().await.unwrap();
    }

    #[tokio::test]
    async fn removed_node_worker_terminates_before_synchronize_returns() {
        let mut scheduler = Scheduler::new();
        let starts = Arc::new(AtomicUsize::new(0));
        let node = node_with("testing.a", CountingRun { starts }).await;

        let mut desired = HashMap::new();
        desired.insert(NodeId::parse("testing.a").unwrap(), node);
        scheduler.synchronize(&desired).await.unwrap();
        tokio::task::yield_now().await;

        scheduler.synchronize(&HashMap::new()).await.unwrap();
        assert!(!scheduler.is_running(&NodeId::parse("testing.a").unwrap()));
    }

    #[tokio::test]
    async fn panicking_worker_is_caught_and_marks_node_exited() {
        let mut scheduler = Scheduler::new();
        let node = node_with("testing.panicky", Panics).await;

        let mut desired = HashMap::new();
        desired.insert(NodeId::parse("testing.panicky").unwrap(), node.clone());
        scheduler.synchronize(&desired).await.unwrap();

        // Give the spawned task a chance to panic and report.
        for _ in 0..50 {
            if node.current_health().state == crate::health::HealthState::Exited {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(node.current_health().state, crate::health::HealthState::Exited);
        assert!(node.current_health().message.contains("boom"));

        // The panic must not have torn the scheduler down.
        scheduler.synchronize(&HashMap::new()).await.unwrap();
    }

    #[tokio::test]
    async fn close_is_idempotent_and_stops_all_workers() {
        let mut scheduler = Scheduler::new();
        let starts = Arc::new(AtomicUsize::new(0));
        let a = node_with("testing.a", CountingRun { starts: starts.clone() }).await;
        let b = node_with("testing.b", CountingRun { starts }).await;

        let mut desired = HashMap::new();
        desired.insert(NodeId::parse("testing.a").unwrap(), a);
        desired.insert(NodeId::parse("testing.b").unwrap(), b);
        scheduler.synchronize(&desired).await.unwrap();
        tokio::task::yield_now().await;

        scheduler.close().await.unwrap();
        assert_eq!(scheduler.running().count(), 0);
        scheduler.close().await.unwrap();
    }
}
