//! The update-propagation queue.
//!
//! Edge-triggered work arrives faster than the controller can usefully
//! react to it: a single upstream export change can fan out to dozens of
//! dependents, and a flapping component can enqueue the same node hundreds
//! of times a second. [`Queue`] coalesces all of that into a set bounded by
//! the number of nodes in the graph — enqueuing an already-pending node is a
//! no-op — and wakes exactly one waiter per non-empty transition via a
//! [`tokio::sync::Notify`].

use crate::id::NodeId;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::Notify;

/// A coalescing, edge-triggered queue of nodes awaiting re-evaluation.
///
/// Enqueuing preserves first-seen order: a node re-enqueued while already
/// pending keeps its original position rather than moving to the back.
pub struct Queue {
    inner: Mutex<Inner>,
    notify: Notify,
}

struct Inner {
    order: VecDeque<NodeId>,
    pending: std::collections::HashSet<NodeId>,
}

impl Queue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                order: VecDeque::new(),
                pending: std::collections::HashSet::new(),
            }),
            notify: Notify::new(),
        }
    }

    /// Add `node` to the pending set. No-op if already pending.
    pub fn enqueue(&self, node: NodeId) {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        if inner.pending.insert(node.clone()) {
            inner.order.push_back(node);
            drop(inner);
            self.notify.notify_one();
        }
    }

    /// Add every node in `nodes` to the pending set.
    pub fn enqueue_all(&self, nodes: impl IntoIterator<Item = NodeId>) {
        for n in nodes {
            self.enqueue(n);
        }
    }

    /// Remove and return the earliest-enqueued pending node, or `None` if
    /// the queue is empty. Never blocks.
    pub fn try_dequeue(&self) -> Option<NodeId> {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        let node = inner.order.pop_front()?;
        inner.pending.remove(&node);
        Some(node)
    }

    /// Drain every currently pending node in enqueue order. Used by the
    /// controller to pull a whole coalesced batch before one evaluation
    /// pass, rather than looping `try_dequeue` node by node.
    pub fn drain(&self) -> Vec<NodeId> {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        inner.pending.clear();
        inner.order.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().expect("queue mutex poisoned").order.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("queue mutex poisoned").order.len()
    }

    /// Wait until the queue transitions from empty to non-empty.
    ///
    /// Races against `enqueue` are handled by `Notify`'s permit: a
    /// notification sent before `notified()` is polled is not lost, it is
    /// held as a single permit that the next `notified().await` consumes.
    pub async fn notified(&self) {
        self.notify.notified().await
    }
}

impl Default for Queue {
    fn default() -> Self {
        Self::new()
    }
}
