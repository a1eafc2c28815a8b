//! ExecutionTreeManager - shared tree of decisions across runs
//!
//! # Protocol
//!
//! One atomic word publishes where the next decision happens:
//!
//! ```text
//!           swap(LOCK)                     store(EMPTY) / store(NODE n)
//!  EMPTY ─────────────> LOCK ── decide ──────────────────────────────> ...
//!  NODE n ────────────> LOCK ── take child ──> EMPTY
//!  END e   (sticky: every acquirer sees it and leaves it in place)
//! ```
//!
//! - `ExitOnEmpty`: wait for a free slot, then decide a new node
//! - `ExitOnFull`: wait for a published node, then take one of its children
//! - `ExitOnLock`: wait until someone starts deciding, without taking the lock
//!
//! Spinning uses `thread::yield_now` and gives up after the configured
//! timeout with `Backtrack(Timeout)`. The arena lock is held only for single
//! reads or writes, never while spinning.
//!
//! The current path is the list of `(parent, child index)` slots taken by
//! this run; its last entry is where the next node attaches.

use super::node::{first_uncovered, ChildSlot, NodeId, NodeKind, TreeNode, LOCK, ROOT};
use crate::domain::error::{BacktrackReason, ControlResult, EngineError, ExceptionRecord, Interrupt};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// What the slot currently publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotValue {
    /// Nothing published
    Empty,
    /// A node (the lock sentinel included)
    Node(NodeId),
    /// The run has ended at this end node
    End(NodeId),
}

const TAG_NODE: u64 = 0;
const TAG_END: u64 = 1;

impl SlotValue {
    fn encode(self) -> u64 {
        match self {
            Self::Empty => 0,
            Self::Node(id) => ((id as u64 + 1) << 1) | TAG_NODE,
            Self::End(id) => ((id as u64 + 1) << 1) | TAG_END,
        }
    }

    fn decode(raw: u64) -> Self {
        if raw == 0 {
            return Self::Empty;
        }
        let id = ((raw >> 1) - 1) as NodeId;
        if raw & 1 == TAG_END {
            Self::End(id)
        } else {
            Self::Node(id)
        }
    }

    const LOCKED: Self = Self::Node(LOCK);
}

/// When `acquire_ref` stops spinning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireMode {
    /// Take the lock once the slot is empty
    ExitOnEmpty,
    /// Take the lock once a node is published
    ExitOnFull,
    /// Return once somebody holds the lock
    ExitOnLock,
}

/// A child slot taken by the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildLoc {
    /// Node the slot belongs to
    pub parent: NodeId,
    /// Index of the slot
    pub index: usize,
}

/// Shared execution tree.
#[derive(Debug)]
pub struct ExecutionTreeManager {
    nodes: RwLock<Vec<Option<TreeNode>>>,
    slot: AtomicU64,
    path: Mutex<Vec<ChildLoc>>,
    acquire_timeout: Option<Duration>,
    prune: bool,
    acquisitions: AtomicU64,
}

impl ExecutionTreeManager {
    /// Tree with only the root.
    pub fn new(acquire_timeout: Option<Duration>, prune: bool) -> Self {
        let nodes = vec![Some(TreeNode::new(NodeKind::Root, None)), Some(TreeNode::new(NodeKind::Lock, None))];
        Self {
            nodes: RwLock::new(nodes),
            slot: AtomicU64::new(SlotValue::Empty.encode()),
            path: Mutex::new(vec![ChildLoc { parent: ROOT, index: 0 }]),
            acquire_timeout,
            prune,
            acquisitions: AtomicU64::new(0),
        }
    }

    /// Rewind to the root for a new run.
    pub fn restart(&self) {
        self.slot.store(SlotValue::Empty.encode(), Ordering::Release);
        let mut path = self.path.lock();
        path.clear();
        path.push(ChildLoc { parent: ROOT, index: 0 });
    }

    /// Whether the whole tree has been explored.
    pub fn root_covered(&self) -> bool {
        self.nodes.read()[ROOT].as_ref().is_some_and(|n| n.covered)
    }

    /// Number of live nodes, sentinels included.
    pub fn node_count(&self) -> usize {
        self.nodes.read().iter().flatten().count()
    }

    /// Lock acquisitions so far.
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::Relaxed)
    }

    /// Slots taken by the current run.
    pub fn path(&self) -> Vec<ChildLoc> {
        self.path.lock().clone()
    }

    /// Child indices taken below the root; identifies the leaf of the run.
    pub fn path_signature(&self) -> Vec<usize> {
        self.path.lock().iter().skip(1).map(|loc| loc.index).collect()
    }

    /// Copy of a node.
    pub fn node(&self, id: NodeId) -> Option<TreeNode> {
        self.nodes.read().get(id).cloned().flatten()
    }

    /// What the slot publishes right now.
    pub fn current(&self) -> SlotValue {
        SlotValue::decode(self.slot.load(Ordering::Acquire))
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Slot Protocol
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Spin on the slot according to `mode`.
    ///
    /// On return with `Empty` or `Node` (modes other than `ExitOnLock`) the
    /// caller holds the lock and must `release_ref`. `End` is returned to
    /// every mode and left in place.
    pub fn acquire_ref(&self, mode: AcquireMode) -> ControlResult<SlotValue> {
        let started = Instant::now();
        loop {
            if mode == AcquireMode::ExitOnLock {
                let seen = self.current();
                if seen == SlotValue::LOCKED || matches!(seen, SlotValue::End(_)) {
                    return Ok(seen);
                }
            } else {
                let prev = SlotValue::decode(self.slot.swap(SlotValue::LOCKED.encode(), Ordering::AcqRel));
                match (mode, prev) {
                    (_, SlotValue::Node(LOCK)) => {}
                    (_, SlotValue::End(_)) => {
                        self.slot.store(prev.encode(), Ordering::Release);
                        return Ok(prev);
                    }
                    (AcquireMode::ExitOnEmpty, SlotValue::Empty) | (AcquireMode::ExitOnFull, SlotValue::Node(_)) => {
                        self.acquisitions.fetch_add(1, Ordering::Relaxed);
                        return Ok(prev);
                    }
                    _ => self.slot.store(prev.encode(), Ordering::Release),
                }
            }

            if self.acquire_timeout.is_some_and(|limit| started.elapsed() >= limit) {
                debug!(?mode, "execution tree acquire timed out");
                return Err(Interrupt::backtrack(BacktrackReason::Timeout));
            }
            std::thread::yield_now();
        }
    }

    /// Like `acquire_ref`, but turns an end node into an interrupt: the
    /// exception it carries, or a plain backtrack.
    pub fn acquire_ref_ex(&self, mode: AcquireMode) -> ControlResult<SlotValue> {
        match self.acquire_ref(mode)? {
            SlotValue::End(id) => {
                let first = self.node(id).and_then(|n| n.exceptions().first().cloned());
                Err(first.map_or(Interrupt::backtrack(BacktrackReason::SearchEnds), |e| e.error))
            }
            other => Ok(other),
        }
    }

    /// Give the slot back.
    ///
    /// With a child index the decision is complete: the slot is extended
    /// into the path and the word goes back to empty. Without one, `node`
    /// is published for an `ExitOnFull` acquirer.
    pub fn release_ref(&self, node: NodeId, child: Option<usize>) {
        match child {
            Some(index) => {
                self.path.lock().push(ChildLoc { parent: node, index });
                self.slot.store(SlotValue::Empty.encode(), Ordering::Release);
            }
            None => self.slot.store(SlotValue::Node(node).encode(), Ordering::Release),
        }
    }

    fn abandon(&self) {
        self.slot.store(SlotValue::Empty.encode(), Ordering::Release);
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Decisions
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Make a decision of `kind` at the end of the current path.
    ///
    /// `pick` sees the coverage of each child slot and returns the child
    /// to take. Returns the node and the child taken.
    pub fn decide(
        &self,
        kind: NodeKind,
        pick: impl FnOnce(&[Option<bool>]) -> Option<usize>,
    ) -> ControlResult<(NodeId, usize)> {
        self.acquire_ref_ex(AcquireMode::ExitOnEmpty)?;
        let node = match self.locate(kind) {
            Ok(node) => node,
            Err(e) => {
                self.abandon();
                return Err(e);
            }
        };
        let children = self.child_coverage(node);
        match pick(&children).filter(|&i| i < children.len()) {
            Some(index) => {
                trace!(node, index, "tree decision");
                self.release_ref(node, Some(index));
                Ok((node, index))
            }
            None => {
                self.abandon();
                Err(Interrupt::backtrack(BacktrackReason::TreeNodeCovered))
            }
        }
    }

    /// Deciding the first uncovered child.
    pub fn decide_first_uncovered(&self, kind: NodeKind) -> ControlResult<(NodeId, usize)> {
        self.decide(kind, first_uncovered)
    }

    /// Publish a node of `kind` for an `ExitOnFull` taker.
    pub fn publish(&self, kind: NodeKind) -> ControlResult<NodeId> {
        self.acquire_ref_ex(AcquireMode::ExitOnEmpty)?;
        match self.locate(kind) {
            Ok(node) => {
                self.release_ref(node, None);
                Ok(node)
            }
            Err(e) => {
                self.abandon();
                Err(e)
            }
        }
    }

    /// Take child `index` of the published node.
    pub fn take_published(&self, index: usize) -> ControlResult<NodeId> {
        match self.acquire_ref_ex(AcquireMode::ExitOnFull)? {
            SlotValue::Node(node) => {
                self.release_ref(node, Some(index));
                Ok(node)
            }
            other => {
                self.slot.store(other.encode(), Ordering::Release);
                Err(EngineError::Internal(format!("expected a published node, found {other:?}")).into())
            }
        }
    }

    /// Take the published node when it satisfies `wanted`; otherwise leave
    /// the slot alone.
    pub fn claim_published(&self, wanted: impl Fn(&NodeKind) -> bool) -> ControlResult<bool> {
        let SlotValue::Node(node) = self.current() else {
            return Ok(false);
        };
        if node == LOCK || !self.node(node).is_some_and(|n| wanted(&n.kind)) {
            return Ok(false);
        }
        self.take_published(0)?;
        Ok(true)
    }

    /// Find the node at the end of the path, or install a fresh one.
    /// Caller holds the slot lock.
    fn locate(&self, kind: NodeKind) -> ControlResult<NodeId> {
        let loc = self
            .path
            .lock()
            .last()
            .copied()
            .ok_or_else(|| EngineError::Internal("execution tree path is empty".into()))?;

        let mut nodes = self.nodes.write();
        let existing = nodes
            .get(loc.parent)
            .and_then(Option::as_ref)
            .and_then(|p| p.children.get(loc.index).copied())
            .ok_or_else(|| EngineError::Internal(format!("no slot {} under node {}", loc.index, loc.parent)))?;

        match existing {
            ChildSlot::Node(id) => {
                if self.path.lock().iter().any(|l| l.parent == id) {
                    return Err(EngineError::Internal(format!("cycle through node {id}")).into());
                }
                let node = nodes
                    .get(id)
                    .and_then(Option::as_ref)
                    .ok_or_else(|| EngineError::Internal(format!("dangling node {id}")))?;
                if node.covered {
                    return Err(Interrupt::backtrack(BacktrackReason::TreeNodeCovered));
                }
                if !node.kind.same_shape(&kind) {
                    return Err(EngineError::Internal(format!(
                        "run diverged from execution tree: found {} where {} was decided",
                        kind.name(),
                        node.kind.name()
                    ))
                    .into());
                }
                Ok(id)
            }
            ChildSlot::Empty | ChildSlot::Locked => {
                let id = nodes.len();
                nodes.push(Some(TreeNode::new(kind, Some((loc.parent, loc.index)))));
                if let Some(parent) = nodes.get_mut(loc.parent).and_then(Option::as_mut) {
                    parent.children[loc.index] = ChildSlot::Node(id);
                }
                Ok(id)
            }
        }
    }

    fn child_coverage(&self, node: NodeId) -> Vec<Option<bool>> {
        let nodes = self.nodes.read();
        Self::coverage_of_children(&nodes, node)
    }

    fn coverage_of_children(nodes: &[Option<TreeNode>], node: NodeId) -> Vec<Option<bool>> {
        let Some(n) = nodes.get(node).and_then(Option::as_ref) else {
            return Vec::new();
        };
        n.children
            .iter()
            .map(|slot| match slot {
                ChildSlot::Node(id) => Some(nodes.get(*id).and_then(Option::as_ref).map_or(true, |c| c.covered)),
                ChildSlot::Empty | ChildSlot::Locked => None,
            })
            .collect()
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // End Of Run
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Install the end node of this run, or append `exception` to the one
    /// already installed.
    pub fn end_run(&self, exception: Option<ExceptionRecord>) -> ControlResult<NodeId> {
        if let SlotValue::End(id) = self.acquire_ref(AcquireMode::ExitOnEmpty)? {
            if let Some(e) = exception {
                self.push_exception(id, e);
            }
            return Ok(id);
        }

        let id = match self.locate(NodeKind::End { exceptions: Vec::new() }) {
            Ok(id) => id,
            Err(e) => {
                self.abandon();
                return Err(e);
            }
        };
        if let Some(e) = exception {
            self.push_exception(id, e);
        }
        self.slot.store(SlotValue::End(id).encode(), Ordering::Release);
        Ok(id)
    }

    fn push_exception(&self, id: NodeId, exception: ExceptionRecord) {
        if let Some(TreeNode { kind: NodeKind::End { exceptions }, .. }) =
            self.nodes.write().get_mut(id).and_then(Option::as_mut)
        {
            exceptions.push(exception);
        }
    }

    /// First exception the current run ended with.
    pub fn end_exception(&self) -> Option<ExceptionRecord> {
        match self.current() {
            SlotValue::End(id) => self.node(id).and_then(|n| n.exceptions().first().cloned()),
            _ => None,
        }
    }

    /// Mark the explored path covered and propagate upwards.
    ///
    /// Returns whether anything is left to explore.
    pub fn do_backtrack(&self) -> bool {
        let path = self.path.lock().clone();
        let mut nodes = self.nodes.write();

        if path.len() <= 1 {
            if let Some(root) = nodes[ROOT].as_mut() {
                root.covered = true;
            }
            debug!("execution tree exhausted at the root");
            return false;
        }

        if let Some(last) = path.last() {
            let child = nodes
                .get(last.parent)
                .and_then(Option::as_ref)
                .and_then(|p| p.children.get(last.index).copied());
            match child {
                Some(ChildSlot::Node(id)) => {
                    if let Some(n) = nodes.get_mut(id).and_then(Option::as_mut) {
                        n.covered = true;
                    }
                }
                _ => {
                    let id = nodes.len();
                    nodes.push(Some(TreeNode::new(
                        NodeKind::End { exceptions: Vec::new() },
                        Some((last.parent, last.index)),
                    )));
                    if let Some(parent) = nodes.get_mut(last.parent).and_then(Option::as_mut) {
                        parent.children[last.index] = ChildSlot::Node(id);
                    }
                }
            }
        }

        for loc in path.iter().rev() {
            let children = Self::coverage_of_children(&nodes, loc.parent);
            let became_covered = match nodes.get_mut(loc.parent).and_then(Option::as_mut) {
                Some(parent) if !parent.covered && parent.coverage_rule(&children) => {
                    parent.covered = true;
                    true
                }
                _ => false,
            };
            if became_covered && self.prune && loc.parent != ROOT {
                Self::free_descendants(&mut nodes, loc.parent);
            }
        }

        let more = nodes[ROOT].as_ref().is_some_and(|n| !n.covered);
        trace!(more, nodes = nodes.iter().flatten().count(), "tree backtrack");
        more
    }

    fn free_descendants(nodes: &mut [Option<TreeNode>], node: NodeId) {
        let mut stack: Vec<NodeId> = nodes[node].as_ref().map(child_ids).unwrap_or_default();
        while let Some(id) = stack.pop() {
            if let Some(n) = nodes.get_mut(id).and_then(Option::take) {
                stack.extend(child_ids(&n));
            }
        }
    }
}

fn child_ids(node: &TreeNode) -> Vec<NodeId> {
    node.children
        .iter()
        .filter_map(|c| match c {
            ChildSlot::Node(id) => Some(*id),
            ChildSlot::Empty | ChildSlot::Locked => None,
        })
        .collect()
}
