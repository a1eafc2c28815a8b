//! Execution-tree nodes
//!
//! ```text
//! TreeNode
//! ├── Root            one child: the first decision of every run
//! ├── End             leaf; carries the exceptions the run ended with
//! ├── Lock            sentinel published while a decision is being made
//! ├── Choice          `arity` children, one per alternative
//! ├── Conditional     two children, picked by a boolean
//! ├── SelectThread    one child per candidate thread (Exists | Forall)
//! └── Transition      one child: the step of a designated thread
//! ```
//!
//! Coverage only grows. A node computes it from its children. Covered means
//! explored, not passed: an exists selection still tries every thread until
//! one of its runs succeeds.
//!
//! | node                     | covered when                                   |
//! |--------------------------|------------------------------------------------|
//! | Choice, SelectThread     | every slot holds a covered child               |
//! | Root, Conditional, Transition | some child exists and all existing ones are covered |
//! | End                      | always                                         |

use crate::domain::error::ExceptionRecord;
use crate::domain::types::ThreadId;
use std::fmt;

/// Index of a node in the tree arena.
pub type NodeId = usize;

/// The root of every tree.
pub const ROOT: NodeId = 0;

/// The lock sentinel.
pub const LOCK: NodeId = 1;

/// Quantifier of a thread selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SelectMode {
    /// One passing child is enough
    Exists,
    /// Every child must pass
    Forall,
}

/// What a node decides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// Tree root
    Root,
    /// End of a run
    End {
        /// Exceptions raised by the run, in order
        exceptions: Vec<ExceptionRecord>,
    },
    /// Lock sentinel
    Lock,
    /// Pick one of `arity` alternatives
    Choice {
        /// Number of alternatives
        arity: usize,
    },
    /// Branch on a boolean
    Conditional,
    /// Pick one of `threads`
    SelectThread {
        /// Exists or forall
        mode: SelectMode,
        /// Child slot i belongs to `threads[i]`
        threads: Vec<ThreadId>,
    },
    /// Step of `thread`
    Transition {
        /// Thread taking the step
        thread: ThreadId,
    },
}

impl NodeKind {
    /// Number of child slots a node of this kind has.
    pub fn arity(&self) -> usize {
        match self {
            Self::End { .. } | Self::Lock => 0,
            Self::Root | Self::Transition { .. } => 1,
            Self::Conditional => 2,
            Self::Choice { arity } => *arity,
            Self::SelectThread { threads, .. } => threads.len(),
        }
    }

    /// Whether `other` makes the same decision.
    ///
    /// A replayed run must meet the node it met the first time.
    pub fn same_shape(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::End { .. }, Self::End { .. }) => true,
            _ => self == other,
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Root => "Root",
            Self::End { .. } => "End",
            Self::Lock => "Lock",
            Self::Choice { .. } => "Choice",
            Self::Conditional => "Conditional",
            Self::SelectThread { mode: SelectMode::Exists, .. } => "SelectThread(exists)",
            Self::SelectThread { mode: SelectMode::Forall, .. } => "SelectThread(forall)",
            Self::Transition { .. } => "Transition",
        }
    }
}

/// One child slot of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildSlot {
    /// Not explored yet
    Empty,
    /// A decider is installing the child
    Locked,
    /// Explored child
    Node(NodeId),
}

/// A node of the execution tree.
#[derive(Debug, Clone)]
pub struct TreeNode {
    /// What the node decides
    pub kind: NodeKind,
    /// One slot per alternative
    pub children: Vec<ChildSlot>,
    /// Whether every path through the node has been explored
    pub covered: bool,
    /// Slot of the parent this node sits in
    pub parent: Option<(NodeId, usize)>,
}

impl TreeNode {
    /// Node of `kind` with empty child slots.
    pub fn new(kind: NodeKind, parent: Option<(NodeId, usize)>) -> Self {
        let covered = matches!(kind, NodeKind::End { .. });
        Self { children: vec![ChildSlot::Empty; kind.arity()], kind, covered, parent }
    }

    /// Apply the coverage rule given the coverage of each child slot
    /// (`None` for a slot without a child).
    pub fn coverage_rule(&self, children: &[Option<bool>]) -> bool {
        match &self.kind {
            NodeKind::End { .. } => true,
            NodeKind::Lock => false,
            NodeKind::Choice { .. } | NodeKind::SelectThread { .. } => {
                !children.is_empty() && children.iter().all(|c| *c == Some(true))
            }
            NodeKind::Root | NodeKind::Conditional | NodeKind::Transition { .. } => {
                children.iter().any(Option::is_some) && children.iter().flatten().all(|c| *c)
            }
        }
    }

    /// Exceptions carried by an end node.
    pub fn exceptions(&self) -> &[ExceptionRecord] {
        match &self.kind {
            NodeKind::End { exceptions } => exceptions,
            _ => &[],
        }
    }
}

/// First slot not holding a covered child.
pub fn first_uncovered(children: &[Option<bool>]) -> Option<usize> {
    children.iter().position(|c| *c != Some(true))
}

impl fmt::Display for TreeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind.name())?;
        match &self.kind {
            NodeKind::Choice { arity } => write!(f, "[{arity}]")?,
            NodeKind::SelectThread { threads, .. } => {
                let ids: Vec<String> = threads.iter().map(|t| t.as_usize().to_string()).collect();
                write!(f, "[{}]", ids.join(","))?;
            }
            NodeKind::Transition { thread } => write!(f, "[{}]", thread.as_usize())?,
            _ => {}
        }
        if self.covered {
            write!(f, " covered")?;
        }
        Ok(())
    }
}
