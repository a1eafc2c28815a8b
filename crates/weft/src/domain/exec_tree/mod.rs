//! Execution Tree Module - decisions shared by concurrently running coroutines
//!
//! ```text
//! domain/exec_tree/
//! ├── node.rs     node kinds, child slots, coverage rules
//! └── manager.rs  arena, atomic current-pointer slot, path, backtracking
//! ```

pub mod manager;
pub mod node;

pub use manager::{AcquireMode, ChildLoc, ExecutionTreeManager, SlotValue};
pub use node::{first_uncovered, ChildSlot, NodeId, NodeKind, SelectMode, TreeNode, LOCK, ROOT};
