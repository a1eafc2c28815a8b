//! Domain Layer - controlled interleavings and their search
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Domain Layer                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  Scenario Module                                            │
//! │  ├─ Scenario / TestCase     explore, replay                 │
//! │  ├─ Controller (main)       transfers, criteria, drivers    │
//! │  └─ ThreadCx (threads)      yields, accesses, choices       │
//! │                                                             │
//! │  Schedule Module              DPOR Module                   │
//! │  ├─ YieldPoint                ├─ VectorClock                │
//! │  ├─ TransferPoint             ├─ VcTracker                  │
//! │  ├─ ChoicePoint               └─ Coverage                   │
//! │  └─ Schedule (arena+cursor)                                 │
//! │                                                             │
//! │  Coroutine Module             Exec Tree Module              │
//! │  ├─ Coroutine (OS thread)     ├─ NodeKind / TreeNode        │
//! │  ├─ Permit / Message          └─ ExecutionTreeManager       │
//! │  └─ CoroutineGroup                                          │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Who Touches What
//!
//! Only the coroutine holding the [`Permit`] reads or writes the schedule,
//! the tracker and the group. The execution tree is the one structure
//! several coroutines race on; its current-pointer slot is guarded by the
//! lock-sentinel swap, not by a mutex.

pub mod coroutine;
pub mod dpor;
pub mod error;
pub mod exec_tree;
pub mod scenario;
pub mod schedule;
pub mod types;

// Re-export core types
pub use types::{AccessKind, Address, SharedAccess, SourceLocation, ThreadId, ENDING_LABEL, MAIN_LABEL};

// Re-export error types
pub use error::{
    AssertionKind,
    AssertionViolation,
    BacktrackReason,
    ControlResult,
    EngineError,
    ExceptionRecord,
    Interrupt,
    PutError,
};

// Re-export schedule types
pub use schedule::{ChoicePoint, PointId, Schedule, SchedulePoint, TransferPoint, Transition, YieldPoint};

// Re-export DPOR types
pub use dpor::{Coverage, CoveragePoint, CoverageTuple, VcTracker, VectorClock};

// Re-export coroutine types
pub use coroutine::{Coroutine, CoroutineBody, CoroutineGroup, Exit, Message, Permit, Status};

// Re-export execution tree types
pub use exec_tree::{ExecutionTreeManager, NodeId, NodeKind, SelectMode, TreeNode};

// Re-export scenario types
pub use scenario::{
    Controller,
    ExploreResult,
    Outcome,
    Phase,
    Scenario,
    SearchMode,
    Statistics,
    StatsSnapshot,
    TestCase,
    ThreadCx,
    ThreadFn,
    TransferCriteria,
    Until,
};
