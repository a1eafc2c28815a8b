//! Instrumentation - typed events from instrumented code into yields
//!
//! An instrumentation layer (a compiler pass, a binary rewriter, a
//! hand-written shim) reports what a program thread is about to do. Each
//! event becomes one scheduling point of the reporting thread:
//!
//! | Event | Label | Access |
//! |-------|-------|--------|
//! | `MemRead` | `read` | read of `addr`/`size` |
//! | `MemWrite` | `write` | write of `addr`/`size` |
//! | `FuncEnter` | `enter` | - |
//! | `FuncReturn` | `return` | - |
//! | `FuncCall` | `call` | - |
//! | `ThreadStart` | `thread_start` | - |
//! | `ThreadEnd` | `thread_end` | - |
//! | `AtPc` | `pc` | - |
//!
//! The [`Monitor`] also keeps per-thread facts about the events seen so
//! far (call depth per function, last pc, ended threads) for `until_cond`
//! predicates to query.

use crate::domain::error::{ControlResult, EngineError};
use crate::domain::scenario::{ThreadCx, READ_LABEL, WRITE_LABEL};
use crate::domain::types::{Address, SharedAccess, SourceLocation, ThreadId};
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Label of [`EventKind::FuncEnter`].
pub const ENTER_LABEL: &str = "enter";
/// Label of [`EventKind::FuncReturn`].
pub const RETURN_LABEL: &str = "return";
/// Label of [`EventKind::FuncCall`].
pub const CALL_LABEL: &str = "call";
/// Label of [`EventKind::ThreadStart`].
pub const THREAD_START_LABEL: &str = "thread_start";
/// Label of [`EventKind::ThreadEnd`].
pub const THREAD_END_LABEL: &str = "thread_end";
/// Label of [`EventKind::AtPc`].
pub const PC_LABEL: &str = "pc";

/// What the instrumented thread is about to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Load from `addr`
    MemRead,
    /// Store to `addr`
    MemWrite,
    /// Entry of the function at `addr`
    FuncEnter,
    /// Return from the function at `addr`
    FuncReturn,
    /// Call of the function at `addr`
    FuncCall,
    /// First event of a thread
    ThreadStart,
    /// Last event of a thread
    ThreadEnd,
    /// Marker at program counter `pc`
    AtPc,
}

impl EventKind {
    /// Yield label the event is reported under.
    pub const fn label(self) -> &'static str {
        match self {
            Self::MemRead => READ_LABEL,
            Self::MemWrite => WRITE_LABEL,
            Self::FuncEnter => ENTER_LABEL,
            Self::FuncReturn => RETURN_LABEL,
            Self::FuncCall => CALL_LABEL,
            Self::ThreadStart => THREAD_START_LABEL,
            Self::ThreadEnd => THREAD_END_LABEL,
            Self::AtPc => PC_LABEL,
        }
    }
}

/// One instrumentation event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrEvent {
    /// Reporting thread
    pub thread: ThreadId,
    /// Event kind
    pub kind: EventKind,
    /// Memory or function address
    pub addr: Address,
    /// Access size in bytes (memory events)
    pub size: u32,
    /// Program counter (`AtPc`)
    pub pc: u64,
    /// Source location, when the instrumentation knows it
    pub loc: Option<SourceLocation>,
}

impl InstrEvent {
    /// Event without address or location.
    pub const fn new(thread: ThreadId, kind: EventKind) -> Self {
        Self { thread, kind, addr: Address(0), size: 0, pc: 0, loc: None }
    }

    /// Memory read of `size` bytes at `addr`.
    pub fn read(thread: ThreadId, addr: Address, size: u32) -> Self {
        Self { addr, size, ..Self::new(thread, EventKind::MemRead) }
    }

    /// Memory write of `size` bytes at `addr`.
    pub fn write(thread: ThreadId, addr: Address, size: u32) -> Self {
        Self { addr, size, ..Self::new(thread, EventKind::MemWrite) }
    }

    /// Function event of `kind` for the function at `addr`.
    pub fn func(thread: ThreadId, kind: EventKind, addr: Address) -> Self {
        Self { addr, ..Self::new(thread, kind) }
    }

    /// Marker at `pc`.
    pub fn at_pc(thread: ThreadId, pc: u64) -> Self {
        Self { pc, ..Self::new(thread, EventKind::AtPc) }
    }

    /// Attach a source location.
    #[must_use]
    pub fn with_loc(mut self, loc: SourceLocation) -> Self {
        self.loc = Some(loc);
        self
    }

    /// Shared access made by the event, if it is a memory event.
    pub const fn access(&self) -> Option<SharedAccess> {
        match self.kind {
            EventKind::MemRead => Some(SharedAccess::read(self.addr, self.size)),
            EventKind::MemWrite => Some(SharedAccess::write(self.addr, self.size)),
            _ => None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Monitor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
/// Turns events into yields and remembers what each thread did.
///
/// Shared by every thread of a scenario (`Arc<Monitor>`); clear it in
/// `set_up` so facts do not leak between runs.
#[derive(Debug, Default)]
pub struct Monitor {
    in_func: DashMap<(ThreadId, Address), u32>,
    last_pc: DashMap<ThreadId, u64>,
    ended: DashSet<ThreadId>,
}

impl Monitor {
    /// Empty monitor
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget every recorded fact.
    pub fn clear(&self) {
        self.in_func.clear();
        self.last_pc.clear();
        self.ended.clear();
    }

    /// Report `event` as a scheduling point of `cx`.
    ///
    /// # Errors
    ///
    /// An event reported for another thread is an internal error; every
    /// other error comes from the yield itself.
    pub fn dispatch(&self, cx: &ThreadCx, event: &InstrEvent) -> ControlResult {
        if event.thread != cx.id() {
            return Err(EngineError::Internal(format!("{} reported an event of {}", cx.id(), event.thread)).into());
        }
        trace!(thread = %event.thread, kind = ?event.kind, addr = %event.addr, "instrumentation event");

        match event.kind {
            EventKind::FuncEnter => {
                *self.in_func.entry((event.thread, event.addr)).or_insert(0) += 1;
            }
            EventKind::AtPc => {
                self.last_pc.insert(event.thread, event.pc);
            }
            EventKind::ThreadEnd => {
                self.ended.insert(event.thread);
            }
            _ => {}
        }

        let loc = event.loc.clone().or_else(|| cx.location()).unwrap_or_default();
        cx.yield_with(event.kind.label(), event.access(), loc)?;

        if event.kind == EventKind::FuncReturn {
            if let Some(mut depth) = self.in_func.get_mut(&(event.thread, event.addr)) {
                *depth = depth.saturating_sub(1);
            }
        }
        Ok(())
    }

    /// Frames of the function at `func` that `thread` is inside.
    pub fn in_func(&self, thread: ThreadId, func: Address) -> u32 {
        self.in_func.get(&(thread, func)).map_or(0, |d| *d)
    }

    /// Last pc marker `thread` passed.
    pub fn last_pc(&self, thread: ThreadId) -> Option<u64> {
        self.last_pc.get(&thread).map(|pc| *pc)
    }

    /// Whether `thread` reported its end.
    pub fn has_ended(&self, thread: ThreadId) -> bool {
        self.ended.contains(&thread)
    }
}
