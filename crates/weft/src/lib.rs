//! Weft - Systematic Concurrency Testing
//!
//! # Overview
//!
//! `weft` runs the threads of a program under test as coroutines over real
//! OS threads, one of them running at a time, and explores their
//! interleavings systematically. Every decision of a run is recorded in a
//! replayable schedule; backtracking over the schedule (or over a shared
//! execution tree) picks the next interleaving until the search space is
//! exhausted or a failure is found.
//!
//! # Trinity Architecture
//!
//! - **Domain**: schedules, race tracking, coroutines, execution tree, scenarios
//! - **Infrastructure**: configuration, schedule files, logging
//! - **Adapters**: instrumentation events, reports, suites
//!
//! # Search Laws (Invariants)
//!
//! ## Control
//! - Exactly one coroutine holds the permit and runs
//! - A handoff that does not come back within `max_wait` is fatal
//!
//! ## Schedule
//! - The cursor stays within `0..=len`
//! - Replaying a schedule reproduces the same transitions
//!
//! ## Search
//! - Covered tree nodes never become uncovered
//! - The search ends once no decision has an untried alternative
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use std::sync::Arc;
//! use weft::{Address, Controller, ControlResult, EngineConfig, Outcome, Scenario};
//!
//! let counter = Arc::new(AtomicU64::new(0));
//! let scenario = Scenario::new("racy counter", EngineConfig::default()).unwrap();
//! let result = scenario
//!     .explore(&mut |ctl: &mut Controller| -> ControlResult {
//!         counter.store(0, Ordering::SeqCst);
//!         for name in ["t1", "t2", "t3"] {
//!             let c = Arc::clone(&counter);
//!             ctl.create_thread(name, move |cx| {
//!                 cx.read(Address::of(&*c))?;
//!                 let v = c.load(Ordering::SeqCst);
//!                 cx.write(Address::of(&*c))?;
//!                 c.store(v + 1, Ordering::SeqCst);
//!                 Ok(())
//!             })?;
//!         }
//!         ctl.context_bounded_search(3)?;
//!         ctl.check(counter.load(Ordering::SeqCst) == 3, "lost update")
//!     })
//!     .unwrap();
//!
//! assert!(matches!(result.outcome, Outcome::AssertionViolation { .. }));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

// Trinity Architecture Layers
pub mod adapters;
pub mod domain;
pub mod infrastructure;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Re-export Primary Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

// Core types
pub use domain::{AccessKind, Address, SharedAccess, SourceLocation, ThreadId, ENDING_LABEL, MAIN_LABEL};

// Errors
pub use domain::{
    AssertionKind,
    AssertionViolation,
    BacktrackReason,
    ControlResult,
    EngineError,
    Interrupt,
    PutError,
};

// Scenario types
pub use domain::{
    Controller,
    ExploreResult,
    Outcome,
    Phase,
    Scenario,
    SearchMode,
    StatsSnapshot,
    TestCase,
    ThreadCx,
    Until,
};

// Schedule types
pub use domain::{Coverage, Schedule, SchedulePoint};

// Infrastructure
pub use infrastructure::{init_logging, EngineConfig, SearchStrategy};

// Adapters
pub use adapters::{ReportFormat, Suite};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
