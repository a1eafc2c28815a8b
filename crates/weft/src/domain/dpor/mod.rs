//! DPOR Core - vector clocks, coverage and the race tracker
//!
//! # Overview
//!
//! Two runs that differ only in the order of INDEPENDENT accesses are
//! equivalent, so the search only needs one of them. The race tracker finds
//! the dependent pairs as the run unfolds and records, on the transfer that
//! scheduled the earlier access, which other thread must be tried there.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     on_access / update_backtrack_sets
//! │   VcTracker     │ ─────────────────────────────────────┐
//! ├─────────────────┤                                      ▼
//! │ - thread clocks │                          ┌──────────────────────┐
//! │ - location clocks                          │ Schedule             │
//! │ - last accesses │                          │  TransferPoint       │
//! │ - logical time  │                          │   .backtrack += t    │
//! └─────────────────┘                          │  Coverage += (b, a)  │
//!                                              └──────────────────────┘
//! ```

pub mod coverage;
pub mod tracker;
pub mod vector_clock;

pub use coverage::{Coverage, CoveragePoint, CoverageTuple};
pub use tracker::VcTracker;
pub use vector_clock::VectorClock;
