//! Adapters Layer - the engine's edges
//!
//! - Inbound: instrumentation events → yields of the reporting thread
//! - Outbound: results → text / JSON reports
//! - Suites of scenarios run in order

pub mod instrumentation;
pub mod report;
pub mod suite;

pub use instrumentation::{EventKind, InstrEvent, Monitor};
pub use report::{render, write_report, ReportFormat};
pub use suite::{Suite, SuiteResults};
