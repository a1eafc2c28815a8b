//! Infrastructure Layer - configuration, persistence and logging
//!
//! # Responsibilities
//! - Engine settings and their `WEFT_*` environment overrides
//! - Saving and loading schedules in the binary record format
//! - Installing the default `tracing` subscriber

pub mod config;
pub mod logging;
pub mod schedule_file;

pub use config::{EngineConfig, SearchStrategy};
pub use logging::init_logging;
