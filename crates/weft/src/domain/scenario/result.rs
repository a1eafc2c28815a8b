//! Classified results of an exploration

use super::stats::StatsSnapshot;
use crate::domain::dpor::Coverage;
use crate::domain::error::{AssertionViolation, PutError};
use crate::domain::schedule::Schedule;
use std::fmt;

/// How an exploration ended.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// A passing run was found (exists mode)
    Exists {
        /// Its schedule
        schedule: Schedule,
    },
    /// Every run passed (forall mode)
    Forall {
        /// Schedules that added coverage
        schedules: Vec<Schedule>,
        /// Number of passing paths
        num_paths: u64,
        /// Coverage accumulated over every path
        coverage: Coverage,
    },
    /// A check failed or the threads deadlocked
    AssertionViolation {
        /// The failed check
        violation: AssertionViolation,
        /// Schedule of the failing run
        schedule: Schedule,
    },
    /// The program under test failed
    RuntimeException {
        /// The failure
        error: PutError,
        /// Schedule of the failing run
        schedule: Schedule,
    },
    /// No run satisfied the scenario
    NoFeasibleExecution,
}

impl Outcome {
    /// Whether the scenario passed.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exists { .. } | Self::Forall { .. })
    }

    /// Schedule to show for this outcome.
    pub fn schedule(&self) -> Option<&Schedule> {
        match self {
            Self::Exists { schedule }
            | Self::AssertionViolation { schedule, .. }
            | Self::RuntimeException { schedule, .. } => Some(schedule),
            Self::Forall { schedules, .. } => schedules.last(),
            Self::NoFeasibleExecution => None,
        }
    }

    /// Short name of the class.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Exists { .. } => "EXISTS",
            Self::Forall { .. } => "FORALL",
            Self::AssertionViolation { .. } => "ASSERTION VIOLATION",
            Self::RuntimeException { .. } => "RUNTIME EXCEPTION",
            Self::NoFeasibleExecution => "NO FEASIBLE EXECUTION",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exists { .. } | Self::NoFeasibleExecution => f.write_str(self.name()),
            Self::Forall { schedules, num_paths, coverage } => write!(
                f,
                "{}: {num_paths} paths, {} kept, {} coverage tuples",
                self.name(),
                schedules.len(),
                coverage.len()
            ),
            Self::AssertionViolation { violation, .. } => write!(f, "{}: {violation}", self.name()),
            Self::RuntimeException { error, .. } => write!(f, "{}: {error}", self.name()),
        }
    }
}

/// Result of [`Scenario::explore`](super::Scenario::explore).
#[derive(Debug, Clone)]
pub struct ExploreResult {
    /// Scenario name
    pub name: String,
    /// Classification
    pub outcome: Outcome,
    /// Statistics at the end
    pub stats: StatsSnapshot,
    /// Runs executed
    pub runs: u64,
}

impl ExploreResult {
    /// Whether the scenario passed.
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

impl fmt::Display for ExploreResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} after {} runs", self.name, self.outcome, self.runs)
    }
}
