//! Error Taxonomy
//!
//! Every controlled call returns `Result<T, Interrupt>`. The variants split
//! into what the search recovers from (`Backtrack`), what ends a scenario
//! with a classified result (`Assertion`, `Put`), control messages that
//! unwind a coroutine (`Restart`, `Terminate`), and engine failures that
//! abort everything (`Fatal`).

use crate::domain::types::{SourceLocation, ThreadId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Backtrack Reasons
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Why the current run was abandoned in favor of the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BacktrackReason {
    /// The search driver asked to stop this path
    SearchEnds,
    /// The run succeeded and a forall search wants the next one
    Success,
    /// A required property did not hold on this path
    SpecUnsatisfied,
    /// No enabled thread was left to transfer to
    ThreadsAllEnded,
    /// The execution-tree node reached is already fully explored
    TreeNodeCovered,
    /// An `assume` failed
    AssumeFails,
    /// Waiting on the execution tree timed out
    Timeout,
    /// Another coroutine ended the run with an exception
    Exception,
    /// A thread exited outside its function
    PthExit,
    /// The run diverged from the schedule being replayed
    ReplayFails,
    /// Anything else
    Unknown,
}

impl fmt::Display for BacktrackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SearchEnds => "SEARCH_ENDS",
            Self::Success => "SUCCESS",
            Self::SpecUnsatisfied => "SPEC_UNSATISFIED",
            Self::ThreadsAllEnded => "THREADS_ALLENDED",
            Self::TreeNodeCovered => "TREENODE_COVERED",
            Self::AssumeFails => "ASSUME_FAILS",
            Self::Timeout => "TIMEOUT",
            Self::Exception => "EXCEPTION",
            Self::PthExit => "PTH_EXIT",
            Self::ReplayFails => "REPLAY_FAILS",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Test Failures
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Flavor of an assertion violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssertionKind {
    /// A user check failed
    Check,
    /// Threads stayed parked past every end-wait
    Deadlock,
}

/// A genuine test failure. Reported, never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} in {thread}: {message}{}", at_location(.location))]
pub struct AssertionViolation {
    /// Check or deadlock
    pub kind: AssertionKind,
    /// What failed
    pub message: String,
    /// Thread that observed the failure
    pub thread: ThreadId,
    /// Where the check was written
    pub location: Option<SourceLocation>,
}

impl fmt::Display for AssertionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Check => f.write_str("Assertion violated"),
            Self::Deadlock => f.write_str("DEADLOCK"),
        }
    }
}

fn at_location(location: &Option<SourceLocation>) -> String {
    location.as_ref().map(|loc| format!(" at {loc}")).unwrap_or_default()
}

impl AssertionViolation {
    /// A failed user check.
    pub fn check(message: impl Into<String>, thread: ThreadId, location: Option<SourceLocation>) -> Self {
        Self { kind: AssertionKind::Check, message: message.into(), thread, location }
    }

    /// Threads that never reached their end.
    pub fn deadlock(message: impl Into<String>) -> Self {
        Self { kind: AssertionKind::Deadlock, message: message.into(), thread: ThreadId::MAIN, location: None }
    }
}

/// Failure raised by the program under test, tagged with where it happened.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{thread} raised: {message}")]
pub struct PutError {
    /// Owning coroutine
    pub thread: ThreadId,
    /// Last known location of the thread
    pub location: Option<SourceLocation>,
    /// Panic payload or error text
    pub message: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine Errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Failures of the engine itself. Fatal: exploration stops.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// An engine invariant does not hold
    #[error("Internal error: {0}")]
    Internal(String),

    /// Control did not come back within the wait bound
    #[error("Timed out after {waited:?} waiting for control to return from {thread}")]
    Timeout {
        /// Thread holding control
        thread: ThreadId,
        /// How long the controller waited
        waited: Duration,
    },

    /// A replayed schedule names a thread the run never created
    #[error("Replay diverged: {0}")]
    ReplayDivergence(String),

    /// Reading or writing a schedule file failed
    #[error("Schedule file error: {0}")]
    ScheduleFile(String),

    /// A configuration value is out of range or malformed
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The OS refused to start a coroutine thread
    #[error("Failed to spawn coroutine {name}: {reason}")]
    Spawn {
        /// Requested thread name
        name: String,
        /// OS error text
        reason: String,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Interrupt
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything that can cut a controlled call short.
///
/// Code of the program under test propagates these with `?`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Interrupt {
    /// Abandon this run and try the next one
    #[error("Backtrack ({0})")]
    Backtrack(BacktrackReason),

    /// The test failed
    #[error(transparent)]
    Assertion(#[from] AssertionViolation),

    /// The program under test failed
    #[error(transparent)]
    Put(#[from] PutError),

    /// The controller is starting a new run
    #[error("Coroutine restart requested")]
    Restart,

    /// The controller is shutting the coroutine down
    #[error("Coroutine termination requested")]
    Terminate,

    /// The engine cannot go on
    #[error(transparent)]
    Fatal(#[from] EngineError),
}

impl Interrupt {
    /// Backtrack with the given reason.
    pub const fn backtrack(reason: BacktrackReason) -> Self {
        Self::Backtrack(reason)
    }

    /// Whether the search recovers from this by backtracking.
    pub const fn is_backtrack(&self) -> bool {
        matches!(self, Self::Backtrack(_))
    }

    /// Whether this is a restart/terminate control message.
    pub const fn is_control(&self) -> bool {
        matches!(self, Self::Restart | Self::Terminate)
    }

    /// Backtrack reason, if any.
    pub const fn reason(&self) -> Option<BacktrackReason> {
        match self {
            Self::Backtrack(reason) => Some(*reason),
            _ => None,
        }
    }
}

/// Result of a controlled call.
pub type ControlResult<T = ()> = Result<T, Interrupt>;

/// An interrupt raised inside a coroutine, with its owner and location.
///
/// Records chain when several coroutines fail within the same run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionRecord {
    /// Coroutine the interrupt was raised in
    pub owner: ThreadId,
    /// Where it was raised, when known
    pub location: Option<SourceLocation>,
    /// The interrupt itself
    pub error: Interrupt,
}

impl fmt::Display for ExceptionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(loc) => write!(f, "{} in {} at {loc}", self.error, self.owner),
            None => write!(f, "{} in {}", self.error, self.owner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_display() {
        assert_eq!(BacktrackReason::ThreadsAllEnded.to_string(), "THREADS_ALLENDED");
        assert_eq!(BacktrackReason::TreeNodeCovered.to_string(), "TREENODE_COVERED");
    }

    #[test]
    fn test_interrupt_classification() {
        let bt = Interrupt::backtrack(BacktrackReason::AssumeFails);
        assert!(bt.is_backtrack());
        assert_eq!(bt.reason(), Some(BacktrackReason::AssumeFails));

        let av: Interrupt = AssertionViolation::check("x == 3", ThreadId::MAIN, None).into();
        assert!(!av.is_backtrack());
        assert!(av.to_string().contains("x == 3"));

        assert!(Interrupt::Restart.is_control());
        assert!(!Interrupt::from(EngineError::Internal("cycle".into())).is_control());
    }

    #[test]
    fn test_deadlock_message() {
        let d = AssertionViolation::deadlock("2 threads never ended");
        assert_eq!(d.kind, AssertionKind::Deadlock);
        assert!(d.to_string().starts_with("DEADLOCK"));
    }
}
