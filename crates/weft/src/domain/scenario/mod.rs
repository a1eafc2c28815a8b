//! Scenario Module - runs a test case under every schedule the search picks
//!
//! # Module Structure
//!
//! ```text
//! domain/scenario/
//! ├── criteria.rs    Until / Except: where a transfer ends
//! ├── state.rs       yield protocol, main transfers, schedule backtracking
//! ├── engine.rs      what the controller and the coroutines share
//! ├── thread_cx.rs   handle of a program thread
//! ├── controller.rs  handle of the test case (main)
//! ├── search.rs      exhaustive / context-bounded / sequential drivers
//! ├── result.rs      classified outcomes
//! └── stats.rs       counters, averages, timers
//! ```
//!
//! # Life of a Scenario
//!
//! ```text
//! Begin ─> SetUp ─> Controlled ─> Uncontrolled ─> TearDown ─┐
//!            ^                                              │
//!            └──────── restart (next schedule) <────────────┤
//!                                                           v
//!                                              Ended | Terminated
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use std::sync::Arc;
//! use weft::{Address, Controller, ControlResult, EngineConfig, Scenario};
//!
//! let scenario = Scenario::new("racy counter", EngineConfig::default()).unwrap();
//! let counter = Arc::new(AtomicU64::new(0));
//! let result = scenario
//!     .explore(&mut |ctl: &mut Controller| -> ControlResult {
//!         counter.store(0, Ordering::SeqCst);
//!         for name in ["a", "b"] {
//!             let c = Arc::clone(&counter);
//!             ctl.create_thread(name, move |cx| {
//!                 cx.read(Address::of(&*c))?;
//!                 let v = c.load(Ordering::SeqCst);
//!                 cx.write(Address::of(&*c))?;
//!                 c.store(v + 1, Ordering::SeqCst);
//!                 Ok(())
//!             })?;
//!         }
//!         ctl.exhaustive_search()?;
//!         let v = counter.load(Ordering::SeqCst);
//!         ctl.check(v == 2, "lost update")
//!     })
//!     .unwrap();
//! assert!(!result.is_success());
//! ```

pub mod controller;
pub mod criteria;
pub(crate) mod engine;
pub mod result;
pub mod search;
pub mod state;
pub mod stats;
pub mod thread_cx;

pub use controller::Controller;
pub use criteria::{TransferCriteria, Until, YieldPredicate};
pub use engine::ThreadFn;
pub use result::{ExploreResult, Outcome};
pub use state::{ScenarioState, SearchMode};
pub use stats::{names as stat_names, Average, Statistics, StatsSnapshot};
pub use thread_cx::{ThreadCx, FORCE_LABEL, READ_LABEL, WRITE_LABEL};

use crate::domain::dpor::Coverage;
use crate::domain::error::{ControlResult, EngineError, ExceptionRecord, Interrupt};
use crate::domain::schedule::Schedule;
use crate::domain::types::ThreadId;
use crate::infrastructure::config::{EngineConfig, SearchStrategy};
use crate::infrastructure::schedule_file;
use engine::Engine;
use stats::names;
use std::sync::Arc;
use tracing::{debug, info, warn};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Test Case
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A test run by a scenario.
///
/// Every method runs once per explored schedule. State the threads share
/// must be reset in `set_up` (or at the top of `run`).
pub trait TestCase {
    /// Prepare one run.
    fn set_up(&mut self, _ctl: &mut Controller) -> ControlResult {
        Ok(())
    }

    /// Create threads and drive them.
    fn run(&mut self, ctl: &mut Controller) -> ControlResult;

    /// Check the result of one run.
    fn tear_down(&mut self, _ctl: &mut Controller) -> ControlResult {
        Ok(())
    }
}

impl<F> TestCase for F
where
    F: FnMut(&mut Controller) -> ControlResult,
{
    fn run(&mut self, ctl: &mut Controller) -> ControlResult {
        self(ctl)
    }
}

/// Where a scenario is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// Created, nothing run yet
    #[default]
    Begin,
    /// In `TestCase::set_up`
    SetUp,
    /// In `TestCase::run`
    Controlled,
    /// Finishing the threads the test case left running
    Uncontrolled,
    /// In `TestCase::tear_down`
    TearDown,
    /// Exploration finished with a result
    Ended,
    /// Exploration stopped on an engine failure
    Terminated,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Passing forall paths seen so far.
#[derive(Debug, Default)]
struct ForallPaths {
    schedules: Vec<Schedule>,
    paths: u64,
    coverage: Coverage,
}

impl ForallPaths {
    fn absorb(&mut self, schedule: Schedule, keep_all: bool) -> bool {
        self.paths += 1;
        let added = self.coverage.absorb(schedule.coverage());
        let keep = added > 0 || keep_all || self.schedules.is_empty();
        if keep {
            self.schedules.push(schedule);
        }
        keep
    }

    fn into_outcome(self) -> Outcome {
        if self.paths == 0 {
            Outcome::NoFeasibleExecution
        } else {
            Outcome::Forall { schedules: self.schedules, num_paths: self.paths, coverage: self.coverage }
        }
    }
}

/// A named test scenario and the engine that explores it.
#[derive(Debug)]
pub struct Scenario {
    name: String,
    engine: Arc<Engine>,
}

impl Scenario {
    /// Scenario with a validated `config`.
    pub fn new(name: impl Into<String>, config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self { name: name.into(), engine: Engine::new(config) })
    }

    /// Scenario name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Engine settings.
    pub fn config(&self) -> &EngineConfig {
        &self.engine.config
    }

    /// Live statistics.
    pub fn stats(&self) -> &Statistics {
        &self.engine.stats
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.engine.phase()
    }

    /// Run `test` under schedules picked by the search until the result is
    /// decided.
    ///
    /// # Errors
    ///
    /// Engine failures only (timeouts, replay divergence, broken
    /// invariants); test failures are outcomes.
    pub fn explore<T: TestCase + ?Sized>(&self, test: &mut T) -> Result<ExploreResult, EngineError> {
        let engine = &self.engine;
        let timer = engine.stats.time(names::EXPLORE_TIME);
        let single = engine.config.run_uncontrolled;
        let keep_all = engine.config.keep_all_schedules;
        let mut forall = ForallPaths::default();
        let mut runs = 0u64;
        info!(scenario = %self.name, dpor = engine.config.dpor, search = ?engine.config.search, "exploring");

        let outcome = loop {
            if engine.config.max_runs.is_some_and(|max| runs >= max) {
                info!(scenario = %self.name, runs, "run limit reached");
                break forall.into_outcome();
            }

            let (result, schedule, mode) = match self.run_once(test) {
                Ok(run) => run,
                Err(e) => {
                    self.shut_down(Phase::Terminated);
                    return Err(e);
                }
            };
            runs += 1;

            match result {
                Ok(()) if mode == SearchMode::Exists => break Outcome::Exists { schedule },
                Ok(()) => {
                    let kept = forall.absorb(schedule, keep_all);
                    engine.stats.increment(names::PATHS, 1);
                    if kept {
                        engine.stats.increment(names::KEPT_PATHS, 1);
                    }
                    debug!(run = runs, kept, "path passed");
                    if single || !engine.backtrack() {
                        break forall.into_outcome();
                    }
                }
                Err(Interrupt::Backtrack(reason)) => {
                    debug!(run = runs, %reason, "run abandoned");
                    if single || !engine.backtrack() {
                        break forall.into_outcome();
                    }
                }
                Err(Interrupt::Fatal(e)) => {
                    self.shut_down(Phase::Terminated);
                    return Err(e);
                }
                Err(Interrupt::Restart | Interrupt::Terminate) => {
                    self.shut_down(Phase::Terminated);
                    return Err(EngineError::Internal("controller received a coroutine control message".into()));
                }
                Err(failure) => break self.classify_failure(failure, schedule),
            }
        };

        drop(timer);
        engine.stats.set(names::TREE_NODES, engine.tree.node_count() as u64);
        self.shut_down(Phase::Ended);
        let result = ExploreResult { name: self.name.clone(), outcome, stats: engine.stats.snapshot(), runs };
        info!(scenario = %self.name, result = %result.outcome, runs, "exploration finished");
        Ok(result)
    }

    /// Run `test` once following `schedule`; past its end the run takes
    /// the first choice everywhere.
    ///
    /// # Errors
    ///
    /// `ReplayDivergence` when the schedule names threads the run never
    /// creates, and engine failures.
    pub fn replay<T: TestCase + ?Sized>(&self, test: &mut T, schedule: &Schedule) -> Result<ExploreResult, EngineError> {
        let engine = &self.engine;
        let strategy = {
            let mut st = engine.state.lock();
            std::mem::replace(&mut st.strategy, SearchStrategy::Schedule)
        };
        {
            let mut st = engine.state.lock();
            st.schedule = schedule.clone();
        }
        info!(scenario = %self.name, points = schedule.len(), "replaying schedule");
        let run = self.run_once(test);
        engine.state.lock().strategy = strategy;

        let (result, recorded, mode) = match run {
            Ok(run) => run,
            Err(e) => {
                self.shut_down(Phase::Terminated);
                return Err(e);
            }
        };
        let outcome = match result {
            Ok(()) if mode == SearchMode::Exists => Outcome::Exists { schedule: recorded },
            Ok(()) => {
                let mut forall = ForallPaths::default();
                forall.absorb(recorded, true);
                forall.into_outcome()
            }
            Err(Interrupt::Backtrack(reason)) => {
                debug!(%reason, "replayed run abandoned");
                Outcome::NoFeasibleExecution
            }
            Err(Interrupt::Fatal(e)) => {
                self.shut_down(Phase::Terminated);
                return Err(e);
            }
            Err(Interrupt::Restart | Interrupt::Terminate) => {
                self.shut_down(Phase::Terminated);
                return Err(EngineError::Internal("controller received a coroutine control message".into()));
            }
            Err(failure) => self.classify_failure(failure, recorded),
        };
        self.shut_down(Phase::Ended);
        let result = ExploreResult { name: self.name.clone(), outcome, stats: engine.stats.snapshot(), runs: 1 };
        info!(scenario = %self.name, result = %result.outcome, "replay finished");
        Ok(result)
    }

    /// One run over the current schedule. The outer error is a failure to
    /// even start the run.
    fn run_once<T: TestCase + ?Sized>(
        &self,
        test: &mut T,
    ) -> Result<(ControlResult, Schedule, SearchMode), EngineError> {
        let engine = &self.engine;
        engine.restart_run();
        engine.stats.increment(names::RUNS, 1);

        let mut ctl = Controller::new(Arc::clone(engine));
        let result = ctl.run_once(test);

        let (schedule, mode, tree_mode, raised) = {
            let st = engine.state.lock();
            let raised = match &result {
                Err(e) => st.exceptions.iter().any(|r| r.error == *e),
                Ok(()) => false,
            };
            (st.schedule.clone(), st.mode, st.tree_mode(), raised)
        };
        engine.stats.sample(names::POINTS_PER_RUN, schedule.len() as f64);

        if tree_mode {
            let record = match &result {
                Err(e) if !raised && !e.is_backtrack() && !e.is_control() => {
                    Some(ExceptionRecord { owner: ThreadId::MAIN, location: None, error: e.clone() })
                }
                _ => None,
            };
            if let Err(e) = engine.tree.end_run(record) {
                debug!(error = %e, "run ended on a covered or contended path");
            }
        }
        Ok((result, schedule, mode))
    }

    fn classify_failure(&self, failure: Interrupt, schedule: Schedule) -> Outcome {
        if let Some(path) = &self.engine.config.save_failing_schedule {
            match schedule_file::save(&schedule, path) {
                Ok(records) => info!(path = %path.display(), records, "failing schedule saved"),
                Err(e) => warn!(path = %path.display(), error = %e, "could not save failing schedule"),
            }
        }
        match failure {
            Interrupt::Assertion(violation) => Outcome::AssertionViolation { violation, schedule },
            Interrupt::Put(error) => Outcome::RuntimeException { error, schedule },
            other => {
                warn!(error = %other, "unclassified failure");
                Outcome::NoFeasibleExecution
            }
        }
    }

    fn shut_down(&self, phase: Phase) {
        let wait = self.engine.max_wait();
        self.engine.state.lock().group.finish_all(wait);
        self.engine.set_phase(phase);
    }
}

impl Drop for Scenario {
    fn drop(&mut self) {
        let wait = self.engine.max_wait();
        self.engine.state.lock().group.finish_all(wait);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::BacktrackReason;
    use crate::domain::types::Address;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    fn config() -> EngineConfig {
        EngineConfig::default().with_max_wait(Duration::from_secs(5))
    }

    #[test]
    fn test_single_thread_exists() {
        let scenario = Scenario::new("single", config()).unwrap();
        let hits = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&hits);
        let result = scenario
            .explore(&mut |ctl: &mut Controller| -> ControlResult {
                let hits = Arc::clone(&seen);
                let t = ctl.create_thread("worker", move |cx| {
                    cx.yield_at("step")?;
                    hits.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })?;
                ctl.until_end().transfer(t)?;
                ctl.check(ctl.all_ended(), "worker still running")
            })
            .unwrap();

        assert!(matches!(result.outcome, Outcome::Exists { .. }));
        assert_eq!(result.runs, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(scenario.phase(), Phase::Ended);
    }

    #[test]
    fn test_assertion_in_thread_is_classified() {
        let scenario = Scenario::new("fails", config()).unwrap();
        let result = scenario
            .explore(&mut |ctl: &mut Controller| -> ControlResult {
                let t = ctl.create_thread("bad", |cx| cx.assert_that(false, "always fails"))?;
                ctl.until_end().transfer(t)?;
                Ok(())
            })
            .unwrap();

        match result.outcome {
            Outcome::AssertionViolation { violation, .. } => {
                assert_eq!(violation.message, "always fails");
                assert_eq!(violation.thread, ThreadId::new(1));
            }
            other => panic!("unexpected outcome {other}"),
        }
    }

    #[test]
    fn test_panic_becomes_runtime_exception() {
        let scenario = Scenario::new("panics", config()).unwrap();
        let result = scenario
            .explore(&mut |ctl: &mut Controller| -> ControlResult {
                let t = ctl.create_thread("boom", |_cx| panic!("kaboom"))?;
                ctl.until_end().transfer(t)?;
                Ok(())
            })
            .unwrap();

        match result.outcome {
            Outcome::RuntimeException { error, .. } => assert!(error.message.contains("kaboom")),
            other => panic!("unexpected outcome {other}"),
        }
    }

    #[test]
    fn test_assume_everywhere_is_infeasible() {
        let scenario = Scenario::new("infeasible", config()).unwrap();
        let result = scenario
            .explore(&mut |ctl: &mut Controller| -> ControlResult {
                ctl.check_exists();
                let pick = ctl.choose(3)?;
                ctl.assume(pick > 5)
            })
            .unwrap();

        assert!(matches!(result.outcome, Outcome::NoFeasibleExecution));
        assert_eq!(result.runs, 3);
    }

    #[test]
    fn test_exists_finds_the_passing_choice() {
        let scenario = Scenario::new("exists", config()).unwrap();
        let result = scenario
            .explore(&mut |ctl: &mut Controller| -> ControlResult {
                ctl.check_exists();
                let pick = ctl.choose(4)?;
                ctl.assume(pick == 2)
            })
            .unwrap();

        assert!(result.is_success());
        assert_eq!(result.runs, 3);
    }

    #[test]
    fn test_forall_over_two_threads() {
        let scenario = Scenario::new("interleavings", config()).unwrap();
        let cell = Arc::new(AtomicU64::new(0));
        let result = scenario
            .explore(&mut |ctl: &mut Controller| -> ControlResult {
                cell.store(0, Ordering::SeqCst);
                for name in ["a", "b"] {
                    let c = Arc::clone(&cell);
                    ctl.create_thread(name, move |cx| {
                        cx.write(Address::of(&*c))?;
                        c.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })?;
                }
                ctl.exhaustive_search()?;
                ctl.check(cell.load(Ordering::SeqCst) == 2, "atomic adds lost")
            })
            .unwrap();

        match &result.outcome {
            Outcome::Forall { num_paths, .. } => assert!(*num_paths >= 2),
            other => panic!("unexpected outcome {other}"),
        }
        assert!(result.stats.counter(names::BACKTRACKS) >= 1);
    }

    #[test]
    fn test_max_runs_stops_the_search() {
        let scenario = Scenario::new("bounded", config().with_max_runs(2)).unwrap();
        let result = scenario
            .explore(&mut |ctl: &mut Controller| -> ControlResult {
                ctl.check_forall();
                ctl.choose(10)?;
                Ok(())
            })
            .unwrap();

        assert_eq!(result.runs, 2);
        assert!(matches!(result.outcome, Outcome::Forall { num_paths: 2, .. }));
    }

    #[test]
    fn test_uncontrolled_runs_threads_one_after_another() {
        let mut cfg = config();
        cfg.run_uncontrolled = true;
        let scenario = Scenario::new("smoke", cfg).unwrap();
        let counter = Arc::new(AtomicU64::new(0));
        let result = scenario
            .explore(&mut |ctl: &mut Controller| -> ControlResult {
                counter.store(0, Ordering::SeqCst);
                for name in ["a", "b"] {
                    let c = Arc::clone(&counter);
                    ctl.create_thread(name, move |cx| {
                        cx.read(Address::of(&*c))?;
                        let v = c.load(Ordering::SeqCst);
                        cx.write(Address::of(&*c))?;
                        c.store(v + 1, Ordering::SeqCst);
                        Ok(())
                    })?;
                }
                ctl.exhaustive_search()?;
                ctl.check(counter.load(Ordering::SeqCst) == 2, "lost update")
            })
            .unwrap();

        assert_eq!(result.runs, 1);
        assert!(matches!(result.outcome, Outcome::Forall { num_paths: 1, .. }));
    }

    #[test]
    fn test_context_bound_zero_is_rejected() {
        let scenario = Scenario::new("cb0", config()).unwrap();
        let err = scenario
            .explore(&mut |ctl: &mut Controller| -> ControlResult { ctl.context_bounded_search(0) })
            .unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
        assert_eq!(scenario.phase(), Phase::Terminated);
    }

    #[test]
    fn test_deadlock_on_blocked_thread() {
        let scenario = Scenario::new("stuck", config().with_max_wait(Duration::from_millis(300))).unwrap();
        let result = scenario
            .explore(&mut |ctl: &mut Controller| -> ControlResult {
                let t = ctl.create_thread("waiter", |cx| cx.wait_until("never", || false))?;
                ctl.until_end().transfer(t)?;
                Ok(())
            })
            .unwrap();

        match result.outcome {
            Outcome::AssertionViolation { violation, .. } => {
                assert_eq!(violation.kind, crate::domain::error::AssertionKind::Deadlock);
            }
            other => panic!("unexpected outcome {other}"),
        }
    }

    #[test]
    fn test_replay_reproduces_choices() {
        let scenario = Scenario::new("replay", config()).unwrap();
        let mut test = |ctl: &mut Controller| -> ControlResult {
            ctl.check_exists();
            let a = ctl.choose(3)?;
            let b = ctl.choose(3)?;
            ctl.assume(a == 2 && b == 1)
        };
        let found = scenario.explore(&mut test).unwrap();
        let schedule = found.outcome.schedule().cloned().unwrap();

        let replayed = scenario.replay(&mut test, &schedule).unwrap();
        assert!(replayed.is_success());
        assert_eq!(replayed.runs, 1);
    }

    #[test]
    fn test_replay_keeps_forall_mode() {
        let scenario = Scenario::new("replay forall", config()).unwrap();
        let mut test = |ctl: &mut Controller| -> ControlResult {
            ctl.check_forall();
            ctl.choose(2)?;
            Ok(())
        };
        let explored = scenario.explore(&mut test).unwrap();
        assert!(matches!(explored.outcome, Outcome::Forall { num_paths: 2, .. }));
        let schedule = explored.outcome.schedule().cloned().unwrap();

        let replayed = scenario.replay(&mut test, &schedule).unwrap();
        assert!(matches!(replayed.outcome, Outcome::Forall { num_paths: 1, .. }), "got {}", replayed.outcome);
        assert_eq!(replayed.runs, 1);
    }

    #[test]
    fn test_backtrack_reason_is_not_a_failure() {
        let scenario = Scenario::new("assume", config()).unwrap();
        let result = scenario
            .explore(&mut |_ctl: &mut Controller| -> ControlResult {
                Err(Interrupt::backtrack(BacktrackReason::AssumeFails))
            })
            .unwrap();
        assert!(matches!(result.outcome, Outcome::NoFeasibleExecution));
    }
}
