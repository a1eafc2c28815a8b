//! Controller - the test case's handle on a run
//!
//! The controller is the `main` coroutine. It owns control between
//! transfers: it creates threads, sets the criteria for the next transfer
//! and hands control to one thread at a time.
//!
//! ```text
//! ctl.until("flag").except(t2).transfer_star()?
//!     │              │          │
//!     │              │          └─ pick a target, record the decision,
//!     │              │             hand over, wait for control back
//!     │              └─ the free choice of target skips t2
//!     └─ the target gives control back at its next "flag" yield
//! ```

use super::criteria::{Until, YieldPredicate};
use super::engine::{Engine, ThreadBody, ThreadFn};
use super::state::SearchMode;
use super::stats::names;
use super::thread_cx::ThreadCx;
use super::{Phase, TestCase};
use crate::domain::coroutine::{Message, Permit};
use crate::domain::error::{AssertionViolation, BacktrackReason, ControlResult, EngineError, Interrupt};
use crate::domain::exec_tree::{NodeKind, SelectMode};
use crate::domain::schedule::YieldPoint;
use crate::domain::types::{SourceLocation, ThreadId};
use crate::infrastructure::schedule_file;
use std::collections::BTreeSet;
use std::panic::Location;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace};

/// The test case's handle on the engine.
#[derive(Debug)]
pub struct Controller {
    engine: Arc<Engine>,
    permit: Option<Permit>,
}

impl Controller {
    pub(crate) fn new(engine: Arc<Engine>) -> Self {
        Self { engine, permit: Some(Permit::mint()) }
    }

    /// Id of the controller.
    pub fn id(&self) -> ThreadId {
        ThreadId::MAIN
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Threads
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    /// Create the next thread of this run. It does not run until a
    /// transfer picks it.
    pub fn create_thread<F>(&mut self, name: &str, f: F) -> ControlResult<ThreadId>
    where
        F: Fn(&ThreadCx) -> ControlResult + Send + Sync + 'static,
    {
        let func: ThreadFn = Arc::new(f);
        let body = Arc::new(ThreadBody { engine: Arc::downgrade(&self.engine), func });
        let wait = self.engine.max_wait();
        let id = self.engine.state.lock().group.create(name, body, wait)?;
        debug!(thread = %id, name, "thread created");
        Ok(id)
    }

    /// Whether every thread of this run has returned.
    pub fn all_ended(&self) -> bool {
        self.engine.state.lock().is_all_ended()
    }

    /// Threads that may receive control now.
    pub fn enabled_threads(&self) -> BTreeSet<ThreadId> {
        self.engine.state.lock().group.enabled_set()
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Criteria
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    fn set_until(&mut self, until: Until) -> &mut Self {
        self.engine.state.lock().criteria.until = until;
        self
    }

    /// The search decides where the target gives control back.
    pub fn until_star(&mut self) -> &mut Self {
        self.set_until(Until::Star)
    }

    /// The target gives control back at its next yield.
    pub fn until_first(&mut self) -> &mut Self {
        self.set_until(Until::First)
    }

    /// The target runs to the end of its function.
    pub fn until_end(&mut self) -> &mut Self {
        self.set_until(Until::End)
    }

    /// The target gives control back at a yield labelled `label`.
    pub fn until(&mut self, label: &str) -> &mut Self {
        self.set_until(Until::Label(label.to_string()))
    }

    /// The target gives control back where `cond` holds.
    pub fn until_cond(&mut self, cond: impl Fn(&YieldPoint) -> bool + Send + Sync + 'static) -> &mut Self {
        let cond: YieldPredicate = Arc::new(cond);
        self.set_until(Until::Cond(cond))
    }

    /// The next free choice of target skips `thread`.
    pub fn except(&mut self, thread: ThreadId) -> &mut Self {
        self.engine.state.lock().criteria.except.insert(thread);
        self
    }

    /// Stop at the first passing run.
    pub fn check_exists(&mut self) -> &mut Self {
        self.engine.state.lock().mode = SearchMode::Exists;
        self
    }

    /// Every run must pass.
    pub fn check_forall(&mut self) -> &mut Self {
        self.engine.state.lock().mode = SearchMode::Forall;
        self
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Transfers
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    /// Hand control to `thread` until the criteria stop it.
    #[track_caller]
    pub fn transfer(&mut self, thread: ThreadId) -> ControlResult<ThreadId> {
        let loc = SourceLocation::from_caller(Location::caller());
        self.transfer_inner(Some(thread), false, false, loc)
    }

    /// Hand control to a thread the search picks.
    #[track_caller]
    pub fn transfer_star(&mut self) -> ControlResult<ThreadId> {
        let loc = SourceLocation::from_caller(Location::caller());
        self.transfer_inner(None, true, false, loc)
    }

    /// Transfer to `thread`, recording the step in the execution tree.
    #[track_caller]
    pub fn transition(&mut self, thread: ThreadId) -> ControlResult<ThreadId> {
        let loc = SourceLocation::from_caller(Location::caller());
        self.transfer_inner(Some(thread), false, true, loc)
    }

    fn transfer_inner(
        &mut self,
        target: Option<ThreadId>,
        free: bool,
        publish: bool,
        loc: SourceLocation,
    ) -> ControlResult<ThreadId> {
        let chosen = {
            let mut st = self.engine.state.lock();
            let tree_mode = st.tree_mode();
            let target = if tree_mode && free {
                let candidates = st.candidates();
                if candidates.is_empty() {
                    return Err(st.no_target());
                }
                let mode = SelectMode::Forall;
                let (_, index) = self
                    .engine
                    .tree
                    .decide_first_uncovered(NodeKind::SelectThread { mode, threads: candidates.clone() })?;
                candidates.get(index).copied()
            } else {
                target
            };
            if let (true, true, Some(thread)) = (tree_mode, publish, target) {
                self.engine.tree.publish(NodeKind::Transition { thread })?;
            }
            st.main_transfer(target, free, Some(loc))?
        };
        self.resume(chosen)?;
        Ok(chosen)
    }

    /// Deliver the permit to `thread` and wait for it to come back.
    fn resume(&mut self, thread: ThreadId) -> ControlResult {
        let wait = self.engine.max_wait();
        self.hand_over(thread)?;
        match self.engine.await_main(thread, wait) {
            Some((permit, result)) => {
                self.permit = permit.or(self.permit.take());
                result
            }
            None => Err(EngineError::Timeout { thread, waited: wait }.into()),
        }
    }

    fn hand_over(&mut self, thread: ThreadId) -> ControlResult {
        let co = self
            .engine
            .state
            .lock()
            .group
            .coroutine(thread)
            .cloned()
            .ok_or_else(|| EngineError::Internal(format!("no coroutine for {thread}")))?;
        let permit = self
            .permit
            .take()
            .ok_or_else(|| EngineError::Internal("main transfers without control".into()))?;
        self.engine.stats.increment(names::TRANSFERS, 1);
        trace!(to = %thread, "main hands over");
        co.deliver(Message::Transfer(permit), self.engine.max_wait())?;
        Ok(())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Choices & Checks
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    /// Pick a value in `0..arity`.
    pub fn choose(&mut self, arity: u32) -> ControlResult<u32> {
        let mut st = self.engine.state.lock();
        if st.tree_mode() {
            let (_, index) = self.engine.tree.decide_first_uncovered(NodeKind::Choice { arity: arity as usize })?;
            return u32::try_from(index).map_err(|_| EngineError::Internal(format!("choice {index} out of range")).into());
        }
        st.choose(ThreadId::MAIN, arity)
    }

    /// Pick one enabled thread; it is enough for one pick to pass.
    pub fn select_exists(&mut self) -> ControlResult<ThreadId> {
        let mut st = self.engine.state.lock();
        let candidates = st.candidates();
        if candidates.is_empty() {
            return Err(st.no_target());
        }
        let index = if st.tree_mode() {
            let kind = NodeKind::SelectThread { mode: SelectMode::Exists, threads: candidates.clone() };
            self.engine.tree.decide_first_uncovered(kind)?.1
        } else {
            let arity = u32::try_from(candidates.len())
                .map_err(|_| EngineError::Internal("too many candidates".into()))?;
            st.choose(ThreadId::MAIN, arity)? as usize
        };
        candidates
            .get(index)
            .copied()
            .ok_or_else(|| EngineError::Internal(format!("selection {index} out of range")).into())
    }

    /// Branch on `cond`, recording the branch in the execution tree.
    pub fn conditional(&mut self, cond: bool) -> ControlResult<bool> {
        if self.engine.state.lock().tree_mode() {
            self.engine.tree.decide(NodeKind::Conditional, |_| Some(usize::from(cond)))?;
        }
        Ok(cond)
    }

    /// Fail the test unless `cond` holds.
    #[track_caller]
    pub fn check(&mut self, cond: bool, message: &str) -> ControlResult {
        if cond {
            return Ok(());
        }
        let loc = SourceLocation::from_caller(Location::caller());
        Err(AssertionViolation::check(message, ThreadId::MAIN, Some(loc)).into())
    }

    /// Same as [`check`](Self::check).
    #[track_caller]
    pub fn assert_that(&mut self, cond: bool, message: &str) -> ControlResult {
        self.check(cond, message)
    }

    /// Abandon the run unless `cond` holds.
    pub fn assume(&mut self, cond: bool) -> ControlResult {
        if cond {
            Ok(())
        } else {
            Err(Interrupt::backtrack(BacktrackReason::AssumeFails))
        }
    }

    /// Follow the schedule saved at `path` from the current position.
    ///
    /// The file is read once; its points are appended whenever the
    /// schedule has nothing left to replay.
    pub fn run_saved_schedule(&mut self, path: impl AsRef<Path>) -> ControlResult {
        let path = path.as_ref();
        let mut st = self.engine.state.lock();
        if st.schedule.has_current() {
            return Ok(());
        }
        if !st.loaded.contains_key(path) {
            let loaded = schedule_file::load(path)?;
            st.loaded.insert(path.to_path_buf(), loaded);
        }
        let st = &mut *st;
        if let Some(loaded) = st.loaded.get(path) {
            st.schedule.extend_points(loaded);
        }
        Ok(())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Runs
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    /// Set up, run and tear down `test` once over the current schedule.
    pub(crate) fn run_once<T: TestCase + ?Sized>(&mut self, test: &mut T) -> ControlResult {
        self.engine.set_phase(Phase::SetUp);
        test.set_up(self)?;
        self.engine.set_phase(Phase::Controlled);
        test.run(self)?;
        self.engine.set_phase(Phase::Uncontrolled);
        self.finish_uncontrolled()?;
        self.engine.set_phase(Phase::TearDown);
        test.tear_down(self)
    }

    /// Run every thread still alive to its end.
    ///
    /// A thread that keeps control past `max_wait` is recalled at its next
    /// yield and skipped; threads nobody can wake are waited for on their
    /// end semaphore. Too many timeouts is a deadlock.
    fn finish_uncontrolled(&mut self) -> ControlResult {
        let wait = self.engine.max_wait();
        let limit = u64::from(self.engine.config.max_timeouts_before_deadlock);
        let mut timeouts = 0u64;
        let mut stalled = BTreeSet::new();

        loop {
            let (pending, next) = {
                let st = self.engine.state.lock();
                (st.group.pending(), st.group.get_next_enabled(&stalled, None))
            };
            if pending.is_empty() {
                return Ok(());
            }

            match next {
                Some(thread) => {
                    let chosen = {
                        let mut st = self.engine.state.lock();
                        st.criteria.until = Until::End;
                        st.main_transfer(Some(thread), false, None)?
                    };
                    if !self.resume_or_recall(chosen)? {
                        stalled.insert(chosen);
                        timeouts += 1;
                    }
                }
                None => {
                    let cos: Vec<_> = {
                        let st = self.engine.state.lock();
                        pending.iter().filter_map(|&t| st.group.coroutine(t).cloned()).collect()
                    };
                    for co in cos {
                        if !co.wait_for_end(wait) {
                            timeouts += 1;
                        }
                    }
                    stalled.clear();
                }
            }

            if timeouts > 0 {
                self.engine.stats.increment(names::TIMEOUTS, timeouts);
            }
            if timeouts > limit {
                let names: Vec<String> = pending.iter().map(ToString::to_string).collect();
                return Err(AssertionViolation::deadlock(format!(
                    "{} never ended after {timeouts} timed-out waits",
                    names.join(", ")
                ))
                .into());
            }
        }
    }

    /// Like `resume`, but a thread that does not hand back in time is
    /// recalled once. Returns false when the recall was needed.
    fn resume_or_recall(&mut self, thread: ThreadId) -> ControlResult<bool> {
        let wait = self.engine.max_wait();
        self.hand_over(thread)?;
        let mut recalled = false;
        loop {
            if let Some((permit, result)) = self.engine.await_main(thread, wait) {
                self.permit = permit.or(self.permit.take());
                return result.map(|()| !recalled);
            }
            if recalled {
                return Err(EngineError::Timeout { thread, waited: wait }.into());
            }
            debug!(thread = %thread, "no handback in time; recalling");
            if let Some(co) = self.engine.state.lock().group.coroutine(thread) {
                co.request_recall();
            }
            recalled = true;
        }
    }
}
