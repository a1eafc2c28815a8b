//! ScenarioState - schedule bookkeeping shared by every coroutine
//!
//! Only the coroutine holding the permit locks the state, and it never
//! holds the lock across a handoff.
//!
//! # Yield of a program thread
//!
//! ```text
//! cursor at a transfer of this thread with this label?
//! ├─ yes: count down; at zero hand control to main (replay)
//! └─ no:  in fresh territory and the criteria say stop?
//!         ├─ yes: turn the yield into a transfer to main
//!         └─ no:  record a bare yield (merged with the previous one
//!                 when it has the same label) and keep running
//! ```
//!
//! # Backtracking
//!
//! Points are popped from the tail until one still has an alternative:
//! a choice with a next value, a preemption with a smaller count, a main
//! transfer with an untried target, or a bare yield (which becomes a
//! preemption).

use super::criteria::TransferCriteria;
use crate::domain::coroutine::{Coroutine, CoroutineGroup};
use crate::domain::dpor::VcTracker;
use crate::domain::error::{AssertionViolation, BacktrackReason, ControlResult, EngineError, ExceptionRecord, Interrupt};
use crate::domain::schedule::{ChoicePoint, PointId, Schedule, SchedulePoint, TransferPoint, YieldPoint};
use crate::domain::types::{SharedAccess, SourceLocation, ThreadId, ENDING_LABEL, MAIN_LABEL};
use crate::infrastructure::config::{EngineConfig, SearchStrategy};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, trace};

/// How a scenario judges its runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    /// Stop at the first passing run
    #[default]
    Exists,
    /// Every run must pass
    Forall,
}

/// A program thread reached a yield.
#[derive(Debug, Clone)]
pub struct YieldRequest<'a> {
    /// Yielding thread
    pub thread: ThreadId,
    /// Label of the yield
    pub label: &'a str,
    /// Where it happened
    pub loc: Option<SourceLocation>,
    /// Access about to be made
    pub access: Option<SharedAccess>,
    /// The thread insists on giving control back
    pub forced: bool,
    /// The execution tree decided to preempt here
    pub preempt: bool,
}

/// What the yielding thread does next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YieldOutcome {
    /// Point the yield was recorded at
    pub point: Option<PointId>,
    /// Whether control goes back to main
    pub transfer: bool,
}

fn backtrack(reason: BacktrackReason) -> Interrupt {
    Interrupt::backtrack(reason)
}

fn internal(msg: impl Into<String>) -> Interrupt {
    EngineError::Internal(msg.into()).into()
}

/// Per-scenario state behind the engine lock.
#[derive(Debug)]
pub struct ScenarioState {
    /// Decisions of the current run plus the alternatives still to try
    pub schedule: Schedule,
    /// Vector clocks of the current run
    pub tracker: VcTracker,
    /// Threads of the scenario
    pub group: CoroutineGroup,
    /// Conditions of the current transfer
    pub criteria: TransferCriteria,
    /// Exists or forall
    pub mode: SearchMode,
    /// Alternative targets come from DPOR backtrack sets
    pub dpor: bool,
    /// Schedule or tree search
    pub strategy: SearchStrategy,
    /// Every yield passes through
    pub uncontrolled: bool,
    /// Exceptions raised by coroutines this run
    pub exceptions: Vec<ExceptionRecord>,
    /// Schedule files read so far
    pub loaded: HashMap<PathBuf, Schedule>,
}

impl ScenarioState {
    /// State for a scenario driven from `main`.
    pub fn new(main: Arc<Coroutine>, config: &EngineConfig) -> Self {
        Self {
            schedule: Schedule::new(),
            tracker: VcTracker::new(),
            group: CoroutineGroup::new(main),
            criteria: TransferCriteria::default(),
            mode: SearchMode::default(),
            dpor: config.dpor,
            strategy: config.search,
            uncontrolled: config.run_uncontrolled,
            exceptions: Vec::new(),
            loaded: HashMap::new(),
        }
    }

    /// Prepare for the next run over the remaining schedule.
    pub fn restart(&mut self) {
        match self.strategy {
            SearchStrategy::Schedule => self.schedule.restart(),
            SearchStrategy::Tree => self.schedule = Schedule::new(),
        }
        self.tracker.restart();
        self.group.restart();
        self.criteria.reset();
        self.mode = SearchMode::default();
        self.exceptions.clear();
    }

    /// Check the placeholders of a loaded point against the live group.
    fn resolve(&mut self, id: PointId) -> ControlResult<()> {
        let point = self.schedule.point(id).ok_or_else(|| internal(format!("dangling point {id:?}")))?;
        if point.is_resolved() {
            return Ok(());
        }
        let source = point.source();
        let target = point.as_transfer().and_then(|t| t.target);
        for thread in std::iter::once(source).chain(target) {
            if !self.group.contains(thread) {
                return Err(EngineError::ReplayDivergence(format!(
                    "schedule names {thread}, which this run never created"
                ))
                .into());
            }
        }
        match self.schedule.point_mut(id) {
            Some(SchedulePoint::Yield(y)) => y.resolved = true,
            Some(SchedulePoint::Transfer(t)) => {
                t.at.resolved = true;
                t.target_resolved = true;
            }
            _ => {}
        }
        Ok(())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Program Threads
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    /// Decide what a yield of a program thread does.
    pub fn thread_yield(&mut self, req: YieldRequest<'_>) -> ControlResult<YieldOutcome> {
        let tid = req.thread;
        let ending = req.label == ENDING_LABEL;
        if self.uncontrolled {
            return Ok(YieldOutcome { point: None, transfer: ending || req.forced });
        }
        let resumed_by = self.group.member(tid).and_then(|m| m.resumed_by);

        if let Some(cur) = self.schedule.current() {
            self.resolve(cur)?;
            if let Some(SchedulePoint::Transfer(t)) = self.schedule.point_mut(cur) {
                if t.at.source != tid {
                    debug!(expected = %t.at.source, got = %tid, "replay diverged: wrong thread yielded");
                    return Err(backtrack(BacktrackReason::ReplayFails));
                }
                if t.at.label == req.label {
                    t.at.loc = req.loc;
                    t.at.access = req.access.map(|mut a| {
                        a.time = 0;
                        a
                    });
                    t.at.prev = resumed_by;
                    if !t.consume_once() {
                        self.group.set_yield_point(tid, Some(cur));
                        return Ok(YieldOutcome { point: Some(cur), transfer: false });
                    }
                    if !(req.forced || self.criteria.until.holds(&t.at, true)) {
                        return Err(backtrack(BacktrackReason::SpecUnsatisfied));
                    }
                    self.schedule.consume_current();
                    self.take_transfer(cur, ThreadId::MAIN)?;
                    return Ok(YieldOutcome { point: Some(cur), transfer: true });
                }
            }
        }

        let fresh = !self.schedule.has_current();
        if (ending || req.forced) && !fresh {
            debug!(thread = %tid, label = req.label, "replay diverged: unrecorded handoff");
            return Err(backtrack(BacktrackReason::ReplayFails));
        }

        let merge = self.schedule.previous().filter(|&id| {
            matches!(self.schedule.point(id), Some(SchedulePoint::Yield(y)) if y.source == tid && y.label == req.label)
        });
        let count = merge
            .and_then(|id| self.schedule.point(id))
            .and_then(SchedulePoint::as_yield)
            .map_or(1, |y| y.count + 1);

        let stop = fresh && {
            let mut point = YieldPoint::new(tid, req.label, req.loc.clone(), req.access);
            point.count = count;
            req.forced || req.preempt || self.criteria.until.holds(&point, false)
        };

        if !stop && ending {
            return Err(backtrack(BacktrackReason::SearchEnds));
        }

        let id = match merge {
            Some(id) => {
                if let Some(y) = self.schedule.point_mut(id).and_then(SchedulePoint::as_yield_mut) {
                    y.coalesce(req.loc, req.access);
                }
                id
            }
            None => {
                let mut y = YieldPoint::new(tid, req.label, req.loc, req.access);
                y.prev = resumed_by;
                y.free_count = self.criteria.until.is_star();
                let id = self.schedule.alloc(SchedulePoint::Yield(y));
                self.schedule.add_current(id, true);
                id
            }
        };
        self.group.set_yield_point(tid, Some(id));

        if !stop {
            return Ok(YieldOutcome { point: Some(id), transfer: false });
        }

        // The merged yield becomes the transfer in place, so accesses the
        // tracker recorded against it stay reachable.
        let converted = match self.schedule.point(id) {
            Some(SchedulePoint::Yield(y)) => {
                let mut transfer = TransferPoint::new(y.clone(), Some(ThreadId::MAIN));
                transfer.at.free_count = false;
                transfer.consume_all();
                Some(transfer)
            }
            _ => None,
        };
        if let (Some(transfer), Some(point)) = (converted, self.schedule.point_mut(id)) {
            *point = SchedulePoint::Transfer(transfer);
        }
        self.take_transfer(id, ThreadId::MAIN)?;
        trace!(thread = %tid, label = req.label, count, "preempted");
        Ok(YieldOutcome { point: Some(id), transfer: true })
    }

    /// Feed the access made at `point` to the tracker.
    pub fn on_access(&mut self, point: PointId) -> usize {
        self.tracker.on_access(&mut self.schedule, point)
    }

    /// DPOR look-ahead over every pending access of a live thread.
    pub fn update_backtrack_sets(&mut self) -> usize {
        if !self.dpor {
            return 0;
        }
        let pending: Vec<PointId> = self
            .group
            .active()
            .filter(|m| !m.co.status().is_ended())
            .filter_map(|m| m.yield_point)
            .collect();
        pending
            .into_iter()
            .map(|p| self.tracker.update_backtrack_sets(&mut self.schedule, p))
            .sum()
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Main
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    /// Decide the thread main transfers to.
    ///
    /// `target` is the requested thread, or `None` to let the search pick;
    /// `free_target` marks the decision as one backtracking may revisit.
    pub fn main_transfer(
        &mut self,
        target: Option<ThreadId>,
        free_target: bool,
        loc: Option<SourceLocation>,
    ) -> ControlResult<ThreadId> {
        if self.uncontrolled {
            return match target {
                Some(t) => self.check_target(t).map(|()| t),
                None => self.get_next_enabled(None).ok_or_else(|| self.no_target()),
            };
        }

        if let Some(cur) = self.schedule.current() {
            self.resolve(cur)?;
            let recorded = match self.schedule.point(cur) {
                Some(SchedulePoint::Transfer(t)) if t.at.source.is_main() => t.target,
                _ => {
                    debug!(at = ?cur, "replay diverged: main transfer where none was recorded");
                    return Err(backtrack(BacktrackReason::ReplayFails));
                }
            };
            let chosen = match recorded {
                Some(recorded) => {
                    if target.is_some_and(|t| t != recorded) && !free_target {
                        return Err(backtrack(BacktrackReason::ReplayFails));
                    }
                    recorded
                }
                None => self
                    .get_next_enabled(Some(cur))
                    .ok_or_else(|| backtrack(BacktrackReason::SearchEnds))?,
            };
            if !self.group.is_enabled(chosen) {
                return Err(backtrack(BacktrackReason::ReplayFails));
            }
            if let Some(t) = self.schedule.transfer_mut(cur) {
                t.target = Some(chosen);
                t.at.loc = loc;
                t.consume_once();
            }
            self.schedule.consume_current();
            self.take_transfer(cur, chosen)?;
            return Ok(chosen);
        }

        let chosen = match target {
            Some(t) => {
                self.check_target(t)?;
                t
            }
            None => self.get_next_enabled(None).ok_or_else(|| self.no_target())?,
        };
        let mut at = YieldPoint::new(ThreadId::MAIN, MAIN_LABEL, loc, None);
        at.free_target = free_target;
        let mut transfer = TransferPoint::new(at, Some(chosen));
        transfer.consume_all();
        let id = self.schedule.alloc(SchedulePoint::Transfer(transfer));
        self.schedule.add_current(id, true);
        self.take_transfer(id, chosen)?;
        Ok(chosen)
    }

    fn check_target(&self, target: ThreadId) -> ControlResult<()> {
        if !self.group.contains(target) {
            return Err(internal(format!("transfer to unknown {target}")));
        }
        if self.group.is_enabled(target) {
            return Ok(());
        }
        let ended = self.group.member(target).is_some_and(|m| m.co.status().is_ended());
        Err(backtrack(if ended { BacktrackReason::ThreadsAllEnded } else { BacktrackReason::SpecUnsatisfied }))
    }

    /// Why no target could be found.
    pub fn no_target(&self) -> Interrupt {
        if self.group.is_all_ended() {
            backtrack(BacktrackReason::ThreadsAllEnded)
        } else if self.group.enabled_set().is_empty() {
            let blocked: Vec<String> = self.group.pending().iter().map(ToString::to_string).collect();
            AssertionViolation::deadlock(format!("no thread can run; blocked: {}", blocked.join(", "))).into()
        } else {
            backtrack(BacktrackReason::SearchEnds)
        }
    }

    /// First enabled thread that the criteria and the transfer at
    /// `transfer` (if any) still allow.
    pub fn get_next_enabled(&self, transfer: Option<PointId>) -> Option<ThreadId> {
        let mut except = self.criteria.except.clone();
        let mut only = None;
        if let Some(t) = transfer.and_then(|id| self.schedule.point(id)).and_then(SchedulePoint::as_transfer) {
            if !t.is_first_transition() {
                except.extend(t.done.iter().copied());
                if self.dpor {
                    only = Some(t.backtrack.clone());
                }
            }
        }
        self.group.get_next_enabled(&except, only.as_ref())
    }

    /// Candidate targets of a free transfer in creation order.
    pub fn candidates(&self) -> Vec<ThreadId> {
        self.group
            .enabled_set()
            .into_iter()
            .filter(|t| !self.criteria.except.contains(t))
            .collect()
    }

    /// Record a taken transfer: cursor bookkeeping, thread links, and the
    /// enabled/done/backtrack sets when it is the newest decision.
    fn take_transfer(&mut self, id: PointId, target: ThreadId) -> ControlResult<()> {
        let source = self
            .schedule
            .point(id)
            .map(SchedulePoint::source)
            .ok_or_else(|| internal(format!("dangling transfer {id:?}")))?;
        self.group.set_yield_point(source, Some(id));
        if !source.is_main() {
            self.criteria.reset();
        }

        let resumes_at = self.group.yield_point(target);
        if !target.is_main() {
            if let Some(m) = self.group.member_mut(target) {
                m.resumed_by = Some(id);
            }
            if let Some(y) = resumes_at.and_then(|p| self.schedule.point_mut(p)).and_then(SchedulePoint::as_yield_mut) {
                y.prev = Some(id);
            }
        }

        let is_last = self.schedule.last() == Some(id);
        let enabled: BTreeSet<ThreadId> = if source.is_main() {
            let mut set = self.group.enabled_set();
            set.insert(target);
            set
        } else {
            [ThreadId::MAIN].into_iter().collect()
        };
        if let Some(t) = self.schedule.transfer_mut(id) {
            t.next = resumes_at;
            if is_last {
                t.enabled = enabled;
                if t.is_first_transition() {
                    t.backtrack.insert(target);
                }
                t.done.insert(target);
            }
        }
        trace!(from = %source, to = %target, point = ?id, "transfer");
        Ok(())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Choices
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    /// Pick a value in `0..arity` for `thread`, replaying a recorded one.
    pub fn choose(&mut self, thread: ThreadId, arity: u32) -> ControlResult<u32> {
        if arity == 0 {
            return Err(EngineError::Config("choose needs at least one alternative".into()).into());
        }
        if self.uncontrolled {
            return Ok(0);
        }
        if let Some(cur) = self.schedule.current() {
            self.resolve(cur)?;
            return match self.schedule.point(cur) {
                Some(SchedulePoint::Choice(c)) if c.source == thread && c.arity == arity => {
                    let value = c.value;
                    self.schedule.consume_current();
                    Ok(value)
                }
                _ => {
                    debug!(thread = %thread, "replay diverged: unexpected choice");
                    Err(backtrack(BacktrackReason::ReplayFails))
                }
            };
        }
        let id = self.schedule.alloc(SchedulePoint::Choice(ChoicePoint::new(thread, arity)));
        self.schedule.add_current(id, true);
        Ok(0)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Backtracking
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    /// Rewrite the tail of the schedule into the next alternative.
    ///
    /// Returns false once nothing is left to explore.
    pub fn backtrack(&mut self) -> bool {
        self.schedule.remove_current_and_beyond();
        while let Some(point) = self.schedule.remove_last() {
            match point {
                SchedulePoint::Choice(mut c) => {
                    if c.choose_next() {
                        self.schedule.add_last(SchedulePoint::Choice(c));
                        return true;
                    }
                }
                SchedulePoint::Transfer(mut t) if t.at.free_count => {
                    if t.at.count > 1 {
                        t.at.count -= 1;
                        t.reset();
                        self.schedule.add_last(SchedulePoint::Transfer(t));
                        return true;
                    }
                }
                SchedulePoint::Transfer(mut t)
                    if t.at.source.is_main() && t.at.free_target && t.has_more_targets(self.dpor) =>
                {
                    t.make_backtrack_point();
                    self.schedule.add_last(SchedulePoint::Transfer(t));
                    return true;
                }
                SchedulePoint::Yield(mut y) if !y.source.is_main() && y.free_count => {
                    y.access = None;
                    let mut t = TransferPoint::new(y, Some(ThreadId::MAIN));
                    t.enabled.insert(ThreadId::MAIN);
                    self.schedule.add_last(SchedulePoint::Transfer(t));
                    return true;
                }
                _ => {}
            }
        }
        false
    }

    /// Every thread of this run returned from its function.
    pub fn is_all_ended(&self) -> bool {
        self.group.is_all_ended()
    }

    /// Decisions go through the execution tree.
    pub fn tree_mode(&self) -> bool {
        self.strategy == SearchStrategy::Tree && !self.uncontrolled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Address;

    fn state() -> ScenarioState {
        ScenarioState::new(Coroutine::main(), &EngineConfig::default())
    }

    fn req(thread: usize, label: &str) -> YieldRequest<'_> {
        YieldRequest { thread: ThreadId(thread), label, loc: None, access: None, forced: false, preempt: false }
    }

    #[test]
    fn test_bare_yields_merge() {
        let mut st = state();
        let a = st.thread_yield(req(1, "spin")).unwrap();
        let b = st.thread_yield(req(1, "spin")).unwrap();
        assert!(!a.transfer && !b.transfer);
        assert_eq!(a.point, b.point);
        assert_eq!(st.schedule.len(), 1);
        let y = st.schedule.iter().next().and_then(SchedulePoint::as_yield).cloned().unwrap();
        assert_eq!(y.count, 2);
    }

    #[test]
    fn test_ending_transfers_in_place() {
        let mut st = state();
        st.thread_yield(req(1, "x")).unwrap();
        let end = st.thread_yield(req(1, ENDING_LABEL)).unwrap();
        assert!(end.transfer);
        assert_eq!(st.schedule.len(), 2);
        let t = st.schedule.last().and_then(|id| st.schedule.point(id)).and_then(SchedulePoint::as_transfer).cloned().unwrap();
        assert_eq!(t.target, Some(ThreadId::MAIN));
        assert_eq!(t.rem_count, 0);
    }

    #[test]
    fn test_forced_yield_merges_into_transfer() {
        let mut st = state();
        st.thread_yield(req(1, "poll")).unwrap();
        let forced = st.thread_yield(YieldRequest { forced: true, ..req(1, "poll") }).unwrap();
        assert!(forced.transfer);
        assert_eq!(st.schedule.len(), 1);
        let t = st.schedule.iter().next().and_then(SchedulePoint::as_transfer).cloned().unwrap();
        assert_eq!(t.at.count, 2);
    }

    #[test]
    fn test_backtrack_converts_bare_yield() {
        let mut st = state();
        st.thread_yield(YieldRequest { access: Some(SharedAccess::write(Address(1), 4)), ..req(1, "w") })
            .unwrap();
        st.thread_yield(req(1, ENDING_LABEL)).unwrap();

        assert!(st.backtrack());
        assert_eq!(st.schedule.len(), 1);
        let t = st.schedule.iter().next().and_then(SchedulePoint::as_transfer).cloned().unwrap();
        assert!(t.at.free_count);
        assert_eq!(t.at.label, "w");

        st.schedule.restart();
        assert!(st.thread_yield(req(1, "w")).unwrap().transfer);
        assert!(!st.backtrack());
        assert!(st.schedule.is_empty());
    }

    #[test]
    fn test_preemption_count_decrements() {
        let mut st = state();
        for _ in 0..3 {
            st.thread_yield(req(1, "loop")).unwrap();
        }
        assert!(st.backtrack());
        let count = |st: &ScenarioState| st.schedule.iter().next().and_then(SchedulePoint::as_yield).map(|y| y.count);
        assert_eq!(count(&st), Some(3));

        for expected in [2, 1] {
            st.schedule.restart();
            let mut yields = 0;
            while !st.thread_yield(req(1, "loop")).unwrap().transfer {
                yields += 1;
            }
            assert_eq!(yields, expected);
            assert!(st.backtrack());
            assert_eq!(count(&st), Some(expected));
        }

        st.schedule.restart();
        assert!(st.thread_yield(req(1, "loop")).unwrap().transfer);
        assert!(!st.backtrack());
    }

    #[test]
    fn test_replayed_preemption_transfers_at_count() {
        let mut st = state();
        for _ in 0..2 {
            st.thread_yield(req(1, "loop")).unwrap();
        }
        assert!(st.backtrack());
        st.schedule.restart();

        let first = st.thread_yield(req(1, "loop")).unwrap();
        assert!(!first.transfer);
        let second = st.thread_yield(req(1, "loop")).unwrap();
        assert!(second.transfer);
        assert!(!st.schedule.has_current());
    }

    #[test]
    fn test_replay_wrong_thread_backtracks() {
        let mut st = state();
        st.thread_yield(req(1, "a")).unwrap();
        assert!(st.backtrack());
        st.schedule.restart();
        let err = st.thread_yield(req(2, "a")).unwrap_err();
        assert_eq!(err, Interrupt::backtrack(BacktrackReason::ReplayFails));
    }

    #[test]
    fn test_choice_replay_and_advance() {
        let mut st = state();
        assert_eq!(st.choose(ThreadId(1), 3).unwrap(), 0);
        assert!(st.backtrack());
        st.schedule.restart();
        assert_eq!(st.choose(ThreadId(1), 3).unwrap(), 1);
        assert!(st.backtrack());
        st.schedule.restart();
        assert_eq!(st.choose(ThreadId(1), 3).unwrap(), 2);
        assert!(!st.backtrack());
        assert!(matches!(st.choose(ThreadId(1), 0), Err(Interrupt::Fatal(EngineError::Config(_)))));
    }

    #[test]
    fn test_main_without_threads_reports_all_ended() {
        let mut st = state();
        let err = st.main_transfer(None, true, None).unwrap_err();
        assert_eq!(err, Interrupt::backtrack(BacktrackReason::ThreadsAllEnded));
        assert!(st.is_all_ended());
    }
}
