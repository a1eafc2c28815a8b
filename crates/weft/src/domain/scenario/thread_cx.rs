//! ThreadCx - what a program thread sees of the engine
//!
//! Every method is a scheduling point: the thread may lose control there
//! and only gets it back once the controller transfers to it again. A
//! method returning `Err` means the run is over for this thread; the
//! error must be propagated with `?`.
//!
//! After a `Restart` or `Terminate` has been received every further call
//! fails with the same interrupt, so a thread that swallows one still
//! unwinds.

use super::engine::Engine;
use super::state::YieldRequest;
use super::stats::names;
use crate::domain::coroutine::{Coroutine, Exit, Message, Permit, Status, WakeFn};
use crate::domain::error::{AssertionViolation, BacktrackReason, ControlResult, EngineError, Interrupt};
use crate::domain::exec_tree::NodeKind;
use crate::domain::types::{Address, SharedAccess, SourceLocation, ThreadId, ENDING_LABEL};
use std::cell::{Cell, RefCell};
use std::panic::Location;
use std::sync::Arc;
use tracing::{trace, warn};

/// Label of a read made through [`ThreadCx::read`].
pub const READ_LABEL: &str = "read";
/// Label of a write made through [`ThreadCx::write`].
pub const WRITE_LABEL: &str = "write";
/// Label of [`ThreadCx::force_yield`].
pub const FORCE_LABEL: &str = "force_yield";

const ACCESS_SIZE: u32 = 8;

fn halt_interrupt(exit: Exit) -> Interrupt {
    match exit {
        Exit::Restart => Interrupt::Restart,
        Exit::Terminate => Interrupt::Terminate,
    }
}

/// Handle of a program thread on the engine.
pub struct ThreadCx {
    engine: Arc<Engine>,
    co: Arc<Coroutine>,
    permit: Cell<Option<Permit>>,
    halted: Cell<Option<Exit>>,
    location: RefCell<Option<SourceLocation>>,
}

impl ThreadCx {
    pub(crate) fn new(engine: Arc<Engine>, co: Arc<Coroutine>, permit: Permit) -> Self {
        Self {
            engine,
            co,
            permit: Cell::new(Some(permit)),
            halted: Cell::new(None),
            location: RefCell::new(None),
        }
    }

    /// Id of this thread.
    pub fn id(&self) -> ThreadId {
        self.co.id()
    }

    /// Name given at creation.
    pub fn name(&self) -> String {
        self.co.name()
    }

    /// Last location this thread yielded at.
    pub fn location(&self) -> Option<SourceLocation> {
        self.location.borrow().clone()
    }

    pub(crate) fn halted(&self) -> Option<Exit> {
        self.halted.get()
    }

    fn check_halted(&self) -> ControlResult {
        self.halted.get().map_or(Ok(()), |exit| Err(halt_interrupt(exit)))
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Scheduling Points
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Read of a shared location.
    #[track_caller]
    pub fn read(&self, addr: Address) -> ControlResult {
        let loc = SourceLocation::from_caller(Location::caller());
        self.step(READ_LABEL, Some(SharedAccess::read(addr, ACCESS_SIZE)), loc, false)
    }

    /// Write of a shared location.
    #[track_caller]
    pub fn write(&self, addr: Address) -> ControlResult {
        let loc = SourceLocation::from_caller(Location::caller());
        self.step(WRITE_LABEL, Some(SharedAccess::write(addr, ACCESS_SIZE)), loc, false)
    }

    /// Labelled access; `access` is about to be made.
    #[track_caller]
    pub fn access(&self, label: &str, access: SharedAccess) -> ControlResult {
        let loc = SourceLocation::from_caller(Location::caller());
        self.step(label, Some(access), loc, false)
    }

    /// Labelled point without an access.
    #[track_caller]
    pub fn yield_at(&self, label: &str) -> ControlResult {
        let loc = SourceLocation::from_caller(Location::caller());
        self.step(label, None, loc, false)
    }

    /// Labelled point reported by instrumentation, at a known location.
    pub fn yield_with(&self, label: &str, access: Option<SharedAccess>, loc: SourceLocation) -> ControlResult {
        self.step(label, access, loc, false)
    }

    /// Give control back to the controller whatever the criteria say.
    #[track_caller]
    pub fn force_yield(&self) -> ControlResult {
        let loc = SourceLocation::from_caller(Location::caller());
        self.step(FORCE_LABEL, None, loc, true)
    }

    /// Block at `label` until `ready` holds.
    ///
    /// While blocked the thread is not enabled; the controller re-checks
    /// `ready` when it picks a target.
    #[track_caller]
    pub fn wait_until(&self, label: &str, ready: impl Fn() -> bool + Send + Sync + 'static) -> ControlResult {
        let loc = SourceLocation::from_caller(Location::caller());
        self.step(label, None, loc.clone(), false)?;
        let ready: WakeFn = Arc::new(ready);
        let blocked = format!("{label}.blocked");
        while !ready() {
            self.co.block_on(Arc::clone(&ready));
            self.step(&blocked, None, loc.clone(), true)?;
        }
        Ok(())
    }

    /// Pick a value in `0..arity`.
    pub fn choose(&self, arity: u32) -> ControlResult<u32> {
        self.check_halted()?;
        let mut st = self.engine.state.lock();
        if st.tree_mode() {
            let (_, index) = self.engine.tree.decide_first_uncovered(NodeKind::Choice { arity: arity as usize })?;
            return u32::try_from(index).map_err(|_| EngineError::Internal(format!("choice {index} out of range")).into());
        }
        st.choose(self.id(), arity)
    }

    /// Fail the test unless `cond` holds.
    #[track_caller]
    pub fn assert_that(&self, cond: bool, message: &str) -> ControlResult {
        self.check_halted()?;
        if cond {
            return Ok(());
        }
        let loc = SourceLocation::from_caller(Location::caller());
        Err(AssertionViolation::check(message, self.id(), Some(loc)).into())
    }

    /// Abandon the run unless `cond` holds.
    pub fn assume(&self, cond: bool) -> ControlResult {
        self.check_halted()?;
        if cond {
            Ok(())
        } else {
            Err(Interrupt::backtrack(BacktrackReason::AssumeFails))
        }
    }

    fn step(&self, label: &str, access: Option<SharedAccess>, loc: SourceLocation, forced: bool) -> ControlResult {
        self.check_halted()?;
        *self.location.borrow_mut() = Some(loc.clone());

        let outcome = {
            let mut st = self.engine.state.lock();
            let preempt = if st.tree_mode() && !forced && label != ENDING_LABEL && st.criteria.until.is_star() {
                let (_, index) = self.engine.tree.decide_first_uncovered(NodeKind::Choice { arity: 2 })?;
                index == 1
            } else {
                false
            };
            let recalled = self.co.take_recall();
            let outcome = st.thread_yield(YieldRequest {
                thread: self.id(),
                label,
                loc: Some(loc),
                access,
                forced: forced || recalled,
                preempt,
            })?;
            if outcome.transfer {
                let found = st.update_backtrack_sets();
                if found > 0 {
                    trace!(thread = %self.id(), found, "look-ahead grew backtrack sets");
                }
            }
            outcome
        };

        if outcome.transfer {
            self.handoff()?;
        }
        if let Some(point) = outcome.point {
            let races = self.engine.state.lock().on_access(point);
            if races > 0 {
                self.engine.stats.increment(names::RACES, races as u64);
            }
        }
        Ok(())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Handoff
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    fn take_permit(&self) -> ControlResult<Permit> {
        self.permit
            .take()
            .ok_or_else(|| EngineError::Internal(format!("{} yields without control", self.id())).into())
    }

    /// Hand control to main and wait to get it back.
    fn handoff(&self) -> ControlResult {
        let permit = self.take_permit()?;
        if self.co.status() == Status::Enabled {
            self.co.set_status(Status::Waiting);
        }
        self.engine.stats.increment(names::TRANSFERS, 1);
        self.engine.main.deliver(Message::Transfer(permit), self.engine.max_wait())?;
        self.wait_for_control()?;
        self.on_resume()
    }

    fn wait_for_control(&self) -> ControlResult {
        loop {
            match self.co.receive() {
                Message::Transfer(permit) => {
                    self.permit.set(Some(permit));
                    self.co.unblock();
                    if !self.co.status().is_ended() {
                        self.co.set_status(Status::Enabled);
                    }
                    return Ok(());
                }
                Message::Restart => {
                    self.halted.set(Some(Exit::Restart));
                    return Err(Interrupt::Restart);
                }
                Message::Terminate => {
                    self.halted.set(Some(Exit::Terminate));
                    return Err(Interrupt::Terminate);
                }
                other => warn!(thread = %self.id(), msg = other.name(), "ignoring message while parked"),
            }
        }
    }

    /// Claim the step main published for this thread, if any.
    pub(crate) fn on_resume(&self) -> ControlResult {
        if !self.engine.state.lock().tree_mode() {
            return Ok(());
        }
        let me = self.id();
        self.engine.tree.claim_published(|kind| matches!(kind, NodeKind::Transition { thread } if *thread == me))?;
        Ok(())
    }

    /// The ending yield: the thread function returned.
    pub(crate) fn end(&self) -> ControlResult {
        let loc = self.location().unwrap_or_default();
        self.step(ENDING_LABEL, None, loc, false)
    }

    /// Hand control to main together with the failure just recorded.
    pub(crate) fn raise(&self) -> ControlResult {
        let permit = self.take_permit()?;
        self.engine.main.deliver(Message::Exception(permit), self.engine.max_wait())?;
        Ok(())
    }

    /// Wait until the controller restarts or terminates this thread.
    pub(crate) fn park(&self) -> Exit {
        loop {
            if let Some(exit) = self.halted() {
                return exit;
            }
            if self.wait_for_control().is_ok() {
                warn!(thread = %self.id(), "control handed to an ended thread; bouncing back");
                if let Ok(permit) = self.take_permit() {
                    if self.engine.main.deliver(Message::Transfer(permit), self.engine.max_wait()).is_err() {
                        return Exit::Terminate;
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for ThreadCx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadCx").field("id", &self.id()).field("halted", &self.halted.get()).finish_non_exhaustive()
    }
}
