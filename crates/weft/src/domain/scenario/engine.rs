//! Engine - what the controller and every coroutine of a scenario share
//!
//! ```text
//! Scenario ──Arc──> Engine ──┬─ config
//!                            ├─ state: Mutex<ScenarioState>
//!                            ├─ tree:  ExecutionTreeManager
//!                            ├─ stats: Statistics
//!                            ├─ phase: Mutex<Phase>
//!                            └─ main:  Arc<Coroutine>
//! ThreadBody ──Weak──> Engine
//! ```
//!
//! Thread bodies only hold a `Weak` so that dropping the scenario is
//! enough to shut its coroutines down.

use super::state::ScenarioState;
use super::stats::{names, Statistics};
use super::Phase;
use super::thread_cx::ThreadCx;
use crate::domain::coroutine::{panic_message, Coroutine, CoroutineBody, Exit, Message, Permit, Status};
use crate::domain::error::{ControlResult, EngineError, ExceptionRecord, Interrupt, PutError};
use crate::domain::exec_tree::ExecutionTreeManager;
use crate::domain::types::ThreadId;
use crate::infrastructure::config::EngineConfig;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, warn};

/// Function run by a program thread.
pub type ThreadFn = Arc<dyn Fn(&ThreadCx) -> ControlResult + Send + Sync>;

/// Shared core of a scenario.
#[derive(Debug)]
pub(crate) struct Engine {
    pub(crate) config: EngineConfig,
    pub(crate) state: Mutex<ScenarioState>,
    pub(crate) tree: ExecutionTreeManager,
    pub(crate) stats: Statistics,
    pub(crate) main: Arc<Coroutine>,
    phase: Mutex<Phase>,
}

impl Engine {
    pub(crate) fn new(config: EngineConfig) -> Arc<Self> {
        let main = Coroutine::main();
        let state = Mutex::new(ScenarioState::new(Arc::clone(&main), &config));
        let tree = ExecutionTreeManager::new(config.tree_acquire_timeout(), config.delete_covered_subtrees);
        Arc::new(Self { config, state, tree, stats: Statistics::new(), main, phase: Mutex::new(Phase::Begin) })
    }

    pub(crate) fn max_wait(&self) -> Duration {
        self.config.max_wait()
    }

    pub(crate) fn phase(&self) -> Phase {
        *self.phase.lock()
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        *self.phase.lock() = phase;
    }

    /// Rewind schedule, tracker, group, criteria and tree for a new run.
    pub(crate) fn restart_run(&self) {
        self.state.lock().restart();
        self.tree.restart();
    }

    /// Backtrack the search; false once nothing is left.
    pub(crate) fn backtrack(&self) -> bool {
        self.stats.increment(names::BACKTRACKS, 1);
        let mut st = self.state.lock();
        if st.tree_mode() {
            drop(st);
            self.tree.do_backtrack()
        } else {
            st.backtrack()
        }
    }

    /// Wait on main's inbox for control to come back from `from`.
    ///
    /// Returns the permit, when one came back, and whether `from` handed
    /// it over cleanly. `None` when nothing arrived within `wait`.
    pub(crate) fn await_main(&self, from: ThreadId, wait: Duration) -> Option<(Option<Permit>, ControlResult)> {
        let msg = self.main.receive_timeout(wait)?;
        Some(match msg {
            Message::Transfer(permit) => (Some(permit), Ok(())),
            Message::Exception(permit) => {
                let error = self.state.lock().exceptions.last().map(|e| e.error.clone());
                let error = error.unwrap_or_else(|| EngineError::Internal(format!("{from} raised without a record")).into());
                debug!(thread = %from, %error, "exception handed to main");
                (Some(permit), Err(error))
            }
            other => (None, Err(EngineError::Internal(format!("main got {} from {from}", other.name())).into())),
        })
    }
}

/// Body of a program thread: the user function plus the ending protocol.
pub(crate) struct ThreadBody {
    pub(crate) engine: Weak<Engine>,
    pub(crate) func: ThreadFn,
}

impl CoroutineBody for ThreadBody {
    fn activate(&self, co: &Arc<Coroutine>, permit: Permit) -> Exit {
        let Some(engine) = self.engine.upgrade() else {
            return Exit::Terminate;
        };
        let cx = ThreadCx::new(Arc::clone(&engine), Arc::clone(co), permit);

        let result = cx.on_resume().and_then(|()| {
            catch_unwind(AssertUnwindSafe(|| (self.func)(&cx))).unwrap_or_else(|payload| {
                Err(PutError { thread: cx.id(), location: cx.location(), message: panic_message(&*payload) }.into())
            })
        });
        let result = result.and_then(|()| {
            co.set_status(Status::Ended);
            co.signal_end();
            cx.end()
        });

        if let Some(exit) = cx.halted() {
            return exit;
        }
        match result {
            Ok(()) => {}
            Err(Interrupt::Restart) => return Exit::Restart,
            Err(Interrupt::Terminate) => return Exit::Terminate,
            Err(error) => {
                let record = ExceptionRecord { owner: cx.id(), location: cx.location(), error };
                debug!(thread = %cx.id(), error = %record.error, "coroutine raised");
                let tree_mode = {
                    let mut st = engine.state.lock();
                    st.exceptions.push(record.clone());
                    st.tree_mode()
                };
                if tree_mode {
                    if let Err(e) = engine.tree.end_run(Some(record)) {
                        debug!(error = %e, "could not attach exception to the tree");
                    }
                }
                co.set_status(Status::Ended);
                co.signal_end();
                if let Err(e) = cx.raise() {
                    warn!(thread = %cx.id(), error = %e, "could not hand exception to main");
                }
            }
        }
        cx.park()
    }
}
