//! Coroutine - one OS thread driven by rendezvous handoffs
//!
//! # Handoff
//!
//! ```text
//!  controller                 coroutine thread
//!  ──────────                 ────────────────
//!  start() ── spawn/RESTART ──>  loop {
//!          <──── STARTED ─────     recv()
//!  transfer ── TRANSFER(p) ───>    body.activate(p)
//!          <── TRANSFER(p) ────      ... yields hand p back
//!  finish() ── TERMINATE ─────>  }
//! ```
//!
//! Every inbox is a zero-capacity channel, so a send completes only when the
//! peer is parked in `recv`. The [`Permit`] inside `TRANSFER` is the single
//! token of control; whoever does not hold it is blocked on its inbox.
//!
//! The body a coroutine runs may change between runs. [`Coroutine::start`]
//! swaps it in before waking the thread.

use super::message::{Message, Permit};
use super::status::{AtomicStatus, Status};
use crate::domain::error::EngineError;
use crate::domain::types::ThreadId;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// How a coroutine left one activation of its body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// Wait for the next run
    Restart,
    /// Leave the thread
    Terminate,
}

/// What a coroutine thread runs each time it receives control after
/// `STARTED`.
pub trait CoroutineBody: Send + Sync + 'static {
    /// Run one activation while holding `permit`.
    ///
    /// Returns once the coroutine was told to restart or terminate.
    fn activate(&self, co: &Arc<Coroutine>, permit: Permit) -> Exit;
}

/// Predicate re-checked by the scheduler while a coroutine is blocked.
pub type WakeFn = Arc<dyn Fn() -> bool + Send + Sync>;

/// A cooperatively scheduled thread.
pub struct Coroutine {
    id: ThreadId,
    name: Mutex<String>,
    status: AtomicStatus,
    inbox_tx: Sender<Message>,
    inbox_rx: Receiver<Message>,
    controller: Option<Sender<Message>>,
    end_tx: Sender<()>,
    end_rx: Receiver<()>,
    recall: AtomicBool,
    wake: Mutex<Option<WakeFn>>,
    body: Mutex<Option<Arc<dyn CoroutineBody>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Coroutine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coroutine")
            .field("id", &self.id)
            .field("name", &*self.name.lock())
            .field("status", &self.status.load())
            .finish_non_exhaustive()
    }
}

impl Coroutine {
    /// The controller's own coroutine. It has no thread of its own: it is
    /// whoever drives the scenario.
    pub fn main() -> Arc<Self> {
        let co = Self::build(ThreadId::MAIN, "main".to_string(), None);
        co.status.store(Status::Enabled);
        Arc::new(co)
    }

    /// A passive coroutine reporting to `main`.
    pub fn new(id: ThreadId, name: impl Into<String>, main: &Self) -> Arc<Self> {
        Arc::new(Self::build(id, name.into(), Some(main.inbox_tx.clone())))
    }

    fn build(id: ThreadId, name: String, controller: Option<Sender<Message>>) -> Self {
        let (inbox_tx, inbox_rx) = bounded(0);
        let (end_tx, end_rx) = bounded(1);
        Self {
            id,
            name: Mutex::new(name),
            status: AtomicStatus::new(Status::Passive),
            inbox_tx,
            inbox_rx,
            controller,
            end_tx,
            end_rx,
            recall: AtomicBool::new(false),
            wake: Mutex::new(None),
            body: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    /// Thread id
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Thread name
    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    pub(crate) fn rename(&self, name: &str) {
        let mut current = self.name.lock();
        if *current != name {
            *current = name.to_string();
        }
    }

    /// Current status
    pub fn status(&self) -> Status {
        self.status.load()
    }

    /// Overwrite the status
    pub fn set_status(&self, status: Status) {
        self.status.store(status);
    }

    /// Whether the scheduler may hand control to this coroutine.
    ///
    /// A blocked coroutine counts once its wake predicate holds.
    pub fn is_runnable(&self) -> bool {
        match self.status() {
            Status::Enabled | Status::Waiting => true,
            Status::Blocked => self.wake.lock().as_ref().is_some_and(|wake| wake()),
            _ => false,
        }
    }

    /// Park as blocked until `wake` holds.
    pub fn block_on(&self, wake: WakeFn) {
        *self.wake.lock() = Some(wake);
        self.set_status(Status::Blocked);
    }

    /// Drop the wake predicate.
    pub fn unblock(&self) {
        self.wake.lock().take();
    }

    /// Ask the coroutine to hand control back at its next yield.
    pub fn request_recall(&self) {
        self.recall.store(true, Ordering::Release);
    }

    /// Consume a pending recall request.
    pub fn take_recall(&self) -> bool {
        self.recall.swap(false, Ordering::AcqRel)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Messaging
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Hand `msg` to this coroutine, waiting at most `wait` for it to be
    /// parked on its inbox.
    pub fn deliver(&self, msg: Message, wait: Duration) -> Result<(), EngineError> {
        trace!(to = %self.id, msg = msg.name(), "deliver");
        self.inbox_tx
            .send_timeout(msg, wait)
            .map_err(|_| EngineError::Timeout { thread: self.id, waited: wait })
    }

    /// Block until a message arrives.
    pub fn receive(&self) -> Message {
        // Both channel ends live in `self`, so the channel never disconnects
        // while a receiver is running.
        self.inbox_rx.recv().unwrap_or(Message::Terminate)
    }

    /// Block at most `wait` for a message.
    pub fn receive_timeout(&self, wait: Duration) -> Option<Message> {
        match self.inbox_rx.recv_timeout(wait) {
            Ok(msg) => Some(msg),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Message::Terminate),
        }
    }

    fn report(&self, msg: Message, wait: Duration) -> bool {
        match &self.controller {
            Some(controller) => controller.send_timeout(msg, wait).is_ok(),
            None => false,
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // End Semaphore
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Record that the body returned for this run.
    pub fn signal_end(&self) {
        let _ = self.end_tx.try_send(());
    }

    /// Wait at most `wait` for the body to return.
    ///
    /// The token is put back, so later waits in the same run succeed too.
    pub fn wait_for_end(&self, wait: Duration) -> bool {
        if self.end_rx.recv_timeout(wait).is_ok() {
            let _ = self.end_tx.try_send(());
            true
        } else {
            false
        }
    }

    fn clear_end(&self) {
        while self.end_rx.try_recv().is_ok() {}
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Lifecycle
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Start a run of `body`, spawning the thread on first use or
    /// restarting it otherwise, and wait for `STARTED` on `main`.
    pub fn start(
        self: &Arc<Self>,
        main: &Self,
        body: Arc<dyn CoroutineBody>,
        wait: Duration,
    ) -> Result<(), EngineError> {
        *self.body.lock() = Some(body);
        self.clear_end();
        self.unblock();
        self.recall.store(false, Ordering::Release);

        if self.status().has_thread() {
            debug!(thread = %self.id, "restarting coroutine");
            self.deliver(Message::Restart, wait)?;
        } else {
            debug!(thread = %self.id, "spawning coroutine");
            self.spawn()?;
        }

        match main.receive_timeout(wait) {
            Some(Message::Started) => Ok(()),
            Some(other) => Err(EngineError::Internal(format!(
                "expected STARTED from {}, got {}",
                self.id,
                other.name()
            ))),
            None => Err(EngineError::Timeout { thread: self.id, waited: wait }),
        }
    }

    fn spawn(self: &Arc<Self>) -> Result<(), EngineError> {
        let name = format!("weft-{}", self.name());
        let co = Arc::clone(self);
        self.set_status(Status::Waiting);
        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || co.run_loop())
            .map_err(|e| {
                self.set_status(Status::Passive);
                EngineError::Spawn { name, reason: e.to_string() }
            })?;
        *self.handle.lock() = Some(handle);
        Ok(())
    }

    fn run_loop(self: Arc<Self>) {
        // The controller is parked waiting for STARTED whenever this is sent.
        const STARTED_WAIT: Duration = Duration::from_secs(60);

        loop {
            self.set_status(Status::Waiting);
            if !self.report(Message::Started, STARTED_WAIT) {
                warn!(thread = %self.id, "controller gone before STARTED");
                break;
            }

            let exit = match self.receive() {
                Message::Transfer(permit) => {
                    self.set_status(Status::Enabled);
                    let body = self.body.lock().clone();
                    match body {
                        Some(body) => body.activate(&self, permit),
                        None => Exit::Terminate,
                    }
                }
                Message::Restart => Exit::Restart,
                Message::Terminate => Exit::Terminate,
                other => {
                    warn!(thread = %self.id, msg = other.name(), "unexpected message before first transfer");
                    Exit::Terminate
                }
            };

            if exit == Exit::Terminate {
                break;
            }
        }
        self.set_status(Status::Terminated);
        trace!(thread = %self.id, "coroutine thread exits");
    }

    /// Whether the OS thread has returned (or was never spawned).
    pub(crate) fn thread_exited(&self) -> bool {
        self.handle.lock().as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Terminate the thread and join it.
    ///
    /// A thread that does not pick up `TERMINATE` within `wait` is stuck
    /// outside the controlled region; it is detached. A thread that already
    /// unwound is joined and its panic logged.
    pub fn finish(&self, wait: Duration) {
        if !self.status().has_thread() {
            return;
        }
        if !self.thread_exited() {
            if let Err(e) = self.deliver(Message::Terminate, wait) {
                warn!(thread = %self.id, error = %e, "coroutine did not accept TERMINATE, detaching");
                self.handle.lock().take();
                self.set_status(Status::Terminated);
                return;
            }
        }
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(payload) = handle.join() {
                warn!(thread = %self.id, panic = %panic_message(&*payload), "coroutine thread panicked");
            }
        }
        self.set_status(Status::Terminated);
    }
}

/// Text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with a non-string payload".to_string()
    }
}
