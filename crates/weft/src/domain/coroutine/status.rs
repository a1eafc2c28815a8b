//! Coroutine status machine
//!
//! ```text
//! PASSIVE ──> ENABLED ⇄ WAITING ⇄ BLOCKED ──> ENDED ──> TERMINATED
//!                ^                              │
//!                └────────── restart ───────────┘
//! ```

use std::sync::atomic::{AtomicU8, Ordering};

/// Where a coroutine is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Status {
    /// Created, no OS thread yet
    Passive = 1,
    /// Runnable and holding, or about to hold, control
    Enabled = 2,
    /// Parked on its handoff channel
    Waiting = 3,
    /// In the middle of a modelled blocking transition
    Blocked = 4,
    /// Function returned; the thread is kept for the next run
    Ended = 5,
    /// Thread gone
    Terminated = 6,
}

impl Status {
    /// Runnable from the scheduler's point of view.
    #[inline]
    pub const fn is_enabled(self) -> bool {
        matches!(self, Self::Enabled | Self::Waiting)
    }

    /// Function already returned in this run.
    #[inline]
    pub const fn is_ended(self) -> bool {
        matches!(self, Self::Ended | Self::Terminated)
    }

    /// An OS thread is alive behind the coroutine.
    #[inline]
    pub const fn has_thread(self) -> bool {
        !matches!(self, Self::Passive | Self::Terminated)
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Passive,
            2 => Self::Enabled,
            3 => Self::Waiting,
            4 => Self::Blocked,
            5 => Self::Ended,
            _ => Self::Terminated,
        }
    }
}

/// Status cell shared between the coroutine thread and the controller.
#[derive(Debug)]
pub struct AtomicStatus(AtomicU8);

impl AtomicStatus {
    /// Cell holding `status`
    pub const fn new(status: Status) -> Self {
        Self(AtomicU8::new(status as u8))
    }

    /// Current status
    #[inline]
    pub fn load(&self) -> Status {
        Status::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Overwrite the status
    #[inline]
    pub fn store(&self, status: Status) {
        self.0.store(status as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classes() {
        assert!(Status::Enabled.is_enabled());
        assert!(Status::Waiting.is_enabled());
        assert!(!Status::Blocked.is_enabled());
        assert!(Status::Ended.is_ended());
        assert!(!Status::Passive.has_thread());
        assert!(Status::Ended.has_thread());
    }

    #[test]
    fn test_atomic_roundtrip() {
        let cell = AtomicStatus::new(Status::Passive);
        for status in [Status::Enabled, Status::Waiting, Status::Blocked, Status::Ended, Status::Terminated] {
            cell.store(status);
            assert_eq!(cell.load(), status);
        }
    }
}
