//! Handoff messages
//!
//! Control is a value: exactly one [`Permit`] exists per scenario, and only
//! its holder may touch the run's schedule. It cannot be cloned, so handing
//! it to another coroutine inside a `Transfer` or `Exception` message is the
//! only way control moves.

use std::fmt;

/// Proof of holding control.
pub struct Permit {
    _private: (),
}

impl Permit {
    pub(crate) const fn mint() -> Self {
        Self { _private: () }
    }
}

impl fmt::Debug for Permit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Permit")
    }
}

/// What travels over a coroutine's rendezvous channel.
#[derive(Debug)]
pub enum Message {
    /// A coroutine thread is up and waiting for its first transfer
    Started,
    /// Control is handed over
    Transfer(Permit),
    /// Leave the current function and start over
    Restart,
    /// Leave the current function and exit the thread
    Terminate,
    /// Control comes back to the controller with a failure attached
    Exception(Permit),
}

impl Message {
    /// Short name for logs.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Started => "STARTED",
            Self::Transfer(_) => "TRANSFER",
            Self::Restart => "RESTART",
            Self::Terminate => "TERMINATE",
            Self::Exception(_) => "EXCEPTION",
        }
    }
}
