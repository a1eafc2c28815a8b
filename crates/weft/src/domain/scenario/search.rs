//! Search drivers
//!
//! Canned test-case bodies built from transfers and criteria:
//!
//! | Driver | Shape |
//! |--------|-------|
//! | `exhaustive_search` | forall; free transfers under `until_star` until every thread ended |
//! | `context_bounded_search(c)` | like the above, at most `c` transfers, each to a thread other than the last |
//! | `nd_seq_search` | forall; each thread runs to its end, in every order |

use super::controller::Controller;
use crate::domain::error::{ControlResult, EngineError};
use crate::domain::types::ThreadId;
use tracing::debug;

impl Controller {
    /// Try every interleaving of the threads created so far.
    pub fn exhaustive_search(&mut self) -> ControlResult {
        self.check_forall();
        while !self.all_ended() {
            self.until_star().transfer_star()?;
        }
        Ok(())
    }

    /// Try every interleaving with at most `bound` transfers from main,
    /// then run what is left to completion.
    pub fn context_bounded_search(&mut self, bound: u32) -> ControlResult {
        if bound == 0 {
            return Err(EngineError::Config("context bound must be at least 1".into()).into());
        }
        self.check_forall();
        let mut left = bound;
        let mut prev: Option<ThreadId> = None;
        while left > 0 && !self.all_ended() {
            self.until_star();
            if let Some(p) = prev {
                if self.enabled_threads().iter().any(|&t| t != p) {
                    self.except(p);
                }
            }
            prev = Some(self.transfer_star()?);
            left -= 1;
        }
        debug!(bound, used = bound - left, "context bound reached");
        self.finish_all()
    }

    /// Run the threads one after another, in every order.
    pub fn nd_seq_search(&mut self) -> ControlResult {
        self.check_forall();
        while !self.all_ended() {
            self.finish_star()?;
        }
        Ok(())
    }

    /// Run a thread the search picks to its end.
    pub fn finish_star(&mut self) -> ControlResult<ThreadId> {
        self.until_end().transfer_star()
    }

    /// Run every thread to its end, in creation order.
    pub fn finish_all(&mut self) -> ControlResult {
        while !self.all_ended() {
            match self.enabled_threads().first().copied() {
                Some(thread) => {
                    self.until_end().transfer(thread)?;
                }
                None => {
                    // no thread can run: the free transfer classifies it
                    self.until_end().transfer_star()?;
                }
            }
        }
        Ok(())
    }
}
