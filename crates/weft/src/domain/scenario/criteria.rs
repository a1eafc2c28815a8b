//! Transfer criteria - when a resumed thread gives control back
//!
//! The controller sets an [`Until`] condition and an `except` set before it
//! transfers. The running thread checks the condition at each of its
//! yields; the controller's next choice of target skips `except`. Both are
//! reset when control comes back to the controller.

use crate::domain::schedule::YieldPoint;
use crate::domain::types::{ThreadId, ENDING_LABEL};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Predicate over a yield point.
pub type YieldPredicate = Arc<dyn Fn(&YieldPoint) -> bool + Send + Sync>;

/// Where the resumed thread stops.
#[derive(Clone, Default)]
pub enum Until {
    /// At a point the schedule already transfers at, or at the end
    #[default]
    Star,
    /// At the next yield
    First,
    /// At the end of the thread function
    End,
    /// At a yield with this label, or at the end
    Label(String),
    /// Where the predicate holds
    Cond(YieldPredicate),
}

impl Until {
    /// Whether a yield at `point` stops here; `is_transfer` tells whether
    /// the schedule already transfers there.
    pub fn holds(&self, point: &YieldPoint, is_transfer: bool) -> bool {
        let ending = point.label == ENDING_LABEL;
        match self {
            Self::Star => is_transfer || ending,
            Self::First => true,
            Self::End => ending,
            Self::Label(label) => point.label == *label || ending,
            Self::Cond(pred) => pred(point),
        }
    }

    /// Whether the search decides preemptions under this condition.
    pub fn is_star(&self) -> bool {
        matches!(self, Self::Star)
    }
}

impl fmt::Debug for Until {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Star => f.write_str("Star"),
            Self::First => f.write_str("First"),
            Self::End => f.write_str("End"),
            Self::Label(label) => write!(f, "Label({label:?})"),
            Self::Cond(_) => f.write_str("Cond(..)"),
        }
    }
}

/// Until condition plus excluded targets.
#[derive(Debug, Clone, Default)]
pub struct TransferCriteria {
    /// Where the resumed thread stops
    pub until: Until,
    /// Threads the next free choice of target must skip
    pub except: BTreeSet<ThreadId>,
}

impl TransferCriteria {
    /// Back to `Star` with nothing excluded.
    pub fn reset(&mut self) {
        self.until = Until::Star;
        self.except.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(label: &str) -> YieldPoint {
        YieldPoint::new(ThreadId(1), label, None, None)
    }

    #[test]
    fn test_star() {
        assert!(!Until::Star.holds(&at("x"), false));
        assert!(Until::Star.holds(&at("x"), true));
        assert!(Until::Star.holds(&at(ENDING_LABEL), false));
    }

    #[test]
    fn test_label_and_end() {
        let until = Until::Label("flag".into());
        assert!(until.holds(&at("flag"), false));
        assert!(!until.holds(&at("other"), true));
        assert!(until.holds(&at(ENDING_LABEL), false));
        assert!(!Until::End.holds(&at("flag"), true));
    }

    #[test]
    fn test_cond_and_first() {
        let until = Until::Cond(Arc::new(|p: &YieldPoint| p.count >= 2));
        let mut p = at("spin");
        assert!(!until.holds(&p, false));
        p.count = 2;
        assert!(until.holds(&p, false));
        assert!(Until::First.holds(&at("anything"), false));
    }

    #[test]
    fn test_reset() {
        let mut c = TransferCriteria { until: Until::End, except: [ThreadId(2)].into_iter().collect() };
        c.reset();
        assert!(c.until.is_star());
        assert!(c.except.is_empty());
    }
}
