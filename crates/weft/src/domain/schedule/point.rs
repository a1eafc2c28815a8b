//! Schedule Points - the decisions a run is made of
//!
//! ```text
//! SchedulePoint
//! ├── Yield     a thread reached a labelled point (maybe with an access)
//! ├── Transfer  a Yield at which control was handed to `target`
//! └── Choice    a value picked among `arity` alternatives
//! ```
//!
//! A `TransferPoint` embeds the `YieldPoint` it was taken at. Its
//! `enabled`, `done` and `backtrack` sets drive the search: `done` holds
//! every target already tried from this point, `backtrack` holds the
//! targets DPOR still requires. Both are kept inside `enabled`.

use super::arena::PointId;
use crate::domain::types::{SharedAccess, SourceLocation, ThreadId, MAIN_LABEL};
use std::collections::BTreeSet;
use std::fmt;

/// A thread reached a labelled point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YieldPoint {
    /// Thread that yielded
    pub source: ThreadId,
    /// Label of the point
    pub label: String,
    /// How many consecutive times `source` yielded at `label`
    pub count: u32,
    /// Where the latest occurrence happened
    pub loc: Option<SourceLocation>,
    /// Access about to be made at the latest occurrence
    pub access: Option<SharedAccess>,
    /// Transfer that gave `source` control before this point
    pub prev: Option<PointId>,
    /// Whether the target was left to the search (`transfer_star`)
    pub free_target: bool,
    /// Whether the repeat count may be lowered by backtracking
    pub free_count: bool,
    /// False while `source` is a placeholder read from a schedule file
    pub resolved: bool,
}

impl YieldPoint {
    /// A fresh point with count one.
    pub fn new(
        source: ThreadId,
        label: impl Into<String>,
        loc: Option<SourceLocation>,
        access: Option<SharedAccess>,
    ) -> Self {
        Self {
            source,
            label: label.into(),
            count: 1,
            loc,
            access,
            prev: None,
            free_target: false,
            free_count: false,
            resolved: true,
        }
    }

    /// Fold one more occurrence of the same label into this point.
    ///
    /// The newest access replaces the old one with a zero timestamp.
    pub fn coalesce(&mut self, loc: Option<SourceLocation>, access: Option<SharedAccess>) {
        self.count = self.count.saturating_add(1);
        self.loc = loc;
        self.access = access.map(|mut a| {
            a.time = 0;
            a
        });
    }

    /// Whether the controller produced this point.
    pub fn is_main(&self) -> bool {
        self.source.is_main() && self.label == MAIN_LABEL
    }
}

/// A yield at which control moved to `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPoint {
    /// The point the transfer was taken at
    pub at: YieldPoint,
    /// Receiver of control; `None` marks a backtrack point whose target is
    /// picked again on the next run
    pub target: Option<ThreadId>,
    /// False while `target` is a placeholder read from a schedule file
    pub target_resolved: bool,
    /// Occurrences of `at.label` still to pass before transferring
    pub rem_count: u32,
    /// Threads enabled when the decision was made
    pub enabled: BTreeSet<ThreadId>,
    /// Targets already tried
    pub done: BTreeSet<ThreadId>,
    /// Targets DPOR still wants tried
    pub backtrack: BTreeSet<ThreadId>,
    /// Point of `target` that control resumed at
    pub next: Option<PointId>,
}

impl TransferPoint {
    /// Turn a yield into a transfer to `target`.
    pub fn new(at: YieldPoint, target: Option<ThreadId>) -> Self {
        let rem_count = at.count;
        Self {
            at,
            target,
            target_resolved: true,
            rem_count,
            enabled: BTreeSet::new(),
            done: BTreeSet::new(),
            backtrack: BTreeSet::new(),
            next: None,
        }
    }

    /// Pass one occurrence; true once the transfer is due.
    pub fn consume_once(&mut self) -> bool {
        self.rem_count = self.rem_count.saturating_sub(1);
        self.rem_count == 0
    }

    /// Mark every occurrence as passed.
    pub fn consume_all(&mut self) {
        self.rem_count = 0;
    }

    /// Forget what the last run did with this point.
    pub fn reset(&mut self) {
        self.rem_count = self.at.count;
        self.next = None;
        self.at.prev = None;
    }

    /// Nothing was tried from here yet.
    pub fn is_first_transition(&self) -> bool {
        self.done.is_empty()
    }

    /// Target is to be picked again.
    pub fn is_backtrack_point(&self) -> bool {
        self.target.is_none()
    }

    /// Candidate targets not yet tried.
    ///
    /// Under DPOR the candidates are the backtrack set, otherwise every
    /// thread that was enabled.
    pub fn untried_targets(&self, dpor: bool) -> impl Iterator<Item = ThreadId> + '_ {
        let pool = if dpor { &self.backtrack } else { &self.enabled };
        pool.iter().copied().filter(move |t| !self.done.contains(t))
    }

    /// Whether another target remains to be tried.
    pub fn has_more_targets(&self, dpor: bool) -> bool {
        self.untried_targets(dpor).next().is_some()
    }

    /// Clear the target so the next run picks an untried one.
    pub fn make_backtrack_point(&mut self) {
        self.target = None;
        self.next = None;
        self.rem_count = self.at.count;
    }

    /// Record a DPOR request to try `thread` here.
    ///
    /// Falls back to the whole enabled set when `thread` was not enabled
    /// at this point.
    pub fn add_backtrack(&mut self, thread: ThreadId) -> bool {
        if self.enabled.contains(&thread) {
            self.backtrack.insert(thread)
        } else {
            let before = self.backtrack.len();
            self.backtrack.extend(self.enabled.iter().copied());
            self.backtrack.len() != before
        }
    }

    /// Whether source and target refer to live coroutines.
    pub fn is_resolved(&self) -> bool {
        self.at.resolved && self.target_resolved
    }

    fn sets_consistent(&self) -> bool {
        self.done.is_subset(&self.enabled) && self.backtrack.is_subset(&self.enabled)
    }
}

/// A value picked among `arity` alternatives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChoicePoint {
    /// Thread that made the choice
    pub source: ThreadId,
    /// Picked alternative
    pub value: u32,
    /// Number of alternatives
    pub arity: u32,
}

impl ChoicePoint {
    /// First alternative of `arity`.
    pub const fn new(source: ThreadId, arity: u32) -> Self {
        Self { source, value: 0, arity }
    }

    /// Move to the next alternative; false when none is left.
    pub fn choose_next(&mut self) -> bool {
        if self.value + 1 < self.arity {
            self.value += 1;
            true
        } else {
            false
        }
    }
}

/// A recorded scheduling decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulePoint {
    /// Labelled point, no handoff
    Yield(YieldPoint),
    /// Handoff of control
    Transfer(TransferPoint),
    /// Branch decision
    Choice(ChoicePoint),
}

impl SchedulePoint {
    /// Thread that produced the point.
    pub fn source(&self) -> ThreadId {
        match self {
            Self::Yield(y) => y.source,
            Self::Transfer(t) => t.at.source,
            Self::Choice(c) => c.source,
        }
    }

    /// Yield label, if the point has one.
    pub fn label(&self) -> Option<&str> {
        match self {
            Self::Yield(y) => Some(&y.label),
            Self::Transfer(t) => Some(&t.at.label),
            Self::Choice(_) => None,
        }
    }

    /// Whether this is a transfer.
    pub fn is_transfer(&self) -> bool {
        matches!(self, Self::Transfer(_))
    }

    /// Whether this is a choice.
    pub fn is_choice(&self) -> bool {
        matches!(self, Self::Choice(_))
    }

    /// The yield part of a yield or transfer.
    pub fn as_yield(&self) -> Option<&YieldPoint> {
        match self {
            Self::Yield(y) => Some(y),
            Self::Transfer(t) => Some(&t.at),
            Self::Choice(_) => None,
        }
    }

    /// Mutable yield part of a yield or transfer.
    pub fn as_yield_mut(&mut self) -> Option<&mut YieldPoint> {
        match self {
            Self::Yield(y) => Some(y),
            Self::Transfer(t) => Some(&mut t.at),
            Self::Choice(_) => None,
        }
    }

    /// The transfer, if this is one.
    pub fn as_transfer(&self) -> Option<&TransferPoint> {
        match self {
            Self::Transfer(t) => Some(t),
            _ => None,
        }
    }

    /// Mutable transfer, if this is one.
    pub fn as_transfer_mut(&mut self) -> Option<&mut TransferPoint> {
        match self {
            Self::Transfer(t) => Some(t),
            _ => None,
        }
    }

    /// The choice, if this is one.
    pub fn as_choice(&self) -> Option<&ChoicePoint> {
        match self {
            Self::Choice(c) => Some(c),
            _ => None,
        }
    }

    /// Mutable choice, if this is one.
    pub fn as_choice_mut(&mut self) -> Option<&mut ChoicePoint> {
        match self {
            Self::Choice(c) => Some(c),
            _ => None,
        }
    }

    /// Whether every endpoint refers to a live coroutine.
    pub fn is_resolved(&self) -> bool {
        match self {
            Self::Yield(y) => y.resolved,
            Self::Transfer(t) => t.is_resolved(),
            Self::Choice(_) => true,
        }
    }

    /// Checks `done ⊆ enabled` and `backtrack ⊆ enabled` for transfers.
    pub fn invariants_hold(&self) -> bool {
        self.as_transfer().map_or(true, TransferPoint::sets_consistent)
    }
}

fn fmt_set(f: &mut fmt::Formatter<'_>, name: &str, set: &BTreeSet<ThreadId>) -> fmt::Result {
    write!(f, " {name}={{")?;
    for (i, t) in set.iter().enumerate() {
        if i > 0 {
            write!(f, ",")?;
        }
        write!(f, "{}", t.as_usize())?;
    }
    write!(f, "}}")
}

impl fmt::Display for YieldPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Yield({} \"{}\" x{})", self.source.as_usize(), self.label, self.count)?;
        if let Some(access) = &self.access {
            write!(f, " {access}")?;
        }
        if let Some(loc) = &self.loc {
            write!(f, " at {loc}")?;
        }
        Ok(())
    }
}

impl fmt::Display for SchedulePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Yield(y) => write!(f, "{y}"),
            Self::Transfer(t) => {
                let target = t
                    .target
                    .map_or_else(|| "?".to_string(), |tid| tid.as_usize().to_string());
                write!(
                    f,
                    "Transfer({} -> {target} \"{}\" x{} rem={})",
                    t.at.source.as_usize(),
                    t.at.label,
                    t.at.count,
                    t.rem_count
                )?;
                fmt_set(f, "enabled", &t.enabled)?;
                fmt_set(f, "done", &t.done)?;
                fmt_set(f, "backtrack", &t.backtrack)
            }
            Self::Choice(c) => write!(
                f,
                "Choice({} value={}/{})",
                c.source.as_usize(),
                c.value,
                c.arity
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Address;

    fn transfer_with(enabled: &[usize]) -> TransferPoint {
        let mut t = TransferPoint::new(YieldPoint::new(ThreadId::MAIN, MAIN_LABEL, None, None), None);
        t.enabled = enabled.iter().map(|&i| ThreadId(i)).collect();
        t
    }

    #[test]
    fn test_coalesce_resets_time() {
        let mut access = SharedAccess::write(Address(8), 4);
        access.time = 9;
        let mut y = YieldPoint::new(ThreadId(1), "w", None, Some(access));
        y.coalesce(None, Some(access));
        assert_eq!(y.count, 2);
        assert_eq!(y.access.map(|a| a.time), Some(0));
    }

    #[test]
    fn test_consume_once_counts_down() {
        let mut y = YieldPoint::new(ThreadId(1), "loop", None, None);
        y.count = 3;
        let mut t = TransferPoint::new(y, Some(ThreadId::MAIN));
        assert!(!t.consume_once());
        assert!(!t.consume_once());
        assert!(t.consume_once());
        t.reset();
        assert_eq!(t.rem_count, 3);
    }

    #[test]
    fn test_untried_targets_respects_dpor() {
        let mut t = transfer_with(&[1, 2, 3]);
        t.done.insert(ThreadId(1));
        t.backtrack.insert(ThreadId(1));

        assert!(t.has_more_targets(false));
        assert!(!t.has_more_targets(true));

        t.backtrack.insert(ThreadId(3));
        assert_eq!(t.untried_targets(true).collect::<Vec<_>>(), vec![ThreadId(3)]);
    }

    #[test]
    fn test_add_backtrack_falls_back_to_enabled() {
        let mut t = transfer_with(&[1, 2]);
        assert!(t.add_backtrack(ThreadId(2)));
        assert!(!t.add_backtrack(ThreadId(2)));
        assert!(t.add_backtrack(ThreadId(7)));
        assert_eq!(t.backtrack.len(), 2);
        assert!(SchedulePoint::Transfer(t).invariants_hold());
    }

    #[test]
    fn test_choice_next() {
        let mut c = ChoicePoint::new(ThreadId(1), 3);
        assert!(c.choose_next());
        assert!(c.choose_next());
        assert!(!c.choose_next());
        assert_eq!(c.value, 2);
    }

    #[test]
    fn test_make_backtrack_point() {
        let mut t = transfer_with(&[1, 2]);
        t.target = Some(ThreadId(1));
        t.done.insert(ThreadId(1));
        t.make_backtrack_point();
        assert!(t.is_backtrack_point());
        assert!(!t.is_first_transition());
    }
}
