//! Schedule - the ordered, replayable log of one run's decisions
//!
//! # Layout
//!
//! ```text
//!  points:  [ p0 | p1 | p2 | p3 | p4 ]
//!                       ^
//!                     index
//!  p0..p1  replayed prefix, already consumed this run
//!  p2..    recorded by an earlier run, still to be replayed
//! ```
//!
//! # Invariants
//!
//! - `0 ≤ index ≤ len` at all times
//! - after `remove_current_and_beyond`, `index == len`
//! - every id in `points` is live in `arena`

use super::arena::{PointArena, PointId};
use super::point::{SchedulePoint, TransferPoint};
use crate::domain::dpor::Coverage;
use crate::domain::types::ThreadId;
use std::fmt;

/// One handoff of control as recorded in a schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// Thread that gave up control
    pub source: ThreadId,
    /// Thread that received it
    pub target: ThreadId,
    /// Label of the yield the handoff happened at
    pub label: String,
    /// Occurrence of the label at which it happened
    pub count: u32,
}

/// Ordered sequence of schedule points plus a cursor.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    arena: PointArena,
    points: Vec<PointId>,
    index: usize,
    coverage: Coverage,
}

impl Schedule {
    /// Empty schedule
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of points in the sequence
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the sequence is empty
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Cursor position
    pub fn index(&self) -> usize {
        self.index
    }

    /// Store a point without placing it in the sequence yet.
    pub fn alloc(&mut self, point: SchedulePoint) -> PointId {
        self.arena.insert(point)
    }

    /// Drop an allocated point that never entered the sequence.
    pub fn free(&mut self, id: PointId) -> Option<SchedulePoint> {
        debug_assert!(!self.points.contains(&id));
        self.arena.remove(id)
    }

    /// Look a point up by id.
    pub fn point(&self, id: PointId) -> Option<&SchedulePoint> {
        self.arena.get(id)
    }

    /// Mutable lookup by id.
    pub fn point_mut(&mut self, id: PointId) -> Option<&mut SchedulePoint> {
        self.arena.get_mut(id)
    }

    /// Transfer lookup by id.
    pub fn transfer_mut(&mut self, id: PointId) -> Option<&mut TransferPoint> {
        self.arena.get_mut(id).and_then(SchedulePoint::as_transfer_mut)
    }

    /// Insert an allocated point at the cursor, optionally stepping past it.
    pub fn add_current(&mut self, id: PointId, consume: bool) {
        debug_assert!(self.arena.contains(id));
        self.points.insert(self.index, id);
        if consume {
            self.index += 1;
        }
    }

    /// Allocate `point` and append it to the sequence.
    pub fn add_last(&mut self, point: SchedulePoint) -> PointId {
        let id = self.arena.insert(point);
        self.points.push(id);
        id
    }

    /// Point at the cursor, if any.
    pub fn current(&self) -> Option<PointId> {
        self.points.get(self.index).copied()
    }

    /// Whether a point remains at the cursor.
    pub fn has_current(&self) -> bool {
        self.index < self.points.len()
    }

    /// Step the cursor past the current point.
    pub fn consume_current(&mut self) {
        debug_assert!(self.has_current());
        if self.index < self.points.len() {
            self.index += 1;
        }
    }

    /// Last point of the sequence.
    pub fn last(&self) -> Option<PointId> {
        self.points.last().copied()
    }

    /// Point just before the cursor.
    pub fn previous(&self) -> Option<PointId> {
        self.index.checked_sub(1).and_then(|i| self.points.get(i).copied())
    }

    /// Discard the unexplored suffix starting at the cursor.
    pub fn remove_current_and_beyond(&mut self) {
        for id in self.points.split_off(self.index) {
            self.arena.remove(id);
        }
        debug_assert_eq!(self.index, self.points.len());
    }

    /// Take the last point out of the sequence.
    pub fn remove_last(&mut self) -> Option<SchedulePoint> {
        let id = self.points.pop()?;
        self.index = self.index.min(self.points.len());
        self.arena.remove(id)
    }

    /// Remove a specific point from the sequence.
    pub fn remove(&mut self, id: PointId) -> Option<SchedulePoint> {
        let pos = self.points.iter().position(|&p| p == id)?;
        self.points.remove(pos);
        if pos < self.index {
            self.index -= 1;
        }
        self.arena.remove(id)
    }

    /// Prepare the recorded points for another run.
    ///
    /// Transfers get their counters reset, choices stay, bare yields go.
    pub fn clear_untaken_points(&mut self) {
        let mut kept = Vec::with_capacity(self.points.len());
        for id in std::mem::take(&mut self.points) {
            match self.arena.get_mut(id) {
                Some(SchedulePoint::Transfer(t)) => {
                    t.reset();
                    kept.push(id);
                }
                Some(SchedulePoint::Choice(_)) => kept.push(id),
                Some(SchedulePoint::Yield(_)) => {
                    self.arena.remove(id);
                }
                None => {}
            }
        }
        self.points = kept;
        self.index = self.index.min(self.points.len());
    }

    /// Rewind for a new run over the same decisions.
    pub fn restart(&mut self) {
        self.clear_untaken_points();
        self.index = 0;
        self.coverage.clear();
    }

    /// Append clones of every point of `other`.
    pub fn extend_points(&mut self, other: &Self) {
        for point in other.iter() {
            self.add_last(point.clone());
        }
    }

    /// Points in sequence order.
    pub fn iter(&self) -> impl Iterator<Item = &SchedulePoint> + '_ {
        self.points.iter().filter_map(|&id| self.arena.get(id))
    }

    /// Ids in sequence order.
    pub fn ids(&self) -> &[PointId] {
        &self.points
    }

    /// Every handoff with a known target, in order.
    pub fn transitions(&self) -> Vec<Transition> {
        self.iter()
            .filter_map(SchedulePoint::as_transfer)
            .filter_map(|t| {
                t.target.map(|target| Transition {
                    source: t.at.source,
                    target,
                    label: t.at.label.clone(),
                    count: t.at.count,
                })
            })
            .collect()
    }

    /// Races and other tuples seen this run
    pub fn coverage(&self) -> &Coverage {
        &self.coverage
    }

    /// Mutable coverage
    pub fn coverage_mut(&mut self) -> &mut Coverage {
        &mut self.coverage
    }

    /// Whether every point refers to live coroutines.
    pub fn is_resolved(&self) -> bool {
        self.iter().all(SchedulePoint::is_resolved)
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "***** Begin Schedule *****")?;
        for (i, point) in self.iter().enumerate() {
            let marker = if i == self.index { "CURRENT -> " } else { "" };
            writeln!(f, "{marker}{i}: {point}")?;
        }
        if self.index == self.points.len() {
            writeln!(f, "CURRENT -> <end>")?;
        }
        write!(f, "{}", self.coverage)?;
        writeln!(f, "***** End Schedule *****")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::schedule::point::{ChoicePoint, YieldPoint};
    use crate::domain::types::MAIN_LABEL;
    use proptest::prelude::*;

    fn yield_point(t: usize, label: &str) -> SchedulePoint {
        SchedulePoint::Yield(YieldPoint::new(ThreadId(t), label, None, None))
    }

    fn transfer(from: usize, to: usize, label: &str) -> SchedulePoint {
        let y = YieldPoint::new(ThreadId(from), label, None, None);
        SchedulePoint::Transfer(TransferPoint::new(y, Some(ThreadId(to))))
    }

    #[test]
    fn test_add_current_and_consume() {
        let mut s = Schedule::new();
        let a = s.alloc(transfer(0, 1, MAIN_LABEL));
        s.add_current(a, false);
        assert_eq!(s.current(), Some(a));
        assert_eq!(s.index(), 0);

        s.consume_current();
        assert!(!s.has_current());
        assert_eq!(s.current(), None);

        let b = s.alloc(yield_point(1, "x"));
        s.add_current(b, true);
        assert_eq!(s.index(), 2);
        assert_eq!(s.previous(), Some(b));
    }

    #[test]
    fn test_remove_current_and_beyond() {
        let mut s = Schedule::new();
        s.add_last(transfer(0, 1, MAIN_LABEL));
        s.add_last(yield_point(1, "x"));
        s.add_last(transfer(1, 0, "y"));
        s.consume_current();

        s.remove_current_and_beyond();
        assert_eq!(s.len(), 1);
        assert_eq!(s.index(), s.len());
    }

    #[test]
    fn test_clear_untaken_points() {
        let mut s = Schedule::new();
        let t = s.add_last(transfer(0, 1, MAIN_LABEL));
        s.add_last(yield_point(1, "x"));
        s.add_last(SchedulePoint::Choice(ChoicePoint::new(ThreadId(1), 2)));
        if let Some(tp) = s.transfer_mut(t) {
            tp.consume_all();
        }

        s.restart();
        assert_eq!(s.len(), 2);
        assert_eq!(s.index(), 0);
        assert_eq!(s.transfer_mut(t).map(|tp| tp.rem_count), Some(1));
        assert!(s.iter().all(|p| p.is_transfer() || p.is_choice()));
    }

    #[test]
    fn test_clone_is_deep() {
        let mut s = Schedule::new();
        let t = s.add_last(transfer(0, 1, MAIN_LABEL));
        let copy = s.clone();
        if let Some(tp) = s.transfer_mut(t) {
            tp.done.insert(ThreadId(1));
        }
        assert!(copy.point(t).and_then(SchedulePoint::as_transfer).is_some_and(|tp| tp.done.is_empty()));
    }

    #[test]
    fn test_transitions() {
        let mut s = Schedule::new();
        s.add_last(transfer(0, 1, MAIN_LABEL));
        s.add_last(yield_point(1, "x"));
        s.add_last(transfer(1, 0, "y"));
        let trans = s.transitions();
        assert_eq!(trans.len(), 2);
        assert_eq!(trans[1].source, ThreadId(1));
        assert_eq!(trans[1].target, ThreadId::MAIN);
        assert_eq!(trans[1].label, "y");
    }

    #[test]
    fn test_display_marks_cursor() {
        let mut s = Schedule::new();
        s.add_last(transfer(0, 1, MAIN_LABEL));
        let text = s.to_string();
        assert!(text.starts_with("***** Begin Schedule *****"));
        assert!(text.contains("CURRENT -> 0:"));
    }

    #[derive(Debug, Clone)]
    enum Op {
        AddCurrent(bool),
        AddLast,
        Consume,
        RemoveBeyond,
        RemoveLast,
        ClearUntaken,
        Restart,
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            any::<bool>().prop_map(Op::AddCurrent),
            Just(Op::AddLast),
            Just(Op::Consume),
            Just(Op::RemoveBeyond),
            Just(Op::RemoveLast),
            Just(Op::ClearUntaken),
            Just(Op::Restart),
        ]
    }

    proptest! {
        #[test]
        fn test_cursor_invariant(ops in proptest::collection::vec(arb_op(), 0..60)) {
            let mut s = Schedule::new();
            for (i, op) in ops.into_iter().enumerate() {
                match op {
                    Op::AddCurrent(consume) => {
                        let id = s.alloc(yield_point(1, "x"));
                        s.add_current(id, consume);
                    }
                    Op::AddLast => {
                        s.add_last(transfer(0, 1 + i % 3, MAIN_LABEL));
                    }
                    Op::Consume => {
                        if s.has_current() {
                            s.consume_current();
                        }
                    }
                    Op::RemoveBeyond => {
                        s.remove_current_and_beyond();
                        prop_assert_eq!(s.index(), s.len());
                    }
                    Op::RemoveLast => {
                        s.remove_last();
                    }
                    Op::ClearUntaken => s.clear_untaken_points(),
                    Op::Restart => s.restart(),
                }
                prop_assert!(s.index() <= s.len());
                prop_assert_eq!(s.iter().count(), s.len());
            }
        }
    }
}
