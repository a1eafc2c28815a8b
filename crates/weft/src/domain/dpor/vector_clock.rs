//! Vector Clock Implementation
//!
//! Vector clocks track the happens-before relation between the accesses of
//! the coroutines under test.
//!
//! # Theory
//!
//! Given accesses e1 and e2:
//! - e1 happens-before e2 (e1 → e2) if VC(e1) ≤ VC(e2) entry-wise and they differ
//! - e1 and e2 are concurrent if neither happens-before the other
//!
//! # Implementation
//!
//! The clock is sparse: a thread with time zero has no entry. Coroutine ids
//! grow without a fixed bound, so the map is ordered by id for stable
//! printing and comparison.

use crate::domain::types::ThreadId;
use std::collections::BTreeMap;
use std::fmt;

/// Vector clock for tracking causality
///
/// # Representation
///
/// `clocks[t]` is the latest logical time of thread `t` known to the
/// owner of the clock. Missing entries read as zero.
///
/// ```text
/// T1: {T1: 5, T2: 2}   (T1 is at 5 and has seen T2 up to 2)
/// T2: {T1: 4, T2: 7}
/// ```
#[derive(Clone, Default, PartialEq, Eq)]
pub struct VectorClock {
    clocks: BTreeMap<ThreadId, u64>,
}

impl VectorClock {
    /// Create an empty (all-zero) vector clock
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get clock value for a specific thread
    #[inline]
    pub fn get(&self, thread: ThreadId) -> u64 {
        self.clocks.get(&thread).copied().unwrap_or(0)
    }

    /// Set clock value for a specific thread
    ///
    /// Setting zero removes the entry.
    #[inline]
    pub fn set(&mut self, thread: ThreadId, value: u64) {
        if value == 0 {
            self.clocks.remove(&thread);
        } else {
            self.clocks.insert(thread, value);
        }
    }

    /// Increment the clock for a specific thread
    #[inline]
    pub fn tick(&mut self, thread: ThreadId) {
        let next = self.get(thread).saturating_add(1);
        self.clocks.insert(thread, next);
    }

    /// Merge with another vector clock (element-wise max)
    ///
    /// ```text
    /// self:  {T1: 3, T2: 1}
    /// other: {T1: 2, T2: 5, T3: 1}
    /// result:{T1: 3, T2: 5, T3: 1}
    /// ```
    pub fn merge(&mut self, other: &Self) {
        for (&thread, &time) in &other.clocks {
            let entry = self.clocks.entry(thread).or_insert(0);
            *entry = (*entry).max(time);
        }
    }

    /// The join of two clocks, leaving both untouched.
    #[must_use]
    pub fn join(&self, other: &Self) -> Self {
        let mut joined = self.clone();
        joined.merge(other);
        joined
    }

    /// Compare a single entry: `self[t] <= other[t]`.
    #[inline]
    pub fn leq_at(&self, other: &Self, thread: ThreadId) -> bool {
        self.get(thread) <= other.get(thread)
    }

    /// Entry-wise `self <= other`.
    pub fn leq(&self, other: &Self) -> bool {
        self.clocks.iter().all(|(&t, &time)| time <= other.get(t))
    }

    /// Check if this clock happens-before another
    ///
    /// VC1 < VC2 iff every entry of VC1 is ≤ the matching entry of VC2 and
    /// the clocks are not equal.
    pub fn happens_before(&self, other: &Self) -> bool {
        self.leq(other) && self != other
    }

    /// Neither clock happens-before the other
    #[inline]
    pub fn concurrent(&self, other: &Self) -> bool {
        !self.happens_before(other) && !other.happens_before(self)
    }

    /// Number of non-zero entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.clocks.len()
    }

    /// Whether every entry is zero.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.clocks.is_empty()
    }

    /// Reset to all-zero.
    #[inline]
    pub fn clear(&mut self) {
        self.clocks.clear();
    }

    /// Non-zero entries in thread order.
    pub fn iter(&self) -> impl Iterator<Item = (ThreadId, u64)> + '_ {
        self.clocks.iter().map(|(&t, &time)| (t, time))
    }
}

impl fmt::Debug for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VC[")?;
        for (i, (thread, time)) in self.clocks.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:{}", thread.as_usize(), time)?;
        }
        write!(f, "]")
    }
}
