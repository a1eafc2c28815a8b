//! Coverage - interesting orderings observed during exploration
//!
//! A coverage tuple is an ordered list of `(thread, label, count)` points.
//! The race tracker records each immediate race as a pair tuple
//! `(earlier access, later access)`; forall searches use the set of tuples
//! to decide which schedules are worth keeping.

use crate::domain::types::ThreadId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// One `(thread, label, count)` point of a coverage tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CoveragePoint {
    /// Thread that made the access
    pub thread: ThreadId,
    /// Yield label at which it was made
    pub label: String,
    /// Repeat count of the label at that point
    pub count: u32,
}

impl fmt::Display for CoveragePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.thread.as_usize(), self.label, self.count)
    }
}

/// Ordered list of coverage points.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CoverageTuple(pub Vec<CoveragePoint>);

impl CoverageTuple {
    /// A two-point tuple, the shape of a race.
    pub fn pair(first: CoveragePoint, second: CoveragePoint) -> Self {
        Self(vec![first, second])
    }
}

impl fmt::Display for CoverageTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<")?;
        for (i, point) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{point}")?;
        }
        write!(f, ">")
    }
}

/// Set of coverage tuples.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coverage {
    tuples: BTreeSet<CoverageTuple>,
}

impl Coverage {
    /// Empty coverage
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tuple; returns true when it was new.
    pub fn insert(&mut self, tuple: CoverageTuple) -> bool {
        self.tuples.insert(tuple)
    }

    /// Whether a tuple is present.
    pub fn contains(&self, tuple: &CoverageTuple) -> bool {
        self.tuples.contains(tuple)
    }

    /// Fold `other` into `self`; returns how many tuples were new.
    pub fn absorb(&mut self, other: &Self) -> usize {
        other
            .tuples
            .iter()
            .filter(|tuple| self.tuples.insert((*tuple).clone()))
            .count()
    }

    /// Whether `other` has any tuple `self` lacks.
    pub fn is_extended_by(&self, other: &Self) -> bool {
        other.tuples.iter().any(|tuple| !self.tuples.contains(tuple))
    }

    /// Number of tuples
    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    /// Whether there are no tuples
    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    /// Drop every tuple
    pub fn clear(&mut self) {
        self.tuples.clear();
    }

    /// Tuples in order
    pub fn iter(&self) -> impl Iterator<Item = &CoverageTuple> {
        self.tuples.iter()
    }
}

impl fmt::Display for Coverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Coverage ({} tuples):", self.tuples.len())?;
        for tuple in &self.tuples {
            writeln!(f, "  {tuple}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(t: usize, label: &str, count: u32) -> CoveragePoint {
        CoveragePoint { thread: ThreadId(t), label: label.to_string(), count }
    }

    #[test]
    fn test_insert_dedup() {
        let mut cov = Coverage::new();
        let race = CoverageTuple::pair(point(1, "write x", 1), point(2, "read x", 1));
        assert!(cov.insert(race.clone()));
        assert!(!cov.insert(race.clone()));
        assert!(cov.contains(&race));
        assert_eq!(cov.len(), 1);
    }

    #[test]
    fn test_absorb_counts_new_tuples() {
        let mut seen = Coverage::new();
        seen.insert(CoverageTuple::pair(point(1, "a", 1), point(2, "b", 1)));

        let mut run = Coverage::new();
        run.insert(CoverageTuple::pair(point(1, "a", 1), point(2, "b", 1)));
        run.insert(CoverageTuple::pair(point(2, "b", 1), point(1, "a", 2)));

        assert!(seen.is_extended_by(&run));
        assert_eq!(seen.absorb(&run), 1);
        assert!(!seen.is_extended_by(&run));
    }

    #[test]
    fn test_display() {
        let tuple = CoverageTuple::pair(point(1, "w", 2), point(3, "r", 1));
        assert_eq!(tuple.to_string(), "<(1, w, 2), (3, r, 1)>");
    }
}
