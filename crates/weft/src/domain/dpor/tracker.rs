//! VcTracker - vector-clock race detection feeding DPOR
//!
//! # Algorithm
//!
//! For an access `a` by thread `t` to location `m` at logical time `n`:
//!
//! ```text
//! 1. for each last access b to m (skipping b.time == 0):
//!        conflicting(a, b) and thread(b) != t and NOT b.time <= vc(t)[thread(b)]
//!            => immediate race: coverage += (b, a),
//!               backtrack(prev(b)) += t   (or prev(b).enabled if t was not enabled there)
//! 2. if the last-access set was conflicting (or empty):
//!        vc(t) = (vc(m) ⊔ vc(t))[t := n];  vc(m) = vc(t)
//!    else
//!        vc(t)[t] = n
//! 3. last(m) = {a} if conflicting else last(m) ∪ {a}
//! 4. n += 1
//! ```
//!
//! `update_backtrack_sets` runs step 1 without the coverage update or any
//! clock change, as a look-ahead over accesses that are pending but not yet
//! made.
//!
//! The tracker never fails: races only feed coverage and backtrack sets.

use super::coverage::{CoveragePoint, CoverageTuple};
use super::vector_clock::VectorClock;
use crate::domain::schedule::{PointId, Schedule, SchedulePoint, YieldPoint};
use crate::domain::types::{Address, SharedAccess, ThreadId};
use std::collections::{BTreeSet, HashMap};
use tracing::trace;

/// Per-run vector-clock state.
#[derive(Debug, Clone)]
pub struct VcTracker {
    current_time: u64,
    thread_clocks: HashMap<ThreadId, VectorClock>,
    mem_clocks: HashMap<Address, VectorClock>,
    last_accesses: HashMap<Address, BTreeSet<PointId>>,
    races: u64,
}

impl Default for VcTracker {
    fn default() -> Self {
        Self::new()
    }
}

struct Race {
    earlier: PointId,
    prev: Option<PointId>,
    coverage: CoverageTuple,
}

fn coverage_point(y: &YieldPoint) -> CoveragePoint {
    CoveragePoint { thread: y.source, label: y.label.clone(), count: y.count }
}

impl VcTracker {
    /// Fresh tracker; logical time starts at one.
    pub fn new() -> Self {
        Self {
            current_time: 1,
            thread_clocks: HashMap::new(),
            mem_clocks: HashMap::new(),
            last_accesses: HashMap::new(),
            races: 0,
        }
    }

    /// Forget everything for a new run.
    pub fn restart(&mut self) {
        *self = Self::new();
    }

    /// Logical time the next access will get.
    pub fn current_time(&self) -> u64 {
        self.current_time
    }

    /// Clock of a thread.
    pub fn thread_clock(&self, thread: ThreadId) -> VectorClock {
        self.thread_clocks.get(&thread).cloned().unwrap_or_default()
    }

    /// Clock of a location.
    pub fn location_clock(&self, addr: Address) -> VectorClock {
        self.mem_clocks.get(&addr).cloned().unwrap_or_default()
    }

    /// Points that made the last accesses to `addr`.
    pub fn last_accesses(&self, addr: Address) -> impl Iterator<Item = PointId> + '_ {
        self.last_accesses.get(&addr).into_iter().flatten().copied()
    }

    /// Immediate races detected this run.
    pub fn races(&self) -> u64 {
        self.races
    }

    /// Step 1 of the algorithm: find immediate races of `current`.
    ///
    /// Returns the races and whether the last-access set conflicted.
    fn find_races(
        &self,
        schedule: &Schedule,
        current: &YieldPoint,
        access: &SharedAccess,
    ) -> (Vec<Race>, bool) {
        let Some(last) = self.last_accesses.get(&access.addr).filter(|set| !set.is_empty()) else {
            return (Vec::new(), true);
        };

        let tid = current.source;
        let vc_tid = self.thread_clock(tid);
        let mut conflicting = false;
        let mut races = Vec::new();

        for &id in last {
            let Some(earlier) = schedule.point(id).and_then(SchedulePoint::as_yield) else {
                continue;
            };
            let Some(earlier_access) = earlier.access.as_ref() else {
                continue;
            };
            if earlier_access.conflicts_with(access) {
                conflicting = true;
            } else {
                break;
            }
            if earlier_access.time == 0 {
                continue;
            }
            let last_tid = earlier.source;
            if last_tid != tid && earlier_access.time > vc_tid.get(last_tid) {
                races.push(Race {
                    earlier: id,
                    prev: earlier.prev,
                    coverage: CoverageTuple::pair(coverage_point(earlier), coverage_point(current)),
                });
            }
        }
        (races, conflicting)
    }

    /// Grow the backtrack set of each racing access's predecessor transfer.
    fn add_backtracks(schedule: &mut Schedule, races: &[Race], thread: ThreadId) -> usize {
        let mut grown = 0;
        for race in races {
            let Some(transfer) = race.prev.and_then(|prev| schedule.transfer_mut(prev)) else {
                continue;
            };
            if transfer.at.free_target && transfer.add_backtrack(thread) {
                grown += 1;
            }
        }
        grown
    }

    /// Look-ahead: grow backtrack sets for the pending access at `point`.
    pub fn update_backtrack_sets(&self, schedule: &mut Schedule, point: PointId) -> usize {
        let Some(current) = schedule.point(point).and_then(SchedulePoint::as_yield) else {
            return 0;
        };
        let Some(access) = current.access else {
            return 0;
        };
        let thread = current.source;
        let (races, _) = self.find_races(schedule, current, &access);
        Self::add_backtracks(schedule, &races, thread)
    }

    /// Consume the access made at `point`.
    ///
    /// Returns the number of immediate races it formed.
    pub fn on_access(&mut self, schedule: &mut Schedule, point: PointId) -> usize {
        let Some(current) = schedule.point(point).and_then(SchedulePoint::as_yield) else {
            return 0;
        };
        let Some(access) = current.access else {
            return 0;
        };
        let tid = current.source;
        let addr = access.addr;
        let (races, conflicting) = self.find_races(schedule, current, &access);

        for race in &races {
            trace!(earlier = ?race.earlier, current = ?point, tuple = %race.coverage, "immediate race");
            schedule.coverage_mut().insert(race.coverage.clone());
        }
        Self::add_backtracks(schedule, &races, tid);
        self.races += races.len() as u64;

        let now = self.current_time;
        let vc_tid = self.thread_clock(tid);
        if conflicting {
            let mut stamped = self.location_clock(addr).join(&vc_tid);
            stamped.set(tid, now);
            self.mem_clocks.insert(addr, stamped.clone());
            self.thread_clocks.insert(tid, stamped);
        } else {
            let mut stamped = vc_tid;
            stamped.set(tid, now);
            self.thread_clocks.insert(tid, stamped);
        }

        if let Some(a) = schedule
            .point_mut(point)
            .and_then(SchedulePoint::as_yield_mut)
            .and_then(|y| y.access.as_mut())
        {
            a.time = now;
        }

        let last = self.last_accesses.entry(addr).or_default();
        if conflicting {
            last.clear();
        }
        last.insert(point);

        self.current_time += 1;
        races.len()
    }
}
