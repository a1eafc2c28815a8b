//! Integration Test: race detection feeding DPOR backtrack sets
//!
//! Two threads run one after the other, each behind its own main transfer.
//! Whenever their accesses overlap with at least one write, the tracker
//! must ask the first transfer to also try the second thread.
//!
//! Only the last accesses to a location are checked, so the generated
//! threads touch each location at most once.

use proptest::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use weft::domain::{
    Address,
    Controller,
    ControlResult,
    PointId,
    Schedule,
    SchedulePoint,
    SharedAccess,
    ThreadId,
    TransferPoint,
    VcTracker,
    YieldPoint,
    MAIN_LABEL,
};
use weft::{EngineConfig, Outcome, Scenario};

#[derive(Debug, Clone, Copy)]
struct Op {
    addr: u64,
    write: bool,
}

impl Op {
    fn access(self) -> SharedAccess {
        if self.write {
            SharedAccess::write(Address(self.addr), 8)
        } else {
            SharedAccess::read(Address(self.addr), 8)
        }
    }

    fn conflicts(self, other: Self) -> bool {
        self.addr == other.addr && (self.write || other.write)
    }
}

fn main_transfer(s: &mut Schedule, target: usize) -> PointId {
    let mut at = YieldPoint::new(ThreadId::MAIN, MAIN_LABEL, None, None);
    at.free_target = true;
    let mut t = TransferPoint::new(at, Some(ThreadId(target)));
    t.enabled = [ThreadId(1), ThreadId(2)].into_iter().collect();
    t.done.insert(ThreadId(target));
    t.backtrack.insert(ThreadId(target));
    s.add_last(SchedulePoint::Transfer(t))
}

fn run_thread(s: &mut Schedule, tracker: &mut VcTracker, thread: usize, ops: &[Op]) -> (PointId, usize) {
    let entry = main_transfer(s, thread);
    let mut races = 0;
    for op in ops {
        let label = if op.write { "write" } else { "read" };
        let mut y = YieldPoint::new(ThreadId(thread), label, None, Some(op.access()));
        y.prev = Some(entry);
        let id = s.add_last(SchedulePoint::Yield(y));
        races += tracker.on_access(s, id);
    }
    (entry, races)
}

fn backtrack_of(s: &Schedule, id: PointId) -> Vec<ThreadId> {
    s.point(id)
        .and_then(SchedulePoint::as_transfer)
        .map(|t| t.backtrack.iter().copied().collect())
        .unwrap_or_default()
}

/// Each thread touches each of four locations at most once.
fn arb_ops() -> impl Strategy<Value = Vec<Op>> {
    proptest::collection::vec(proptest::option::of(any::<bool>()), 4).prop_map(|slots| {
        slots
            .into_iter()
            .zip(0u64..)
            .filter_map(|(write, addr)| write.map(|write| Op { addr, write }))
            .collect()
    })
}

#[test]
fn test_read_read_is_not_a_race() {
    let mut s = Schedule::new();
    let mut tracker = VcTracker::new();
    let read = Op { addr: 1, write: false };

    let (first, _) = run_thread(&mut s, &mut tracker, 1, &[read]);
    let (_, races) = run_thread(&mut s, &mut tracker, 2, &[read]);

    assert_eq!(races, 0);
    assert_eq!(backtrack_of(&s, first), vec![ThreadId(1)]);
}

#[test]
fn test_write_after_read_is_a_race() {
    let mut s = Schedule::new();
    let mut tracker = VcTracker::new();

    let (first, _) = run_thread(&mut s, &mut tracker, 1, &[Op { addr: 1, write: false }]);
    let (_, races) = run_thread(&mut s, &mut tracker, 2, &[Op { addr: 1, write: true }]);

    assert_eq!(races, 1);
    assert_eq!(backtrack_of(&s, first), vec![ThreadId(1), ThreadId(2)]);
    assert_eq!(tracker.races(), 1);
}

proptest! {
    #[test]
    fn test_conflicting_threads_land_in_backtrack_set(t1 in arb_ops(), t2 in arb_ops()) {
        let mut s = Schedule::new();
        let mut tracker = VcTracker::new();

        let (first, _) = run_thread(&mut s, &mut tracker, 1, &t1);
        run_thread(&mut s, &mut tracker, 2, &t2);

        let conflict = t1.iter().any(|&a| t2.iter().any(|&b| a.conflicts(b)));
        let backtrack = backtrack_of(&s, first);
        prop_assert_eq!(conflict, backtrack.contains(&ThreadId(2)));
        prop_assert!(backtrack.contains(&ThreadId(1)));
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Through The Engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn disjoint_writers(dpor: bool) -> u64 {
    let cells = Arc::new([AtomicU64::new(0), AtomicU64::new(0)]);
    let scenario = Scenario::new("disjoint writers", EngineConfig::default().with_dpor(dpor)).unwrap();
    let result = scenario
        .explore(&mut |ctl: &mut Controller| -> ControlResult {
            for i in 0..2 {
                let c = Arc::clone(&cells);
                ctl.create_thread(&format!("w{i}"), move |cx| {
                    cx.write(Address::of(&c[i]))?;
                    c[i].store(1, Ordering::SeqCst);
                    Ok(())
                })?;
            }
            ctl.exhaustive_search()
        })
        .unwrap();
    match result.outcome {
        Outcome::Forall { num_paths, .. } => num_paths,
        other => panic!("independent writers cannot fail: {other}"),
    }
}

#[test]
fn test_dpor_never_explores_more_paths() {
    let plain = disjoint_writers(false);
    let reduced = disjoint_writers(true);
    assert!(reduced >= 1);
    assert!(reduced <= plain, "dpor explored {reduced} paths, plain search {plain}");
}
