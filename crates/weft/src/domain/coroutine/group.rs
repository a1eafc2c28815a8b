//! CoroutineGroup - the set of threads a scenario created
//!
//! Threads are matched to coroutines by creation order within a run, so a
//! deterministic test case gets the same [`ThreadId`]s on every run and
//! the OS threads are reused.

use super::coroutine::{Coroutine, CoroutineBody};
use super::status::Status;
use crate::domain::error::EngineError;
use crate::domain::schedule::PointId;
use crate::domain::types::ThreadId;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// Bookkeeping the scheduler keeps per coroutine.
#[derive(Debug)]
pub struct Member {
    /// The coroutine
    pub co: Arc<Coroutine>,
    /// Point the coroutine is parked at (or last yielded at)
    pub yield_point: Option<PointId>,
    /// Transfer that last handed control to it
    pub resumed_by: Option<PointId>,
    /// Created by the current run
    pub active: bool,
}

impl Member {
    fn runnable(&self) -> bool {
        self.active && self.co.is_runnable()
    }

    fn ended(&self) -> bool {
        !self.active || self.co.status().is_ended()
    }
}

/// Coroutines of one scenario, in creation order.
#[derive(Debug)]
pub struct CoroutineGroup {
    main: Arc<Coroutine>,
    main_point: Option<PointId>,
    members: Vec<Member>,
    created: usize,
}

impl CoroutineGroup {
    /// Group around the controller's coroutine
    pub fn new(main: Arc<Coroutine>) -> Self {
        Self { main, main_point: None, members: Vec::new(), created: 0 }
    }

    /// Controller's coroutine
    pub fn main(&self) -> &Arc<Coroutine> {
        &self.main
    }

    /// Forget which threads the previous run created.
    pub fn restart(&mut self) {
        self.created = 0;
        self.main_point = None;
        for m in &mut self.members {
            m.active = false;
            m.yield_point = None;
            m.resumed_by = None;
        }
    }

    /// Create, or reuse, the next thread of this run and start `body` on it.
    pub fn create(
        &mut self,
        name: &str,
        body: Arc<dyn CoroutineBody>,
        wait: Duration,
    ) -> Result<ThreadId, EngineError> {
        let slot = self.created;
        self.created += 1;
        if slot == self.members.len() {
            let id = ThreadId::new(slot + 1);
            let co = Coroutine::new(id, name, &self.main);
            self.members.push(Member { co, yield_point: None, resumed_by: None, active: false });
        }
        let member = &mut self.members[slot];
        member.co.rename(name);
        member.co.start(&self.main, body, wait)?;
        member.active = true;
        member.yield_point = None;
        member.resumed_by = None;
        Ok(member.co.id())
    }

    /// Member by id (main has none).
    pub fn member(&self, id: ThreadId) -> Option<&Member> {
        id.as_usize().checked_sub(1).and_then(|i| self.members.get(i))
    }

    /// Mutable member by id.
    pub fn member_mut(&mut self, id: ThreadId) -> Option<&mut Member> {
        id.as_usize().checked_sub(1).and_then(|i| self.members.get_mut(i))
    }

    /// Coroutine by id, main included.
    pub fn coroutine(&self, id: ThreadId) -> Option<&Arc<Coroutine>> {
        if id.is_main() {
            Some(&self.main)
        } else {
            self.member(id).map(|m| &m.co)
        }
    }

    /// Whether `id` names a thread created by this run.
    pub fn contains(&self, id: ThreadId) -> bool {
        id.is_main() || self.member(id).is_some_and(|m| m.active)
    }

    /// Point a thread is parked at.
    pub fn yield_point(&self, id: ThreadId) -> Option<PointId> {
        if id.is_main() {
            self.main_point
        } else {
            self.member(id).and_then(|m| m.yield_point)
        }
    }

    /// Record the point a thread is parked at.
    pub fn set_yield_point(&mut self, id: ThreadId, point: Option<PointId>) {
        if id.is_main() {
            self.main_point = point;
        } else if let Some(m) = self.member_mut(id) {
            m.yield_point = point;
        }
    }

    /// Active members in creation order.
    pub fn active(&self) -> impl Iterator<Item = &Member> + '_ {
        self.members.iter().filter(|m| m.active)
    }

    /// Threads that may receive control now.
    pub fn enabled_set(&self) -> BTreeSet<ThreadId> {
        self.members.iter().filter(|m| m.runnable()).map(|m| m.co.id()).collect()
    }

    /// Whether `id` may receive control now.
    pub fn is_enabled(&self, id: ThreadId) -> bool {
        self.member(id).is_some_and(Member::runnable)
    }

    /// Every thread of this run returned from its function.
    pub fn is_all_ended(&self) -> bool {
        self.members.iter().all(Member::ended)
    }

    /// Active threads that have not ended.
    pub fn pending(&self) -> Vec<ThreadId> {
        self.members.iter().filter(|m| !m.ended()).map(|m| m.co.id()).collect()
    }

    /// First enabled thread in creation order that is not in `except` and,
    /// when `only` is given, is in `only`.
    pub fn get_next_enabled(
        &self,
        except: &BTreeSet<ThreadId>,
        only: Option<&BTreeSet<ThreadId>>,
    ) -> Option<ThreadId> {
        self.members
            .iter()
            .filter(|m| m.runnable())
            .map(|m| m.co.id())
            .find(|id| !except.contains(id) && only.map_or(true, |set| set.contains(id)))
    }

    /// Terminate and join every thread.
    pub fn finish_all(&mut self, wait: Duration) {
        for m in &mut self.members {
            m.co.finish(wait);
            m.active = false;
        }
    }

    /// Statuses of the active threads, for diagnostics.
    pub fn statuses(&self) -> Vec<(ThreadId, Status)> {
        self.active().map(|m| (m.co.id(), m.co.status())).collect()
    }
}

impl Drop for CoroutineGroup {
    fn drop(&mut self) {
        self.finish_all(Duration::from_millis(100));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::coroutine::{Exit, Permit};

    const WAIT: Duration = Duration::from_secs(5);

    /// Never runs: these tests only start threads and leave them parked.
    struct Idle;

    impl CoroutineBody for Idle {
        fn activate(&self, _co: &Arc<Coroutine>, _permit: Permit) -> Exit {
            Exit::Terminate
        }
    }

    fn ids(set: &BTreeSet<ThreadId>) -> Vec<usize> {
        set.iter().map(|t| t.as_usize()).collect()
    }

    #[test]
    fn test_create_assigns_ids_in_order() {
        let mut group = CoroutineGroup::new(Coroutine::main());
        let a = group.create("a", Arc::new(Idle), WAIT).unwrap();
        let b = group.create("b", Arc::new(Idle), WAIT).unwrap();
        assert_eq!((a, b), (ThreadId(1), ThreadId(2)));
        assert_eq!(ids(&group.enabled_set()), vec![1, 2]);
        assert!(!group.is_all_ended());
        group.finish_all(WAIT);
    }

    #[test]
    fn test_restart_reuses_threads() {
        let mut group = CoroutineGroup::new(Coroutine::main());
        group.create("a", Arc::new(Idle), WAIT).unwrap();
        group.create("b", Arc::new(Idle), WAIT).unwrap();

        group.restart();
        assert!(group.is_all_ended());
        assert!(group.enabled_set().is_empty());

        let a = group.create("a", Arc::new(Idle), WAIT).unwrap();
        assert_eq!(a, ThreadId(1));
        assert_eq!(ids(&group.enabled_set()), vec![1]);
        assert!(!group.contains(ThreadId(2)));
        group.finish_all(WAIT);
    }

    #[test]
    fn test_get_next_enabled_filters() {
        let mut group = CoroutineGroup::new(Coroutine::main());
        for name in ["a", "b", "c"] {
            group.create(name, Arc::new(Idle), WAIT).unwrap();
        }
        let none = BTreeSet::new();
        let except: BTreeSet<_> = [ThreadId(1)].into_iter().collect();
        let only: BTreeSet<_> = [ThreadId(1), ThreadId(3)].into_iter().collect();

        assert_eq!(group.get_next_enabled(&none, None), Some(ThreadId(1)));
        assert_eq!(group.get_next_enabled(&except, None), Some(ThreadId(2)));
        assert_eq!(group.get_next_enabled(&except, Some(&only)), Some(ThreadId(3)));

        if let Some(m) = group.member(ThreadId(3)) {
            m.co.set_status(Status::Ended);
        }
        assert_eq!(group.get_next_enabled(&except, Some(&only)), None);
        group.finish_all(WAIT);
    }
}
