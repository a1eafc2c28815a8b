//! Point Arena - stable ids for schedule points
//!
//! Points refer to each other (a yield's `prev` transfer, a transfer's
//! `next` yield) and the race tracker holds on to the points that made the
//! last accesses to each location. All of these are `PointId`s into the
//! arena owned by the schedule. A removed slot bumps its generation, so a
//! stale id reads as absent instead of aliasing the slot's next occupant.

use super::point::SchedulePoint;
use std::fmt;

/// Handle to a point in a [`PointArena`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PointId {
    index: u32,
    generation: u32,
}

impl fmt::Debug for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}.{}", self.index, self.generation)
    }
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    point: Option<SchedulePoint>,
}

/// Generational slab of schedule points.
#[derive(Debug, Clone, Default)]
pub struct PointArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl PointArena {
    /// Empty arena
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a point and hand out its id.
    pub fn insert(&mut self, point: SchedulePoint) -> PointId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.point = Some(point);
            PointId { index, generation: slot.generation }
        } else {
            let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
            self.slots.push(Slot { generation: 0, point: Some(point) });
            PointId { index, generation: 0 }
        }
    }

    /// Look a point up; `None` for removed or stale ids.
    pub fn get(&self, id: PointId) -> Option<&SchedulePoint> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.point.as_ref())
    }

    /// Mutable lookup.
    pub fn get_mut(&mut self, id: PointId) -> Option<&mut SchedulePoint> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.point.as_mut())
    }

    /// Take a point out, invalidating its id.
    pub fn remove(&mut self, id: PointId) -> Option<SchedulePoint> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let point = slot.point.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Some(point)
    }

    /// Whether `id` is live.
    pub fn contains(&self, id: PointId) -> bool {
        self.get(id).is_some()
    }

    /// Number of live points
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Whether no point is live
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::schedule::point::ChoicePoint;
    use crate::domain::types::ThreadId;

    fn choice(v: u32) -> SchedulePoint {
        let mut c = ChoicePoint::new(ThreadId(1), 10);
        c.value = v;
        SchedulePoint::Choice(c)
    }

    #[test]
    fn test_insert_get_remove() {
        let mut arena = PointArena::new();
        let a = arena.insert(choice(1));
        let b = arena.insert(choice(2));
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(b).and_then(SchedulePoint::as_choice).map(|c| c.value), Some(2));

        assert!(arena.remove(a).is_some());
        assert!(arena.get(a).is_none());
        assert!(arena.remove(a).is_none());
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_stale_id_does_not_alias() {
        let mut arena = PointArena::new();
        let a = arena.insert(choice(1));
        arena.remove(a);
        let b = arena.insert(choice(5));

        assert_ne!(a, b);
        assert!(arena.get(a).is_none());
        assert!(arena.contains(b));
    }
}
