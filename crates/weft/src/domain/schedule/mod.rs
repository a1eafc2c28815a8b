//! Schedule Module - recording and replaying scheduling decisions
//!
//! # Module Structure
//!
//! ```text
//! domain/schedule/
//! ├── point.rs     YieldPoint, TransferPoint, ChoicePoint
//! ├── arena.rs     generational storage addressed by PointId
//! ├── schedule.rs  ordered sequence + cursor + coverage
//! └── mod.rs       this file
//! ```

pub mod arena;
pub mod point;
#[allow(clippy::module_inception)]
pub mod schedule;

pub use arena::{PointArena, PointId};
pub use point::{ChoicePoint, SchedulePoint, TransferPoint, YieldPoint};
pub use schedule::{Schedule, Transition};
