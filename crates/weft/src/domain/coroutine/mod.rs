//! Coroutine Module - cooperative threads over real OS threads
//!
//! # Module Structure
//!
//! ```text
//! domain/coroutine/
//! ├── status.rs     Status + AtomicStatus
//! ├── message.rs    Permit, Message
//! ├── coroutine.rs  one thread, its inbox and end semaphore
//! └── group.rs      the threads of a scenario, enabled-set queries
//! ```

#[allow(clippy::module_inception)]
pub mod coroutine;
pub mod group;
pub mod message;
pub mod status;

pub use coroutine::{Coroutine, CoroutineBody, Exit, WakeFn};
pub(crate) use coroutine::panic_message;
pub use group::{CoroutineGroup, Member};
pub use message::{Message, Permit};
pub use status::{AtomicStatus, Status};
