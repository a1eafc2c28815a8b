//! Core Types - Identities, Accesses and Source Locations
//!
//! These are the small value types every other domain module speaks in:
//! thread identities, shared-memory accesses, and the source locations
//! attached to yield points.
//!
//! ```text
//! ThreadId(0)  ── the controller ("main")
//! ThreadId(1..) ── threads of the program under test, in creation order
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Label carried by every yield the controller makes.
pub const MAIN_LABEL: &str = "main";

/// Label of the final yield a thread makes after its function returns.
pub const ENDING_LABEL: &str = "ending";

/// Coroutine identifier
///
/// Identity is a small integer. Zero is reserved for the controller, every
/// thread of the program under test gets the next free id when it is first
/// created and keeps it across runs.
///
/// # Example
///
/// ```rust
/// use weft::domain::types::ThreadId;
///
/// let main = ThreadId::MAIN;
/// let t1 = ThreadId::new(1);
///
/// assert!(main.is_main());
/// assert_ne!(main, t1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadId(pub usize);

impl ThreadId {
    /// The controller coroutine.
    pub const MAIN: Self = Self(0);

    /// Create a new ThreadId
    #[inline(always)]
    pub const fn new(id: usize) -> Self {
        Self(id)
    }

    /// Get the raw numeric ID
    #[inline(always)]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Whether this is the controller.
    #[inline(always)]
    pub const fn is_main(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_main() {
            write!(f, "Thread(main)")
        } else {
            write!(f, "Thread({})", self.0)
        }
    }
}

/// Address of a shared memory location, as reported by instrumentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub u64);

impl Address {
    /// Address of a Rust value, for manually instrumented tests.
    pub fn of<T: ?Sized>(value: &T) -> Self {
        Self((value as *const T).cast::<u8>() as usize as u64)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Kind of a shared access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessKind {
    /// Load from memory
    Read,
    /// Store to memory
    Write,
}

/// One access to a shared location.
///
/// `time` is the logical time the race tracker stamped on the access. A
/// value of zero means "not stamped yet": the access was coalesced into an
/// earlier yield point or has not been consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedAccess {
    /// Read or write
    pub kind: AccessKind,
    /// Location touched
    pub addr: Address,
    /// Number of bytes touched
    pub size: u32,
    /// Logical time stamped by the race tracker
    pub time: u64,
}

impl SharedAccess {
    /// A read of `size` bytes at `addr`.
    pub const fn read(addr: Address, size: u32) -> Self {
        Self { kind: AccessKind::Read, addr, size, time: 0 }
    }

    /// A write of `size` bytes at `addr`.
    pub const fn write(addr: Address, size: u32) -> Self {
        Self { kind: AccessKind::Write, addr, size, time: 0 }
    }

    /// Whether this access writes.
    #[inline]
    pub const fn is_write(&self) -> bool {
        matches!(self.kind, AccessKind::Write)
    }

    /// Two accesses conflict when at least one of them writes.
    #[inline]
    pub const fn conflicts_with(&self, other: &Self) -> bool {
        self.is_write() || other.is_write()
    }
}

impl fmt::Display for SharedAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            AccessKind::Read => "READ",
            AccessKind::Write => "WRITE",
        };
        write!(f, "{kind} {}[{}] @t{}", self.addr, self.size, self.time)
    }
}

/// Where in the program a yield happened.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SourceLocation {
    /// Source file
    pub file: String,
    /// Enclosing function, when known
    pub function: Option<String>,
    /// 1-based line
    pub line: u32,
    /// 1-based column
    pub column: u32,
}

impl SourceLocation {
    /// Location of a `#[track_caller]` call site.
    pub fn from_caller(caller: &std::panic::Location<'_>) -> Self {
        Self {
            file: caller.file().to_string(),
            function: None,
            line: caller.line(),
            column: caller.column(),
        }
    }

    /// Attach the enclosing function name.
    #[must_use]
    pub fn with_function(mut self, function: impl Into<String>) -> Self {
        self.function = Some(function.into());
        self
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.function {
            Some(func) => write!(f, "{}:{}:{} ({func})", self.file, self.line, self.column),
            None => write!(f, "{}:{}:{}", self.file, self.line, self.column),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_id_main() {
        assert!(ThreadId::MAIN.is_main());
        assert!(!ThreadId::new(3).is_main());
        assert_eq!(ThreadId::new(3).as_usize(), 3);
        assert_eq!(ThreadId::MAIN.to_string(), "Thread(main)");
        assert_eq!(ThreadId::new(2).to_string(), "Thread(2)");
    }

    #[test]
    fn test_conflicts() {
        let addr = Address(0x10);
        let r = SharedAccess::read(addr, 4);
        let w = SharedAccess::write(addr, 4);

        assert!(!r.conflicts_with(&r));
        assert!(r.conflicts_with(&w));
        assert!(w.conflicts_with(&r));
        assert!(w.conflicts_with(&w));
    }

    #[test]
    fn test_address_of_distinct_values() {
        let a = 1u64;
        let b = 2u64;
        assert_ne!(Address::of(&a), Address::of(&b));
        assert_eq!(Address::of(&a), Address::of(&a));
    }

    #[test]
    fn test_address_of_unsized() {
        let s = [1u8, 2, 3];
        assert_eq!(Address::of(&s[..]), Address::of(&s));
        assert_eq!(Address::of("abc"), Address::of("abc".as_bytes()));
    }

    #[test]
    fn test_location_from_caller() {
        let loc = SourceLocation::from_caller(std::panic::Location::caller());
        assert!(loc.file.ends_with(".rs"));
        assert!(loc.line > 0);
        let named = loc.with_function("worker");
        assert!(named.to_string().contains("(worker)"));
    }
}
