use std::{
    fmt,
    num::NonZeroU64,
    panic::Location,
    sync::atomic::{AtomicU64, Ordering::Relaxed},
};

/// Names one lock instance for as long as the process runs.
///
/// Ids come from a global counter and are never handed out twice. An address would be reused
/// by the next lock allocated at the same spot, and that lock would inherit a stale registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LockId(NonZeroU64);

impl LockId {
    pub fn new() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NonZeroU64::MIN.saturating_add(NEXT.fetch_add(1, Relaxed)))
    }

    pub fn as_u64(self) -> u64 {
        self.0.get()
    }
}

impl Default for LockId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lock#{}", self.0)
    }
}

/// Where in the source a lock or unlock happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourcePosition {
    pub file: &'static str,
    pub line: u32,
}

impl SourcePosition {
    pub const fn new(file: &'static str, line: u32) -> Self {
        Self { file, line }
    }

    /// Position of whoever called the outermost `#[track_caller]` function
    #[track_caller]
    pub fn caller() -> Self {
        Location::caller().into()
    }
}

impl From<&'static Location<'static>> for SourcePosition {
    fn from(location: &'static Location<'static>) -> Self {
        Self::new(location.file(), location.line())
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ids_are_unique_and_ordered() {
        let a = LockId::new();
        let b = LockId::new();
        assert_ne!(a, b);
        assert!(a < b);
        assert_eq!(format!("{a}"), format!("lock#{}", a.as_u64()));
    }

    #[test]
    fn caller_position_points_here() {
        let line = line!() + 1;
        let at = SourcePosition::caller();
        assert_eq!(at.line, line);
        assert!(at.file.ends_with("id.rs"));
        assert_eq!(at.to_string(), format!("{}:{}", at.file, line));
    }
}
