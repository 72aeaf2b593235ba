use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity of a declared resolver.
///
/// Clones of a `Resolver` share the id; every enhancement produces a new one.
/// The singleton registry is keyed by it, so ids only come from
/// [`ResolverId::next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResolverId(u64);

impl ResolverId {
    /// Issue the next process-unique id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ResolverId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResolverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResolverId({})", self.0)
    }
}
