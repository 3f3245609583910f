//! Synthetic dependency identifiers.
//!
//! Every fragment vertex in a plan graph produces exactly one output
//! dependency, named by a [`DependencyId`] drawn from a
//! [`DependencyIdAllocator`]. A fragment that consumes another fragment's
//! output refers to it by the same id. Ids are opaque: the only property that
//! matters is that no two vertices ever share one, across all planners and
//! all invocations that use the same allocator.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FormatResult};
use std::sync::atomic::{AtomicU32, Ordering};

/// Unique identifier of the data produced by one fragment occurrence.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DependencyId(u32);

impl DependencyId {
    /// Wrap a raw id. Mostly useful in tests and when decoding tasks.
    #[must_use]
    pub const fn new(v: u32) -> Self {
        Self(v)
    }

    /// Return the underlying numeric value.
    #[must_use]
    pub const fn raw(&self) -> u32 {
        self.0
    }
}

impl Display for DependencyId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        write!(f, "{}", self.0)
    }
}

/// Lock-free, monotonically increasing source of [`DependencyId`]s.
///
/// One allocator is meant to live for the lifetime of the process and be
/// shared by reference between planners.
#[derive(Debug)]
pub struct DependencyIdAllocator {
    next: AtomicU32,
}

impl DependencyIdAllocator {
    /// Allocator whose first issued id is `first`.
    #[must_use]
    pub const fn new(first: u32) -> Self {
        Self {
            next: AtomicU32::new(first),
        }
    }

    /// Issue the next id.
    ///
    /// # Panics
    ///
    /// Panics if the id space is exhausted; ids are never reused.
    pub fn next_id(&self) -> DependencyId {
        let id = self
            .next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_add(1))
            .unwrap_or_else(|_| panic!("dependency id space exhausted"));
        DependencyId(id)
    }

    /// The id the next call to [`next_id`](Self::next_id) would return.
    #[must_use]
    pub fn peek(&self) -> DependencyId {
        DependencyId(self.next.load(Ordering::Relaxed))
    }
}

impl Default for DependencyIdAllocator {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_FIRST_DEPENDENCY_ID)
    }
}
