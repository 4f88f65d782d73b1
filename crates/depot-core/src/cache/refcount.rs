//! Reference-count bookkeeping shared by both caches.

use thiserror::Error;

/// Returned when a count is released more times than it was acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("reference count released below zero")]
pub struct RefCountUnderflow;

/// Number of live acquirers of a cache entry.
///
/// Never negative: releasing at zero is reported instead of applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct RefCount(u32);

impl RefCount {
    /// A count starting at `count`.
    #[must_use]
    pub const fn new(count: u32) -> Self {
        Self(count)
    }

    /// Current value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Adds one acquirer and returns the new count.
    pub fn acquire(&mut self) -> u32 {
        self.0 = self.0.saturating_add(1);
        self.0
    }

    /// Removes one acquirer and returns the remaining count.
    ///
    /// # Errors
    /// Returns `RefCountUnderflow` (leaving the count at zero) if there was
    /// nothing left to release.
    pub fn release(&mut self) -> Result<u32, RefCountUnderflow> {
        if self.0 == 0 {
            return Err(RefCountUnderflow);
        }
        self.0 -= 1;
        Ok(self.0)
    }

    /// Drops an acquirer that went away without claiming its reference.
    pub fn forfeit(&mut self) {
        self.0 = self.0.saturating_sub(1);
    }
}
