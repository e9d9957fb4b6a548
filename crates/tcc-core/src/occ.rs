//! Optimistic Concurrency Control primitives
//!
//! TigerStyle: Explicit OCC types for the transaction record.
//!
//! Every persisted update of a transaction record is version-checked:
//! 1. Read phase: the caller loads the record and remembers its version
//! 2. Write phase: the update is applied iff the stored version is unchanged
//! 3. On success the stored version is incremented, otherwise zero rows are affected
//!
//! The normal call path and the recovery pass may race on the same stuck
//! transaction; exactly one of them wins each version.

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Version
// =============================================================================

/// Version number for optimistic concurrency control
///
/// Monotonically increasing on each successful write of a transaction record.
///
/// # TigerStyle
/// - Explicit type (not raw u64) for type safety
/// - `Version::INITIAL = 0` for a freshly created record
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Version(u64);

impl Version {
    /// Initial version for new records
    pub const INITIAL: Self = Version(0);

    /// Create a new version
    pub const fn new(v: u64) -> Self {
        Version(v)
    }

    /// Get the raw version number
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// Increment version for a write operation
    pub fn increment(&self) -> Self {
        Version(self.0.saturating_add(1))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(v: u64) -> Self {
        Version(v)
    }
}
