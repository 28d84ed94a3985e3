//! Interned path identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A dense integer standing in for an interned path or action key.
///
/// Ids are assigned in first-use order starting at 0 and are never reassigned
/// to a different string for the lifetime of the on-disk store, so they can be
/// persisted in place of the strings they name.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct PathId(u32);

impl PathId {
    /// Creates a `PathId` from a raw `u32` index.
    ///
    /// Intended for decoding persisted ids. Whether the id actually names a
    /// string is up to the interner that resolves it.
    pub const fn from_raw(index: u32) -> Self {
        Self(index)
    }

    /// Returns the raw `u32` index of this id.
    pub const fn as_raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// SAFETY: `PathId` wraps a `u32`, which always fits in `usize` on the 32-bit
// and 64-bit targets we support. `try_from_usize` rejects values above `u32::MAX`.
unsafe impl lasso::Key for PathId {
    fn into_usize(self) -> usize {
        self.0 as usize
    }

    fn try_from_usize(int: usize) -> Option<Self> {
        u32::try_from(int).ok().map(PathId)
    }
}
