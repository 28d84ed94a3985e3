//! Opaque content digests recorded in cache entries.

use std::fmt;

/// A content digest computed by the build tool's filesystem layer.
///
/// The cache never computes digests itself; it only stores and compares the
/// bytes it is given. Digests are usually [`Digest::ESTIMATED_SIZE`] bytes long
/// but any length is accepted.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Digest(Box<[u8]>);

impl Digest {
    /// Typical digest length, used only to pre-size encoding buffers.
    pub const ESTIMATED_SIZE: usize = 32;

    /// Wraps the given digest bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(bytes.into())
    }

    /// Returns the digest bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the digest length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` for a zero-length digest.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Digest {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes.into_boxed_slice())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.iter() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({self})")
    }
}
