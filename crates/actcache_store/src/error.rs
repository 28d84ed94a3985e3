//! Error types for cache operations.

use std::path::PathBuf;

/// Errors that can occur during cache operations.
///
/// Most of these never reach the build: single-entry decode failures become
/// [`CachedEntry::Corrupted`](crate::CachedEntry::Corrupted), encode failures
/// drop the write, and load failures trigger recovery. Only a failure that
/// survives recovery, or an I/O error during save, is returned to the caller.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// An I/O error occurred while reading or writing cache files.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A persisted file was written by an incompatible format version.
    #[error("incompatible format in {path}: expected version {expected}, got {actual}")]
    IncompatibleFormat {
        /// The file with the unexpected version.
        path: PathBuf,
        /// The format version this build understands.
        expected: u32,
        /// The format version found on disk.
        actual: u32,
    },

    /// A persisted file is structurally invalid.
    #[error("corrupted cache file {path}: {reason}")]
    Corrupted {
        /// The corrupted file.
        path: PathBuf,
        /// Description of the problem.
        reason: String,
    },

    /// The action map and the string index disagree.
    #[error("{reason}")]
    Integrity {
        /// Description of the mismatch.
        reason: String,
    },

    /// An entry could not be encoded.
    #[error("failed to encode cache entry: {reason}")]
    Encode {
        /// Description of the encoding failure.
        reason: String,
    },

    /// An entry's bytes could not be decoded.
    #[error("failed to decode cache entry: {reason}")]
    Decode {
        /// Description of the decoding failure.
        reason: String,
    },

    /// Loading one of the cache structures failed.
    #[error("{context}: {source}")]
    Initialization {
        /// Which stage of loading failed.
        context: String,
        /// The underlying failure.
        source: Box<CacheError>,
    },

    /// Loading failed again after the cache had already been reset once.
    #[error("action cache initialization is stuck in a retry loop: {source}")]
    RetryLoop {
        /// The failure from the final attempt.
        source: Box<CacheError>,
    },
}

impl CacheError {
    /// Wraps this error with the loading stage that produced it.
    pub fn context(self, context: impl Into<String>) -> Self {
        CacheError::Initialization {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Returns `true` if the root cause is a format version mismatch.
    pub fn is_incompatible_format(&self) -> bool {
        match self {
            CacheError::IncompatibleFormat { .. } => true,
            CacheError::Initialization { source, .. } => source.is_incompatible_format(),
            _ => false,
        }
    }

    pub(crate) fn decode(reason: impl Into<String>) -> Self {
        CacheError::Decode {
            reason: reason.into(),
        }
    }

    pub(crate) fn encode(reason: impl Into<String>) -> Self {
        CacheError::Encode {
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<bincode::error::EncodeError> for CacheError {
    fn from(err: bincode::error::EncodeError) -> Self {
        CacheError::encode(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for CacheError {
    fn from(err: bincode::error::DecodeError) -> Self {
        CacheError::decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_display() {
        let err = CacheError::io(
            "/tmp/cache/action_cache.bin",
            std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
        );
        let msg = err.to_string();
        assert!(msg.contains("cache I/O error"));
        assert!(msg.contains("action_cache.bin"));
    }

    #[test]
    fn incompatible_format_display() {
        let err = CacheError::IncompatibleFormat {
            path: PathBuf::from("action_cache.bin"),
            expected: 2,
            actual: 1,
        };
        let msg = err.to_string();
        assert!(msg.contains("expected version 2"));
        assert!(msg.contains("got 1"));
    }

    #[test]
    fn context_wraps_and_preserves_format_mismatch() {
        let err = CacheError::IncompatibleFormat {
            path: PathBuf::from("filename_index.bin"),
            expected: 1,
            actual: 9,
        }
        .context("failed to load action cache index data");
        assert!(err.is_incompatible_format());
        assert!(err
            .to_string()
            .starts_with("failed to load action cache index data: incompatible format"));
    }

    #[test]
    fn corruption_is_not_a_format_mismatch() {
        let err = CacheError::Corrupted {
            path: PathBuf::from("action_journal.bin"),
            reason: "truncated record".to_string(),
        }
        .context("failed to load action cache data");
        assert!(!err.is_incompatible_format());
    }

    #[test]
    fn integrity_display_is_bare_reason() {
        let err = CacheError::Integrity {
            reason: "missing validation record".to_string(),
        };
        assert_eq!(err.to_string(), "missing validation record");
    }

    #[test]
    fn retry_loop_display() {
        let err = CacheError::RetryLoop {
            source: Box::new(CacheError::decode("bad")),
        };
        assert!(err.to_string().contains("stuck in a retry loop"));
    }
}
