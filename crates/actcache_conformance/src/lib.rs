//! Conformance test helpers for the actcache action cache.
//!
//! Provides a temporary on-disk cache driven by a [`ManualClock`] plus a few
//! canned entries, so the integration suites in `tests/` can focus on
//! behavior instead of setup.

#![warn(missing_docs)]

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use actcache_common::{Digest, ManualClock};
use actcache_diagnostics::DiagnosticSink;
use actcache_store::{
    ActionCache, ActionEntry, CacheError, CacheLayout, CacheOptions, IntervalPolicy, LogFiles,
    PersistentInterner, RemoteFileMetadata, TreeMetadata,
};
use tempfile::TempDir;

/// A cache directory that lives as long as the fixture.
pub struct TestCache {
    /// Owns the directory holding the live cache and its quarantine.
    pub dir: TempDir,
    /// Clock shared by every cache opened through this fixture.
    pub clock: Arc<ManualClock>,
    /// Collects initialization warnings across opens.
    pub sink: DiagnosticSink,
    /// Durability settings used by [`open`](Self::open).
    pub options: CacheOptions,
}

impl TestCache {
    /// Creates a fixture with default options.
    pub fn new() -> Self {
        Self::with_options(CacheOptions::default())
    }

    /// Creates a fixture with the given options.
    pub fn with_options(options: CacheOptions) -> Self {
        Self {
            dir: tempfile::tempdir().expect("failed to create temp dir"),
            clock: Arc::new(ManualClock::new()),
            sink: DiagnosticSink::new(),
            options,
        }
    }

    /// Creates a fixture whose journal is written on every mutation.
    pub fn eager() -> Self {
        Self::with_options(CacheOptions {
            journal_interval: Duration::ZERO,
            ..CacheOptions::default()
        })
    }

    /// The live and quarantine directories.
    pub fn layout(&self) -> CacheLayout {
        CacheLayout::new(
            self.dir.path().join("action_cache"),
            self.dir.path().join("action_cache.corrupted"),
        )
    }

    /// Opens the cache, returning any load error.
    pub fn try_open(&self) -> Result<ActionCache, CacheError> {
        ActionCache::open(self.layout(), self.options, self.clock.clone(), &self.sink)
    }

    /// Opens the cache, panicking on failure.
    pub fn open(&self) -> ActionCache {
        self.try_open().expect("failed to open action cache")
    }

    /// Advances the fixture clock.
    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }
}

impl Default for TestCache {
    fn default() -> Self {
        Self::new()
    }
}

/// A digest made of `len` copies of `byte`.
pub fn digest(byte: u8, len: usize) -> Digest {
    Digest::from(vec![byte; len])
}

/// A small entry with one output file under `out/<key>`.
pub fn simple_entry(key: &str) -> ActionEntry {
    ActionEntry::new(key, digest(1, 32), digest(2, 32)).add_output_file(
        format!("out/{}", key.trim_start_matches('/')),
        RemoteFileMetadata::new(digest(3, 32), 128, 0),
    )
}

/// An entry exercising every optional field.
pub fn full_entry(key: &str) -> ActionEntry {
    ActionEntry::new(key, digest(0xa1, 32), digest(0xb2, 32))
        .with_discovered_inputs(["include/a.h", "include/b.h", "include/a.h"])
        .add_output_file(
            "out/lib.so",
            RemoteFileMetadata::new(digest(4, 32), 4096, 2)
                .with_expiration(UNIX_EPOCH + Duration::from_millis(1_750_000_000_000))
                .with_resolved_path("real/lib.so"),
        )
        .add_output_file("out/empty.txt", RemoteFileMetadata::new(digest(5, 0), 0, 0))
        .add_output_tree(
            "out/gen",
            TreeMetadata::new()
                .with_child("a/x.txt", RemoteFileMetadata::new(digest(6, 32), 10, 1))
                .with_child("b/y.txt", RemoteFileMetadata::new(digest(7, 32), 20, 1))
                .with_archived(RemoteFileMetadata::new(digest(8, 32), 30, 0))
                .with_resolved_path("real/gen"),
        )
        .add_output_tree("out/empty_tree", TreeMetadata::new())
}

/// A standalone interner persisted under `dir`, for codec-level tests.
pub fn interner(dir: &Path) -> PersistentInterner {
    PersistentInterner::open(
        LogFiles::new(dir.join("index.bin"), dir.join("index_journal.bin")),
        IntervalPolicy::new(Arc::new(ManualClock::new()), Duration::from_secs(3)),
    )
    .expect("failed to open interner")
}

/// Returns `true` if `path` exists and is a non-empty file.
pub fn non_empty_file(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.is_file() && m.len() > 0).unwrap_or(false)
}
