//! The action cache: interner, journaled map and recovery tied together.
//!
//! Entries are stored in a [`JournaledMap`] keyed by the interned id of their
//! action key. Next to them sits a validation record holding the interner
//! size at the latest `put`; on load, a record larger than the interner means
//! the map references ids the interner never persisted, and the whole cache
//! is discarded.

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use actcache_common::{Clock, PathId};
use actcache_diagnostics::{Category, Diagnostic, DiagnosticCode, DiagnosticSink};
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::codec::EntryCodec;
use crate::entry::{ActionEntry, CachedEntry};
use crate::error::CacheError;
use crate::format::StoreFormat;
use crate::interner::PersistentInterner;
use crate::journal::LogFiles;
use crate::map::JournaledMap;
use crate::policy::{IntervalGate, IntervalPolicy, JournalPolicy};
use crate::stats::{ActionCacheStatistics, CacheCounters, MissReason};

const ACTION_FORMAT: StoreFormat = StoreFormat {
    magic: *b"ACMP",
    version: 1,
};

/// Reported when a corrupted cache had to be moved aside.
pub const CACHE_INITIALIZATION_WARNING: DiagnosticCode = DiagnosticCode::new(Category::Warning, 301);

const MAX_LOAD_ATTEMPTS: usize = 2;

/// Above this many records, `Display` shows only a sample.
const DISPLAY_FULL_LIMIT: usize = 1000;
const DISPLAY_SAMPLE: usize = 10;

/// Key space of the action map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub(crate) enum MapKey {
    /// Interner size at the most recent `put`.
    Validation,
    /// An entry, keyed by the interned action key.
    Entry(PathId),
}

/// Where the cache lives on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLayout {
    /// The live cache directory.
    pub root: PathBuf,
    /// Where a corrupted cache directory is moved. Only the latest is kept.
    pub corrupted_root: PathBuf,
}

impl CacheLayout {
    /// Creates a layout from the live and quarantine directories.
    pub fn new(root: impl Into<PathBuf>, corrupted_root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            corrupted_root: corrupted_root.into(),
        }
    }

    /// Snapshot of the action map.
    pub fn cache_file(&self) -> PathBuf {
        self.root.join("action_cache.bin")
    }

    /// Journal of the action map.
    pub fn journal_file(&self) -> PathBuf {
        self.root.join("action_journal.bin")
    }

    /// Snapshot of the path interner.
    pub fn index_file(&self) -> PathBuf {
        self.root.join("filename_index.bin")
    }

    /// Journal of the path interner.
    pub fn index_journal_file(&self) -> PathBuf {
        self.root.join("filename_index_journal.bin")
    }

    fn action_files(&self) -> LogFiles {
        LogFiles::new(self.cache_file(), self.journal_file())
    }

    fn index_files(&self) -> LogFiles {
        LogFiles::new(self.index_file(), self.index_journal_file())
    }
}

/// Tuning knobs for durability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
    /// Minimum time between two journal writes triggered by mutations.
    pub journal_interval: Duration,
    /// `save` keeps appending to the journal while it is smaller than this
    /// percentage of the snapshot.
    pub compaction_percent: u64,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            journal_interval: Duration::from_secs(3),
            compaction_percent: 1,
        }
    }
}

/// Journal policy of the action map.
///
/// Whenever the gate fires, the interner is flushed first so that no journal
/// record on disk references an id the interner has not persisted.
struct ActionMapPolicy {
    gate: IntervalGate,
    interner: Arc<PersistentInterner>,
    compaction_percent: u64,
}

impl JournalPolicy for ActionMapPolicy {
    fn update_journal(&self) -> bool {
        if !self.gate.try_fire() {
            return false;
        }
        match self.interner.flush() {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "failed to flush action cache index; skipping journal write");
                false
            }
        }
    }

    fn keep_journal(&self, journal_bytes: u64, snapshot_bytes: u64) -> bool {
        journal_bytes.saturating_mul(100) < snapshot_bytes.saturating_mul(self.compaction_percent)
    }

    fn slow_write_threshold(&self) -> Option<Duration> {
        let interval = self.gate.interval();
        (!interval.is_zero()).then(|| interval / 20)
    }
}

/// Persistent cache of action results.
///
/// `get`, `put`, `remove` and `remove_if` may be called from many threads at
/// once. `save` and `clear` must be serialized by the caller and must not
/// overlap with each other.
pub struct ActionCache {
    layout: CacheLayout,
    interner: Arc<PersistentInterner>,
    map: JournaledMap<MapKey, Vec<u8>, ActionMapPolicy>,
    counters: CacheCounters,
    clock: Arc<dyn Clock>,
    load_time: Mutex<Option<Duration>>,
    save_time: Mutex<Option<Duration>>,
}

impl ActionCache {
    /// Loads the cache in `layout.root`, creating it if needed.
    ///
    /// A cache written by an incompatible format version is deleted. Any
    /// other load failure moves the directory to `layout.corrupted_root`,
    /// logs a warning and reports a diagnostic to `sink`. Either way loading
    /// is retried once from an empty directory; a second failure is returned
    /// as [`CacheError::RetryLoop`].
    pub fn open(
        layout: CacheLayout,
        options: CacheOptions,
        clock: Arc<dyn Clock>,
        sink: &DiagnosticSink,
    ) -> Result<Self, CacheError> {
        let before = clock.now();
        let mut attempt = 1;
        let cache = loop {
            fs::create_dir_all(&layout.root).map_err(|e| CacheError::io(&layout.root, e))?;
            match Self::load(&layout, options, &clock) {
                Ok(cache) => break cache,
                Err(err) if attempt >= MAX_LOAD_ATTEMPTS => {
                    return Err(CacheError::RetryLoop {
                        source: Box::new(err),
                    })
                }
                Err(err) => {
                    recover(&layout, &err, sink)?;
                    attempt += 1;
                }
            }
        };

        let load_time = clock.now().duration_since(before).unwrap_or_default();
        *cache.load_time.lock() = Some(load_time);
        debug!(
            root = %layout.root.display(),
            records = cache.size(),
            paths = cache.interner.size(),
            load_ms = load_time.as_millis() as u64,
            "loaded action cache"
        );
        Ok(cache)
    }

    fn load(
        layout: &CacheLayout,
        options: CacheOptions,
        clock: &Arc<dyn Clock>,
    ) -> Result<Self, CacheError> {
        let interner = PersistentInterner::open(
            layout.index_files(),
            IntervalPolicy::new(Arc::clone(clock), options.journal_interval),
        )
        .map_err(|e| e.context("failed to load action cache index data"))?;
        let interner = Arc::new(interner);

        let policy = ActionMapPolicy {
            gate: IntervalGate::new(Arc::clone(clock), options.journal_interval),
            interner: Arc::clone(&interner),
            compaction_percent: options.compaction_percent,
        };
        let map = JournaledMap::open(layout.action_files(), ACTION_FORMAT, policy)
            .map_err(|e| e.context("failed to load action cache data"))?;

        let cache = Self {
            layout: layout.clone(),
            interner,
            map,
            counters: CacheCounters::default(),
            clock: Arc::clone(clock),
            load_time: Mutex::new(None),
            save_time: Mutex::new(None),
        };
        if !cache.map.is_empty() {
            cache
                .validate_integrity()
                .map_err(|e| e.context("failed action cache referential integrity check"))?;
        }
        Ok(cache)
    }

    /// Checks that the map only references ids the interner knows.
    fn validate_integrity(&self) -> Result<(), CacheError> {
        let integrity = |reason: String| CacheError::Integrity { reason };

        let index_size = self.interner.size();
        if index_size == 0 {
            return Err(integrity("empty index".into()));
        }
        let record = self
            .map
            .get(&MapKey::Validation)
            .ok_or_else(|| integrity("missing validation record".into()))?;
        let bytes: [u8; 4] = record
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| integrity("validation record is incomplete".into()))?;
        let recorded = u32::from_be_bytes(bytes) as usize;
        if recorded > index_size {
            return Err(integrity(format!(
                "validation record {recorded} is too large compared to index size {index_size}"
            )));
        }
        Ok(())
    }

    fn codec(&self) -> EntryCodec<'_> {
        EntryCodec::new(&self.interner)
    }

    /// Returns the entry for `key`, or `None` when there is none.
    ///
    /// An entry that fails to decode comes back as [`CachedEntry::Corrupted`].
    pub fn get(&self, key: &str) -> Option<CachedEntry> {
        let id = self.interner.get_index(key)?;
        let bytes = self.map.get(&MapKey::Entry(id))?;
        Some(self.codec().decode(&bytes))
    }

    /// Stores `entry` under `key`. Entries that cannot be encoded are dropped.
    pub fn put(&self, key: &str, entry: &ActionEntry) {
        let id = match self.interner.get_or_create_index(key) {
            Ok(id) => id,
            Err(err) => {
                debug!(key, error = %err, "dropping action cache write");
                return;
            }
        };
        let bytes = match self.codec().encode(entry) {
            Ok(bytes) => bytes,
            Err(err) => {
                debug!(key, error = %err, "dropping action cache write");
                return;
            }
        };

        // Concurrent puts may store a stale size here. Smaller is still valid.
        let index_size = u32::try_from(self.interner.size()).unwrap_or(u32::MAX);
        self.map.put(MapKey::Validation, index_size.to_be_bytes().to_vec());
        self.map.put(MapKey::Entry(id), bytes);
    }

    /// Removes the entry for `key`. Its interned id is kept.
    pub fn remove(&self, key: &str) {
        if let Some(id) = self.interner.get_index(key) {
            self.map.remove(&MapKey::Entry(id));
        }
    }

    /// Removes every entry for which `predicate` holds and returns how many
    /// were removed. Entries are decoded in parallel.
    pub fn remove_if<F>(&self, predicate: F) -> usize
    where
        F: Fn(&CachedEntry) -> bool + Sync,
    {
        let codec = self.codec();
        let doomed: Vec<MapKey> = self
            .map
            .entries()
            .into_par_iter()
            .filter(|(key, bytes)| match key {
                MapKey::Validation => false,
                MapKey::Entry(_) => predicate(&codec.decode(bytes)),
            })
            .map(|(key, _)| key)
            .collect();
        doomed
            .iter()
            .filter(|key| self.map.remove(key).is_some())
            .count()
    }

    /// Persists the interner and the map. Returns the number of bytes written.
    ///
    /// The time taken is kept for [`take_save_time`](Self::take_save_time).
    pub fn save(&self) -> Result<u64, CacheError> {
        let before = self.clock.now();
        if !self.map.is_empty() {
            if let Err(err) = self.validate_integrity() {
                info!(error = %err, "action cache integrity check failed before save");
            }
        }
        let index_bytes = self.interner.save()?;
        let map_bytes = self.map.save()?;
        let save_time = self.clock.now().duration_since(before).unwrap_or_default();
        *self.save_time.lock() = Some(save_time);
        Ok(index_bytes + map_bytes)
    }

    /// Drops every entry and every interned path.
    pub fn clear(&self) {
        self.map.clear();
        self.interner.clear();
    }

    /// Number of records in the map, the validation record included.
    pub fn size(&self) -> usize {
        self.map.len()
    }

    /// Number of action entries.
    pub fn entry_count(&self) -> usize {
        let validation = usize::from(self.map.get(&MapKey::Validation).is_some());
        self.map.len() - validation
    }

    /// Total size of the cache files currently on disk.
    pub fn size_on_disk(&self) -> Result<u64, CacheError> {
        let map = self.map.snapshot_size()? + self.map.journal_size()?;
        let index = [self.layout.index_file(), self.layout.index_journal_file()]
            .iter()
            .map(|path| file_size(path))
            .sum::<Result<u64, CacheError>>()?;
        Ok(map + index)
    }

    /// The on-disk layout of this cache.
    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    /// The path interner backing this cache.
    pub fn interner(&self) -> &PersistentInterner {
        &self.interner
    }

    /// Counts a cache hit.
    pub fn account_hit(&self) {
        self.counters.account_hit();
    }

    /// Counts a cache miss.
    pub fn account_miss(&self, reason: MissReason) {
        self.counters.account_miss(reason);
    }

    /// Copies hit and miss counts into `stats`.
    pub fn merge_into_statistics(&self, stats: &mut ActionCacheStatistics) {
        self.counters.merge_into(stats);
    }

    /// Zeroes hit and miss counts without touching the entries.
    pub fn reset_statistics(&self) {
        self.counters.reset();
    }

    /// Returns the time it took to load the cache, once.
    pub fn take_load_time(&self) -> Option<Duration> {
        self.load_time.lock().take()
    }

    /// Returns the duration of the most recent successful save, once.
    pub fn take_save_time(&self) -> Option<Duration> {
        self.save_time.lock().take()
    }

    /// Writes the interner and every decoded entry to `out`.
    pub fn dump(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "String indexer content:")?;
        writeln!(out)?;
        write!(out, "{}", self.interner)?;
        writeln!(out)?;

        let mut entries = self.map.entries();
        entries.sort_unstable_by_key(|(key, _)| *key);
        writeln!(out, "Action cache ({} records):", entries.len())?;
        writeln!(out)?;
        let codec = self.codec();
        for (key, bytes) in entries {
            match key {
                MapKey::Validation => {
                    let value = bytes
                        .get(..4)
                        .and_then(|b| <[u8; 4]>::try_from(b).ok())
                        .map(u32::from_be_bytes);
                    match value {
                        Some(value) => writeln!(out, "{}, validation record = {value}", bytes.len())?,
                        None => writeln!(out, "{}, validation record (incomplete)", bytes.len())?,
                    }
                }
                MapKey::Entry(id) => {
                    let name = self
                        .interner
                        .get_string_for_index(id)
                        .unwrap_or_else(|| format!("<unknown id {id}>"));
                    writeln!(out, "{}, {name}:", bytes.len())?;
                    write!(out, "{}", codec.decode(&bytes))?;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for ActionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<PathId> = self
            .map
            .keys()
            .into_iter()
            .filter_map(|key| match key {
                MapKey::Validation => None,
                MapKey::Entry(id) => Some(id),
            })
            .collect();
        ids.sort_unstable();
        writeln!(f, "Action cache ({} entries):", ids.len())?;
        let shown = if ids.len() > DISPLAY_FULL_LIMIT {
            DISPLAY_SAMPLE
        } else {
            ids.len()
        };
        for id in ids.iter().take(shown) {
            let name = self
                .interner
                .get_string_for_index(*id)
                .unwrap_or_else(|| format!("<unknown id {id}>"));
            writeln!(f, "  {name}")?;
        }
        if shown < ids.len() {
            writeln!(f, "  ...")?;
        }
        Ok(())
    }
}

/// Clears the way for a fresh load after `err`.
fn recover(layout: &CacheLayout, err: &CacheError, sink: &DiagnosticSink) -> Result<(), CacheError> {
    if err.is_incompatible_format() {
        debug!(
            root = %layout.root.display(),
            error = %err,
            "action cache format changed, deleting it"
        );
        return remove_dir_if_exists(&layout.root);
    }

    remove_dir_if_exists(&layout.corrupted_root)?;
    if let Some(parent) = layout.corrupted_root.parent() {
        fs::create_dir_all(parent).map_err(|e| CacheError::io(parent, e))?;
    }
    fs::rename(&layout.root, &layout.corrupted_root)
        .map_err(|e| CacheError::io(&layout.root, e))?;

    warn!(
        quarantine = %layout.corrupted_root.display(),
        error = %err,
        "failed to load action cache, preexisting files kept in quarantine"
    );
    sink.emit(
        Diagnostic::warning(
            CACHE_INITIALIZATION_WARNING,
            format!("error during action cache initialization: {err}"),
        )
        .with_note("data may be incomplete, potentially causing rebuilds"),
    );
    Ok(())
}

fn remove_dir_if_exists(path: &Path) -> Result<(), CacheError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CacheError::io(path, e)),
    }
}

fn file_size(path: &Path) -> Result<u64, CacheError> {
    match fs::metadata(path) {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(CacheError::io(path, e)),
    }
}
