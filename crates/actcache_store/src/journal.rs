//! Durable write-ahead log under an in-memory structure.
//!
//! A [`PersistentLog`] remembers mutations that have not reached disk yet and,
//! whenever its [`JournalPolicy`] allows, appends them to the journal file. A
//! `save` folds everything into a fresh snapshot unless the policy prefers to
//! keep appending. The owner holds the authoritative in-memory state and
//! supplies it when a snapshot is written.

use std::fs::{self, File, OpenOptions};
use std::hash::Hash;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::CacheError;
use crate::format::{self, Record, SnapshotWriter, StoreFormat};
use crate::policy::JournalPolicy;

/// Snapshot and journal paths of one persistent structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFiles {
    /// Full snapshot file.
    pub snapshot: PathBuf,
    /// Append-only journal file.
    pub journal: PathBuf,
}

impl LogFiles {
    /// Creates a pair of file paths.
    pub fn new(snapshot: impl Into<PathBuf>, journal: impl Into<PathBuf>) -> Self {
        Self {
            snapshot: snapshot.into(),
            journal: journal.into(),
        }
    }
}

struct JournalWriter {
    file: File,
}

impl JournalWriter {
    fn open(path: &Path, format: StoreFormat) -> Result<Self, CacheError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| CacheError::io(path, e))?;
        let len = file.metadata().map_err(|e| CacheError::io(path, e))?.len();
        if len == 0 {
            let header = format::journal_header(format)?;
            file.write_all(&header).map_err(|e| CacheError::io(path, e))?;
        }
        Ok(Self { file })
    }

    fn append(&mut self, path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
        self.file.write_all(bytes).map_err(|e| CacheError::io(path, e))
    }

    fn sync(&self, path: &Path) -> Result<(), CacheError> {
        self.file.sync_data().map_err(|e| CacheError::io(path, e))
    }
}

pub(crate) struct PersistentLog<K, V, P> {
    files: LogFiles,
    format: StoreFormat,
    policy: P,
    pending: DashMap<K, Option<V>>,
    journal: Mutex<Option<JournalWriter>>,
    dirty: AtomicBool,
    needs_snapshot: AtomicBool,
}

impl<K, V, P> PersistentLog<K, V, P>
where
    K: Eq + Hash + Clone + Serialize + DeserializeOwned,
    V: Clone + Serialize + DeserializeOwned,
    P: JournalPolicy,
{
    /// Opens the log and returns the mutations to replay, snapshot first.
    pub(crate) fn open(
        files: LogFiles,
        format: StoreFormat,
        policy: P,
    ) -> Result<(Self, Vec<Record<K, V>>), CacheError> {
        let snapshot: Vec<(K, V)> = format::read_snapshot(&files.snapshot, format)?;
        let journal: Vec<Record<K, V>> = format::read_journal(&files.journal, format)?;
        debug!(
            snapshot = %files.snapshot.display(),
            snapshot_records = snapshot.len(),
            journal_records = journal.len(),
            "loaded persistent log"
        );

        let mut replay = Vec::with_capacity(snapshot.len() + journal.len());
        replay.extend(snapshot.into_iter().map(|(k, v)| Record::Put(k, v)));
        replay.extend(journal);

        let log = Self {
            files,
            format,
            policy,
            pending: DashMap::new(),
            journal: Mutex::new(None),
            dirty: AtomicBool::new(false),
            needs_snapshot: AtomicBool::new(false),
        };
        Ok((log, replay))
    }

    /// Notes a mutation (`None` for a removal) and journals it if the policy fires.
    pub(crate) fn record(&self, key: K, value: Option<V>) {
        self.pending.insert(key, value);
        self.dirty.store(true, Ordering::Release);

        let start = Instant::now();
        if !self.policy.update_journal() {
            return;
        }
        if let Err(err) = self.write_journal() {
            warn!(
                path = %self.files.journal.display(),
                error = %err,
                "failed to append to journal; the next save writes a full snapshot"
            );
            self.needs_snapshot.store(true, Ordering::Release);
        }
        if let Some(threshold) = self.policy.slow_write_threshold() {
            let elapsed = start.elapsed();
            if elapsed >= threshold {
                info!(
                    path = %self.files.journal.display(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "slow write to journal"
                );
            }
        }
    }

    /// Appends every pending mutation to the journal. Returns the bytes appended.
    fn write_journal(&self) -> Result<u64, CacheError> {
        let mut guard = self.journal.lock();
        if self.pending.is_empty() {
            return Ok(0);
        }

        let mut writer = match guard.take() {
            Some(writer) => writer,
            None => JournalWriter::open(&self.files.journal, self.format)?,
        };

        let keys: Vec<K> = self.pending.iter().map(|e| e.key().clone()).collect();
        let mut buf = Vec::new();
        for key in keys {
            let Some((key, value)) = self.pending.remove(&key) else {
                continue;
            };
            match value {
                Some(value) => format::encode_record(&Record::Put(key, value), &mut buf)?,
                None => format::encode_record(&Record::<K, V>::Remove(key), &mut buf)?,
            }
        }
        writer.append(&self.files.journal, &buf)?;
        *guard = Some(writer);
        Ok(buf.len() as u64)
    }

    /// Journals pending mutations now and syncs the journal to disk.
    pub(crate) fn flush(&self) -> Result<(), CacheError> {
        self.write_journal()?;
        if let Some(writer) = self.journal.lock().as_ref() {
            writer.sync(&self.files.journal)?;
        }
        Ok(())
    }

    /// Persists everything and returns the number of bytes written.
    ///
    /// `write_entries` fills the snapshot from the owner's in-memory state
    /// when the policy decides to compact. Must not run concurrently with
    /// another `save` or `clear`.
    pub(crate) fn save<F>(&self, write_entries: F) -> Result<u64, CacheError>
    where
        F: FnOnce(&mut SnapshotWriter) -> Result<(), CacheError>,
    {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(0);
        }
        let result = self.save_dirty(write_entries);
        if result.is_err() {
            self.dirty.store(true, Ordering::Release);
        }
        result
    }

    fn save_dirty<F>(&self, write_entries: F) -> Result<u64, CacheError>
    where
        F: FnOnce(&mut SnapshotWriter) -> Result<(), CacheError>,
    {
        let appended = match self.write_journal() {
            Ok(appended) => appended,
            Err(err) => {
                warn!(
                    path = %self.files.journal.display(),
                    error = %err,
                    "failed to append to journal; writing a full snapshot"
                );
                self.needs_snapshot.store(true, Ordering::Release);
                0
            }
        };

        if !self.needs_snapshot.load(Ordering::Acquire) {
            let journal = self.journal_size()?;
            let snapshot = self.snapshot_size()?;
            if self.policy.keep_journal(journal, snapshot) {
                if let Some(writer) = self.journal.lock().as_ref() {
                    writer.sync(&self.files.journal)?;
                }
                return Ok(appended);
            }
        }

        let mut guard = self.journal.lock();
        let mut writer = SnapshotWriter::new(self.format);
        write_entries(&mut writer)?;
        let records = writer.count();
        let written = writer.commit(&self.files.snapshot)?;
        *guard = None;
        remove_if_exists(&self.files.journal)?;
        self.needs_snapshot.store(false, Ordering::Release);
        debug!(
            snapshot = %self.files.snapshot.display(),
            records,
            bytes = written,
            "wrote snapshot"
        );
        Ok(appended + written)
    }

    /// Forgets pending mutations; the next save writes an empty-based snapshot.
    pub(crate) fn clear(&self) {
        self.pending.clear();
        self.dirty.store(true, Ordering::Release);
        self.needs_snapshot.store(true, Ordering::Release);
    }

    pub(crate) fn journal_size(&self) -> Result<u64, CacheError> {
        file_size(&self.files.journal)
    }

    pub(crate) fn snapshot_size(&self) -> Result<u64, CacheError> {
        file_size(&self.files.snapshot)
    }
}

fn file_size(path: &Path) -> Result<u64, CacheError> {
    match fs::metadata(path) {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(CacheError::io(path, e)),
    }
}

fn remove_if_exists(path: &Path) -> Result<(), CacheError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CacheError::io(path, e)),
    }
}
