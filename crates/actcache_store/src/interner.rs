//! Persistent bidirectional mapping between path strings and dense ids.
//!
//! Strings live in a [`lasso::ThreadedRodeo`], which hands out ids in
//! first-use order starting at 0. Every allocation is recorded in a
//! [`PersistentLog`] so that an id, once written next to an entry, names the
//! same string after a restart.

use std::collections::BTreeMap;
use std::fmt;

use actcache_common::PathId;
use lasso::ThreadedRodeo;
use parking_lot::{Mutex, RwLock};

use crate::error::CacheError;
use crate::format::{Record, StoreFormat};
use crate::journal::{LogFiles, PersistentLog};
use crate::policy::IntervalPolicy;

const INDEX_FORMAT: StoreFormat = StoreFormat {
    magic: *b"ACIX",
    version: 1,
};

/// Interns path strings to [`PathId`]s and persists the mapping.
pub struct PersistentInterner {
    rodeo: RwLock<ThreadedRodeo<PathId>>,
    /// Serializes allocation of new ids so each one is journaled in order.
    alloc: Mutex<()>,
    log: PersistentLog<PathId, String, IntervalPolicy>,
}

impl PersistentInterner {
    /// Loads the interner from `files`, or starts empty when they are absent.
    ///
    /// Fails with [`CacheError::Corrupted`] when the persisted ids are not a
    /// dense `0..n` range of distinct strings.
    pub fn open(files: LogFiles, policy: IntervalPolicy) -> Result<Self, CacheError> {
        let path = files.snapshot.clone();
        let (log, replay) = PersistentLog::open(files, INDEX_FORMAT, policy)?;
        let corrupted = |reason: String| CacheError::Corrupted {
            path: path.clone(),
            reason,
        };

        let mut by_id: BTreeMap<PathId, String> = BTreeMap::new();
        for record in replay {
            match record {
                Record::Put(id, string) => {
                    if let Some(previous) = by_id.get(&id) {
                        if *previous != string {
                            return Err(corrupted(format!(
                                "id {id} maps to both {previous:?} and {string:?}"
                            )));
                        }
                        continue;
                    }
                    by_id.insert(id, string);
                }
                Record::Remove(id) => {
                    return Err(corrupted(format!("index removal of id {id}")));
                }
            }
        }

        let rodeo = ThreadedRodeo::new();
        for (expected, (id, string)) in by_id.iter().enumerate() {
            if id.as_raw() as usize != expected {
                return Err(corrupted(format!("index has a gap before id {id}")));
            }
            let interned = rodeo
                .try_get_or_intern(string.as_str())
                .map_err(|e| corrupted(format!("cannot intern {string:?}: {e}")))?;
            if interned != *id {
                return Err(corrupted(format!(
                    "{string:?} appears as both id {interned} and id {id}"
                )));
            }
        }

        Ok(Self {
            rodeo: RwLock::new(rodeo),
            alloc: Mutex::new(()),
            log,
        })
    }

    /// Returns the id of `s` if it has been interned.
    pub fn get_index(&self, s: &str) -> Option<PathId> {
        self.rodeo.read().get(s)
    }

    /// Returns the id of `s`, allocating the next id if it is new.
    pub fn get_or_create_index(&self, s: &str) -> Result<PathId, CacheError> {
        let rodeo = self.rodeo.read();
        if let Some(id) = rodeo.get(s) {
            return Ok(id);
        }

        let _alloc = self.alloc.lock();
        if let Some(id) = rodeo.get(s) {
            return Ok(id);
        }
        let id = rodeo
            .try_get_or_intern(s)
            .map_err(|e| CacheError::encode(format!("cannot intern {s:?}: {e}")))?;
        self.log.record(id, Some(s.to_owned()));
        Ok(id)
    }

    /// Returns the string named by `id`, if any.
    pub fn get_string_for_index(&self, id: PathId) -> Option<String> {
        self.rodeo.read().try_resolve(&id).map(str::to_owned)
    }

    /// Number of interned strings.
    pub fn size(&self) -> usize {
        self.rodeo.read().len()
    }

    /// Writes newly allocated ids to the journal without waiting for the
    /// next scheduled journal write.
    pub fn flush(&self) -> Result<(), CacheError> {
        self.log.flush()
    }

    /// Persists the mapping and returns the number of bytes written.
    pub fn save(&self) -> Result<u64, CacheError> {
        let rodeo = self.rodeo.read();
        self.log.save(|writer| {
            for (id, string) in rodeo.iter() {
                writer.put(&id, string)?;
            }
            Ok(())
        })
    }

    /// Forgets every string. Must not race with other operations.
    pub fn clear(&self) {
        let mut rodeo = self.rodeo.write();
        *rodeo = ThreadedRodeo::new();
        self.log.clear();
    }

    /// All `(id, string)` pairs in id order.
    pub fn mappings(&self) -> Vec<(PathId, String)> {
        let rodeo = self.rodeo.read();
        let mut pairs: Vec<(PathId, String)> =
            rodeo.iter().map(|(id, s)| (id, s.to_owned())).collect();
        pairs.sort_unstable_by_key(|(id, _)| *id);
        pairs
    }
}

impl fmt::Display for PersistentInterner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mappings = self.mappings();
        writeln!(f, "String indexer ({} entries):", mappings.len())?;
        for (id, string) in mappings {
            writeln!(f, "  {id} <==> {string}")?;
        }
        Ok(())
    }
}
