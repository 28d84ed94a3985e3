//! Concurrent map backed by a snapshot and a journal.

use std::hash::Hash;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CacheError;
use crate::format::{Record, StoreFormat};
use crate::journal::{LogFiles, PersistentLog};
use crate::policy::JournalPolicy;

/// A `DashMap` whose mutations are made durable by a [`PersistentLog`].
///
/// Reads and writes touch only the in-memory map; durability happens
/// whenever the policy fires and on [`save`](Self::save).
pub(crate) struct JournaledMap<K, V, P> {
    entries: DashMap<K, V>,
    log: PersistentLog<K, V, P>,
}

impl<K, V, P> JournaledMap<K, V, P>
where
    K: Eq + Hash + Clone + Serialize + DeserializeOwned,
    V: Clone + Serialize + DeserializeOwned,
    P: JournalPolicy,
{
    /// Loads the map by replaying its snapshot and journal.
    pub(crate) fn open(files: LogFiles, format: StoreFormat, policy: P) -> Result<Self, CacheError> {
        let (log, replay) = PersistentLog::open(files, format, policy)?;
        let entries = DashMap::with_capacity(replay.len());
        for record in replay {
            match record {
                Record::Put(key, value) => {
                    entries.insert(key, value);
                }
                Record::Remove(key) => {
                    entries.remove(&key);
                }
            }
        }
        Ok(Self { entries, log })
    }

    pub(crate) fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key).map(|v| v.value().clone())
    }

    pub(crate) fn put(&self, key: K, value: V) {
        self.entries.insert(key.clone(), value.clone());
        self.log.record(key, Some(value));
    }

    pub(crate) fn remove(&self, key: &K) -> Option<V> {
        let (key, old) = self.entries.remove(key)?;
        self.log.record(key, None);
        Some(old)
    }

    /// A point-in-time copy of every entry.
    pub(crate) fn entries(&self) -> Vec<(K, V)> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub(crate) fn keys(&self) -> Vec<K> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn save(&self) -> Result<u64, CacheError> {
        self.log.save(|writer| {
            for entry in self.entries.iter() {
                writer.put(entry.key(), entry.value())?;
            }
            Ok(())
        })
    }

    pub(crate) fn clear(&self) {
        self.entries.clear();
        self.log.clear();
    }

    pub(crate) fn journal_size(&self) -> Result<u64, CacheError> {
        self.log.journal_size()
    }

    pub(crate) fn snapshot_size(&self) -> Result<u64, CacheError> {
        self.log.snapshot_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::IntervalPolicy;
    use actcache_common::ManualClock;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    const FORMAT: StoreFormat = StoreFormat {
        magic: *b"MAPT",
        version: 1,
    };

    fn open(dir: &Path, clock: Arc<ManualClock>) -> JournaledMap<u32, Vec<u8>, IntervalPolicy> {
        JournaledMap::open(
            LogFiles::new(dir.join("map.bin"), dir.join("map_journal.bin")),
            FORMAT,
            IntervalPolicy::new(clock, Duration::from_secs(3)),
        )
        .unwrap()
    }

    #[test]
    fn mutations_are_visible_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let map = open(dir.path(), Arc::new(ManualClock::new()));
        assert!(map.is_empty());
        map.put(1, vec![1]);
        map.put(2, vec![2]);
        assert_eq!(map.get(&1), Some(vec![1]));
        assert_eq!(map.remove(&1), Some(vec![1]));
        assert_eq!(map.remove(&1), None);
        assert_eq!(map.len(), 1);
        assert_eq!(map.keys(), vec![2]);
    }

    #[test]
    fn save_then_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let map = open(dir.path(), Arc::new(ManualClock::new()));
        map.put(1, vec![1, 1]);
        map.put(2, vec![2, 2]);
        map.remove(&1);
        assert!(map.save().unwrap() > 0);
        drop(map);

        let map = open(dir.path(), Arc::new(ManualClock::new()));
        assert_eq!(map.entries(), vec![(2, vec![2, 2])]);
    }

    #[test]
    fn unsaved_mutations_before_the_gate_are_lost() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new());
        let map = open(dir.path(), clock.clone());
        map.put(1, vec![1]);
        clock.advance(Duration::from_secs(4));
        map.put(2, vec![2]);
        clock.advance(Duration::from_secs(1));
        map.put(3, vec![3]);
        drop(map);

        let map = open(dir.path(), Arc::new(ManualClock::new()));
        let mut keys = map.keys();
        keys.sort_unstable();
        assert_eq!(keys, vec![1, 2]);
        assert!(map.snapshot_size().unwrap() == 0);
        assert!(map.journal_size().unwrap() > 0);
    }

    #[test]
    fn clear_persists_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let map = open(dir.path(), Arc::new(ManualClock::new()));
        map.put(1, vec![1]);
        map.save().unwrap();
        map.clear();
        assert!(map.is_empty());
        map.save().unwrap();
        drop(map);

        let map = open(dir.path(), Arc::new(ManualClock::new()));
        assert!(map.is_empty());
    }
}
