//! Packing of [`ActionEntry`] values into compact byte strings.
//!
//! Every path string in an entry is replaced by its interned [`PathId`]; the
//! action key is the only string stored inline. Field order is fixed:
//!
//! 1. action key (length-prefixed, one byte per character)
//! 2. file digest
//! 3. discovered input count (`-1` for "no discovery") and that many path ids
//! 4. action properties digest
//! 5. output file count and `(path id, metadata)` pairs
//! 6. output tree count, and for each tree: path id, child count, child
//!    `(path id, metadata)` pairs, optional archived metadata, optional
//!    resolved path id
//!
//! Remote file metadata is: digest, size, location index, expiration in
//! milliseconds since the epoch (`-1` for none), optional resolved path id.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use actcache_common::{Digest, PathId};
use tracing::debug;

use crate::entry::{ActionEntry, CachedEntry, RemoteFileMetadata, TreeMetadata};
use crate::error::CacheError;
use crate::interner::PersistentInterner;
use crate::wire::{WireReader, WireWriter, MAX_VARINT_SIZE, MAX_VARLONG_SIZE};

/// Count sentinel for an action that does not discover inputs.
const NO_DISCOVERED_INPUTS: i32 = -1;

/// Expiration sentinel for metadata that never expires.
const NO_EXPIRATION: i64 = -1;

/// Encodes and decodes entries against a string interner.
#[derive(Clone, Copy)]
pub struct EntryCodec<'a> {
    interner: &'a PersistentInterner,
}

impl<'a> EntryCodec<'a> {
    /// Creates a codec resolving paths through `interner`.
    pub fn new(interner: &'a PersistentInterner) -> Self {
        Self { interner }
    }

    /// Encodes an entry, interning every path it references.
    pub fn encode(&self, entry: &ActionEntry) -> Result<Vec<u8>, CacheError> {
        let mut w = WireWriter::with_capacity(estimate_size(entry));

        let key = latin1_bytes(&entry.action_key)?;
        w.put_bytes(&key, "action key")?;
        w.put_bytes(entry.file_digest.as_bytes(), "file digest")?;

        match &entry.discovered_inputs {
            None => w.put_i32(NO_DISCOVERED_INPUTS)?,
            Some(inputs) => {
                w.put_len(inputs.len(), "discovered input count")?;
                for input in inputs {
                    self.put_path(&mut w, input)?;
                }
            }
        }

        w.put_bytes(entry.action_properties_digest.as_bytes(), "properties digest")?;

        w.put_len(entry.output_files.len(), "output file count")?;
        for (path, metadata) in &entry.output_files {
            self.put_path(&mut w, path)?;
            self.put_metadata(&mut w, metadata)?;
        }

        w.put_len(entry.output_trees.len(), "output tree count")?;
        for (path, tree) in &entry.output_trees {
            self.put_path(&mut w, path)?;
            w.put_len(tree.children.len(), "tree child count")?;
            for (child, metadata) in &tree.children {
                self.put_path(&mut w, child)?;
                self.put_metadata(&mut w, metadata)?;
            }
            w.put_flag(tree.archived.is_some());
            if let Some(archived) = &tree.archived {
                self.put_metadata(&mut w, archived)?;
            }
            w.put_flag(tree.resolved_path.is_some());
            if let Some(resolved) = &tree.resolved_path {
                self.put_path(&mut w, resolved)?;
            }
        }

        Ok(w.into_inner())
    }

    /// Decodes an entry, yielding [`CachedEntry::Corrupted`] on any failure.
    pub fn decode(&self, bytes: &[u8]) -> CachedEntry {
        match self.try_decode(bytes) {
            Ok(entry) => CachedEntry::Entry(entry),
            Err(err) => {
                debug!(len = bytes.len(), error = %err, "corrupted action cache entry");
                CachedEntry::Corrupted
            }
        }
    }

    /// Decodes an entry, reporting why it failed.
    pub fn try_decode(&self, bytes: &[u8]) -> Result<ActionEntry, CacheError> {
        let mut r = WireReader::new(bytes);

        let action_key = r.get_bytes("action key")?.iter().map(|&b| char::from(b)).collect();
        let file_digest = Digest::from_bytes(r.get_bytes("file digest")?);

        let discovered_inputs = match r.get_i32()? {
            NO_DISCOVERED_INPUTS => None,
            count if count < 0 => {
                return Err(CacheError::decode(format!(
                    "negative discovered input count: {count}"
                )))
            }
            count => {
                let count = count as usize;
                let mut inputs = Vec::with_capacity(count.min(r.remaining()));
                for _ in 0..count {
                    inputs.push(self.get_path(&mut r)?);
                }
                Some(inputs)
            }
        };

        let action_properties_digest = Digest::from_bytes(r.get_bytes("properties digest")?);

        let mut output_files = BTreeMap::new();
        for _ in 0..r.get_len("output file count")? {
            let path = self.get_path(&mut r)?;
            let metadata = self.get_metadata(&mut r)?;
            insert_unique(&mut output_files, path, metadata, "output file")?;
        }

        let mut output_trees = BTreeMap::new();
        for _ in 0..r.get_len("output tree count")? {
            let path = self.get_path(&mut r)?;
            let mut tree = TreeMetadata::new();
            for _ in 0..r.get_len("tree child count")? {
                let child = self.get_path(&mut r)?;
                let metadata = self.get_metadata(&mut r)?;
                insert_unique(&mut tree.children, child, metadata, "tree child")?;
            }
            if r.get_flag("archived tree")? {
                tree.archived = Some(self.get_metadata(&mut r)?);
            }
            if r.get_flag("tree resolved path")? {
                tree.resolved_path = Some(self.get_path(&mut r)?);
            }
            insert_unique(&mut output_trees, path, tree, "output tree")?;
        }

        r.finish()?;

        Ok(ActionEntry {
            action_key,
            file_digest,
            discovered_inputs,
            action_properties_digest,
            output_files,
            output_trees,
        })
    }

    fn put_path(&self, w: &mut WireWriter, path: &str) -> Result<(), CacheError> {
        let id = self.interner.get_or_create_index(path)?;
        w.put_u32(id.as_raw())
    }

    fn get_path(&self, r: &mut WireReader<'_>) -> Result<String, CacheError> {
        let raw = r.get_u32()?;
        self.interner
            .get_string_for_index(PathId::from_raw(raw))
            .ok_or_else(|| CacheError::decode(format!("dangling path id {raw}")))
    }

    fn put_metadata(&self, w: &mut WireWriter, metadata: &RemoteFileMetadata) -> Result<(), CacheError> {
        w.put_bytes(metadata.digest.as_bytes(), "file digest")?;
        w.put_u64(metadata.size)?;
        w.put_u32(metadata.location_index)?;
        match metadata.expiration {
            None => w.put_i64(NO_EXPIRATION)?,
            Some(expiration) => w.put_i64(epoch_millis(expiration)?)?,
        }
        w.put_flag(metadata.resolved_path.is_some());
        if let Some(resolved) = &metadata.resolved_path {
            self.put_path(w, resolved)?;
        }
        Ok(())
    }

    fn get_metadata(&self, r: &mut WireReader<'_>) -> Result<RemoteFileMetadata, CacheError> {
        let digest = Digest::from_bytes(r.get_bytes("file digest")?);
        let size = r.get_u64()?;
        let location_index = r.get_u32()?;
        let expiration = match r.get_i64()? {
            NO_EXPIRATION => None,
            millis if millis < 0 => {
                return Err(CacheError::decode(format!("negative expiration: {millis}")))
            }
            millis => Some(UNIX_EPOCH + Duration::from_millis(millis as u64)),
        };
        let resolved_path = if r.get_flag("resolved path")? {
            Some(self.get_path(r)?)
        } else {
            None
        };
        Ok(RemoteFileMetadata {
            digest,
            size,
            location_index,
            expiration,
            resolved_path,
        })
    }
}

fn latin1_bytes(key: &str) -> Result<Vec<u8>, CacheError> {
    key.chars()
        .map(|c| {
            u8::try_from(c).map_err(|_| {
                CacheError::encode(format!("action key contains non-latin-1 character {c:?}"))
            })
        })
        .collect()
}

fn epoch_millis(time: SystemTime) -> Result<i64, CacheError> {
    let since = time
        .duration_since(UNIX_EPOCH)
        .map_err(|_| CacheError::encode("expiration is before the Unix epoch"))?;
    i64::try_from(since.as_millis())
        .map_err(|_| CacheError::encode("expiration is too far in the future"))
}

fn insert_unique<V>(
    map: &mut BTreeMap<String, V>,
    key: String,
    value: V,
    what: &str,
) -> Result<(), CacheError> {
    if map.contains_key(&key) {
        return Err(CacheError::decode(format!("duplicate {what} {key}")));
    }
    map.insert(key, value);
    Ok(())
}

fn estimate_size(entry: &ActionEntry) -> usize {
    let metadata = Digest::ESTIMATED_SIZE + MAX_VARINT_SIZE * 3 + MAX_VARLONG_SIZE * 2 + 2;
    let inputs = entry.discovered_inputs.as_ref().map_or(0, Vec::len);
    let children: usize = entry
        .output_trees
        .values()
        .map(|tree| tree.children.len() + usize::from(tree.archived.is_some()))
        .sum();

    MAX_VARINT_SIZE
        + entry.action_key.len()
        + 2 * (MAX_VARINT_SIZE + Digest::ESTIMATED_SIZE)
        + MAX_VARINT_SIZE * (3 + inputs)
        + entry.output_files.len() * (MAX_VARINT_SIZE + metadata)
        + entry.output_trees.len() * (MAX_VARINT_SIZE * 3 + 2)
        + children * (MAX_VARINT_SIZE + metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::IntervalPolicy;
    use crate::journal::LogFiles;
    use actcache_common::ManualClock;
    use std::sync::Arc;

    fn interner(dir: &std::path::Path) -> PersistentInterner {
        PersistentInterner::open(
            LogFiles::new(dir.join("index.bin"), dir.join("index_journal.bin")),
            IntervalPolicy::new(Arc::new(ManualClock::new()), Duration::from_secs(3)),
        )
        .unwrap()
    }

    fn digest(byte: u8) -> Digest {
        Digest::from_bytes(&[byte; 32])
    }

    fn full_entry() -> ActionEntry {
        ActionEntry::new("//pkg:compile", digest(1), digest(2))
            .with_discovered_inputs(["src/a.h", "src/b.h"])
            .add_output_file(
                "out/a.o",
                RemoteFileMetadata::new(digest(3), 1024, 1)
                    .with_expiration(UNIX_EPOCH + Duration::from_millis(1_700_000_000_123))
                    .with_resolved_path("real/a.o"),
            )
            .add_output_file("out/b.o", RemoteFileMetadata::new(digest(4), 0, 0))
            .add_output_tree(
                "out/gen",
                TreeMetadata::new()
                    .with_child("x.txt", RemoteFileMetadata::new(digest(5), 7, 2))
                    .with_archived(RemoteFileMetadata::new(digest(6), 99, 0))
                    .with_resolved_path("real/gen"),
            )
            .add_output_tree("out/empty", TreeMetadata::new())
    }

    #[test]
    fn full_entry_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let interner = interner(dir.path());
        let codec = EntryCodec::new(&interner);
        let entry = full_entry();
        let bytes = codec.encode(&entry).unwrap();
        assert_eq!(codec.try_decode(&bytes).unwrap(), entry);
    }

    #[test]
    fn discovery_sentinel_distinguishes_none_from_empty() {
        let dir = tempfile::tempdir().unwrap();
        let interner = interner(dir.path());
        let codec = EntryCodec::new(&interner);

        let none = ActionEntry::new("k", digest(1), digest(2));
        let empty = none.clone().with_discovered_inputs(Vec::<String>::new());
        let none_bytes = codec.encode(&none).unwrap();
        let empty_bytes = codec.encode(&empty).unwrap();
        assert_ne!(none_bytes, empty_bytes);
        assert_eq!(codec.try_decode(&none_bytes).unwrap().discovered_inputs, None);
        assert_eq!(
            codec.try_decode(&empty_bytes).unwrap().discovered_inputs,
            Some(Vec::new())
        );
    }

    #[test]
    fn paths_are_interned_not_inlined() {
        let dir = tempfile::tempdir().unwrap();
        let interner = interner(dir.path());
        let codec = EntryCodec::new(&interner);
        let long = "a/very/long/path/that/should/not/appear/inline.txt";
        let entry = ActionEntry::new("k", digest(1), digest(2))
            .add_output_file(long, RemoteFileMetadata::new(digest(3), 1, 0));
        let bytes = codec.encode(&entry).unwrap();
        assert!(interner.get_index(long).is_some());
        assert!(!bytes.windows(long.len()).any(|w| w == long.as_bytes()));
    }

    #[test]
    fn non_latin1_action_key_fails_to_encode() {
        let dir = tempfile::tempdir().unwrap();
        let interner = interner(dir.path());
        let codec = EntryCodec::new(&interner);
        let entry = ActionEntry::new("key-\u{263a}", digest(1), digest(2));
        assert!(matches!(codec.encode(&entry), Err(CacheError::Encode { .. })));
    }

    #[test]
    fn latin1_action_key_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let interner = interner(dir.path());
        let codec = EntryCodec::new(&interner);
        let entry = ActionEntry::new("caf\u{e9}", digest(1), digest(2));
        let bytes = codec.encode(&entry).unwrap();
        assert_eq!(codec.try_decode(&bytes).unwrap().action_key, "caf\u{e9}");
    }

    #[test]
    fn pre_epoch_expiration_fails_to_encode() {
        let dir = tempfile::tempdir().unwrap();
        let interner = interner(dir.path());
        let codec = EntryCodec::new(&interner);
        let mut metadata = RemoteFileMetadata::new(digest(3), 1, 0);
        metadata.expiration = Some(UNIX_EPOCH - Duration::from_secs(1));
        let entry = ActionEntry::new("k", digest(1), digest(2)).add_output_file("f", metadata);
        assert!(matches!(codec.encode(&entry), Err(CacheError::Encode { .. })));
    }

    #[test]
    fn trailing_byte_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let interner = interner(dir.path());
        let codec = EntryCodec::new(&interner);
        let mut bytes = codec.encode(&full_entry()).unwrap();
        bytes.push(0);
        assert_eq!(codec.decode(&bytes), CachedEntry::Corrupted);
    }

    #[test]
    fn every_truncation_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let interner = interner(dir.path());
        let codec = EntryCodec::new(&interner);
        let bytes = codec.encode(&full_entry()).unwrap();
        for len in 0..bytes.len() {
            assert!(codec.decode(&bytes[..len]).is_corrupted(), "prefix {len}");
        }
    }

    #[test]
    fn dangling_path_id_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let interner = interner(dir.path());
        let codec = EntryCodec::new(&interner);

        let mut w = WireWriter::with_capacity(32);
        w.put_bytes(b"k", "key").unwrap();
        w.put_bytes(&[1], "digest").unwrap();
        w.put_len(1, "count").unwrap();
        w.put_u32(4242).unwrap();
        let bytes = w.into_inner();
        let err = codec.try_decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("dangling path id 4242"));
    }

    #[test]
    fn negative_discovered_count_other_than_sentinel_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let interner = interner(dir.path());
        let codec = EntryCodec::new(&interner);

        let mut w = WireWriter::with_capacity(32);
        w.put_bytes(b"k", "key").unwrap();
        w.put_bytes(&[1], "digest").unwrap();
        w.put_i32(-2).unwrap();
        let bytes = w.into_inner();
        assert!(codec.try_decode(&bytes).is_err());
    }

    #[test]
    fn estimate_covers_typical_entry() {
        let dir = tempfile::tempdir().unwrap();
        let interner = interner(dir.path());
        let codec = EntryCodec::new(&interner);
        let entry = full_entry();
        let bytes = codec.encode(&entry).unwrap();
        assert!(bytes.len() <= estimate_size(&entry));
    }
}
