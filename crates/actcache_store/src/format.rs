//! On-disk layout of snapshot and journal files.
//!
//! Both kinds of file start with a 4-byte little-endian header length and a
//! bincode-encoded [`FileHeader`]. A snapshot's payload is a run of `(key,
//! value)` pairs protected by a checksum; a journal's payload is a run of
//! [`Record`]s appended over time, so it carries no checksum.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use actcache_common::ContentHash;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Most bytes a single decoded record may claim. Journals carry no checksum,
/// so a damaged length prefix must fail here instead of reaching the allocator.
const MAX_RECORD_BYTES: usize = 64 << 20;

/// Identifies the files of one persistent structure and the version of
/// their encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreFormat {
    /// Magic bytes at the start of every header.
    pub magic: [u8; 4],
    /// Format version. Files with any other version are not read.
    pub version: u32,
}

/// Which of the two files a header belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum FileKind {
    Snapshot,
    Journal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileHeader {
    magic: [u8; 4],
    format_version: u32,
    kind: FileKind,
    checksum: Option<ContentHash>,
}

/// One journaled mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum Record<K, V> {
    Put(K, V),
    Remove(K),
}

/// Encodes a header for a file of the given kind.
fn encode_header(
    format: StoreFormat,
    kind: FileKind,
    checksum: Option<ContentHash>,
) -> Result<Vec<u8>, CacheError> {
    let header = FileHeader {
        magic: format.magic,
        format_version: format.version,
        kind,
        checksum,
    };
    let header_bytes = bincode::serde::encode_to_vec(&header, bincode::config::standard())?;
    let header_len = u32::try_from(header_bytes.len())
        .map_err(|_| CacheError::encode("file header does not fit in the format"))?;

    let mut output = Vec::with_capacity(4 + header_bytes.len());
    output.extend_from_slice(&header_len.to_le_bytes());
    output.extend_from_slice(&header_bytes);
    Ok(output)
}

/// Returns the header bytes that start a fresh journal file.
pub(crate) fn journal_header(format: StoreFormat) -> Result<Vec<u8>, CacheError> {
    encode_header(format, FileKind::Journal, None)
}

/// Appends the encoding of `record` to `out`.
pub(crate) fn encode_record<K: Serialize, V: Serialize>(
    record: &Record<K, V>,
    out: &mut Vec<u8>,
) -> Result<(), CacheError> {
    bincode::serde::encode_into_std_write(record, out, bincode::config::standard())?;
    Ok(())
}

/// Validates the header of `raw` and returns the payload that follows it.
fn split_header<'a>(
    path: &Path,
    raw: &'a [u8],
    format: StoreFormat,
    kind: FileKind,
) -> Result<&'a [u8], CacheError> {
    let corrupted = |reason: String| CacheError::Corrupted {
        path: path.to_path_buf(),
        reason,
    };

    if raw.len() < 4 {
        return Err(corrupted("file is shorter than its header length".into()));
    }
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&raw[..4]);
    let header_len = u32::from_le_bytes(len_bytes) as usize;
    if raw.len() - 4 < header_len {
        return Err(corrupted("file header is truncated".into()));
    }

    let (header, read): (FileHeader, usize) =
        bincode::serde::decode_from_slice(&raw[4..4 + header_len], bincode::config::standard())
            .map_err(|e| corrupted(format!("unreadable file header: {e}")))?;
    if read != header_len {
        return Err(corrupted("file header length mismatch".into()));
    }

    if header.magic != format.magic {
        return Err(corrupted(format!("bad magic bytes {:?}", header.magic)));
    }
    if header.format_version != format.version {
        return Err(CacheError::IncompatibleFormat {
            path: path.to_path_buf(),
            expected: format.version,
            actual: header.format_version,
        });
    }
    if header.kind != kind {
        return Err(corrupted(format!("expected a {kind:?} file, found {:?}", header.kind)));
    }

    let payload = &raw[4 + header_len..];
    match (kind, header.checksum) {
        (FileKind::Snapshot, Some(expected)) => {
            if ContentHash::from_bytes(payload) != expected {
                return Err(corrupted("checksum mismatch".into()));
            }
        }
        (FileKind::Snapshot, None) => return Err(corrupted("snapshot has no checksum".into())),
        (FileKind::Journal, _) => {}
    }
    Ok(payload)
}

/// Reads a file, treating a missing file as empty.
fn read_optional(path: &Path) -> Result<Vec<u8>, CacheError> {
    match fs::read(path) {
        Ok(raw) => Ok(raw),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(CacheError::io(path, e)),
    }
}

/// Decodes consecutive values until the payload is exhausted.
fn decode_all<T: DeserializeOwned>(path: &Path, mut payload: &[u8]) -> Result<Vec<T>, CacheError> {
    let mut items = Vec::new();
    while !payload.is_empty() {
        let (item, read): (T, usize) =
            bincode::serde::decode_from_slice(
                payload,
                bincode::config::standard().with_limit::<MAX_RECORD_BYTES>(),
            )
            .map_err(|e| CacheError::Corrupted {
                path: path.to_path_buf(),
                reason: format!("undecodable record {}: {e}", items.len()),
            })?;
        items.push(item);
        payload = &payload[read..];
    }
    Ok(items)
}

/// Reads every `(key, value)` pair of a snapshot. Missing or empty files are empty.
pub(crate) fn read_snapshot<K, V>(path: &Path, format: StoreFormat) -> Result<Vec<(K, V)>, CacheError>
where
    K: DeserializeOwned,
    V: DeserializeOwned,
{
    let raw = read_optional(path)?;
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    let payload = split_header(path, &raw, format, FileKind::Snapshot)?;
    decode_all(path, payload)
}

/// Reads every record of a journal. Missing or empty files are empty.
pub(crate) fn read_journal<K, V>(path: &Path, format: StoreFormat) -> Result<Vec<Record<K, V>>, CacheError>
where
    K: DeserializeOwned,
    V: DeserializeOwned,
{
    let raw = read_optional(path)?;
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    let payload = split_header(path, &raw, format, FileKind::Journal)?;
    decode_all(path, payload)
}

/// Accumulates a snapshot payload and writes it in one atomic step.
pub(crate) struct SnapshotWriter {
    format: StoreFormat,
    payload: Vec<u8>,
    count: usize,
}

impl SnapshotWriter {
    pub(crate) fn new(format: StoreFormat) -> Self {
        Self {
            format,
            payload: Vec::new(),
            count: 0,
        }
    }

    pub(crate) fn put<K, V>(&mut self, key: &K, value: &V) -> Result<(), CacheError>
    where
        K: Serialize + ?Sized,
        V: Serialize + ?Sized,
    {
        bincode::serde::encode_into_std_write((key, value), &mut self.payload, bincode::config::standard())?;
        self.count += 1;
        Ok(())
    }

    pub(crate) fn count(&self) -> usize {
        self.count
    }

    /// Writes header and payload to a temporary sibling, then renames it over
    /// `path`. Returns the number of bytes written.
    pub(crate) fn commit(self, path: &Path) -> Result<u64, CacheError> {
        let checksum = ContentHash::from_bytes(&self.payload);
        let header = encode_header(self.format, FileKind::Snapshot, Some(checksum))?;
        atomic_write(path, &[&header, &self.payload])?;
        Ok((header.len() + self.payload.len()) as u64)
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn atomic_write(path: &Path, chunks: &[&[u8]]) -> Result<(), CacheError> {
    let tmp = tmp_path(path);
    let write_result = (|| -> io::Result<()> {
        let mut file = File::create(&tmp)?;
        for chunk in chunks {
            file.write_all(chunk)?;
        }
        file.sync_all()
    })();
    if let Err(e) = write_result {
        let _ = fs::remove_file(&tmp);
        return Err(CacheError::io(&tmp, e));
    }
    fs::rename(&tmp, path).map_err(|e| CacheError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORMAT: StoreFormat = StoreFormat {
        magic: *b"TEST",
        version: 3,
    };

    fn write_journal(path: &Path, records: &[Record<u32, String>]) {
        let mut bytes = journal_header(FORMAT).unwrap();
        for record in records {
            encode_record(record, &mut bytes).unwrap();
        }
        fs::write(path, bytes).unwrap();
    }

    #[test]
    fn missing_files_read_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot: Vec<(u32, String)> = read_snapshot(&dir.path().join("s.bin"), FORMAT).unwrap();
        let journal: Vec<Record<u32, String>> =
            read_journal(&dir.path().join("j.bin"), FORMAT).unwrap();
        assert!(snapshot.is_empty());
        assert!(journal.is_empty());
    }

    #[test]
    fn snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.bin");
        let mut writer = SnapshotWriter::new(FORMAT);
        writer.put(&1u32, "one").unwrap();
        writer.put(&2u32, "two").unwrap();
        assert_eq!(writer.count(), 2);
        let written = writer.commit(&path).unwrap();
        assert_eq!(written, fs::metadata(&path).unwrap().len());
        assert!(!tmp_path(&path).exists());

        let pairs: Vec<(u32, String)> = read_snapshot(&path, FORMAT).unwrap();
        assert_eq!(pairs, vec![(1, "one".into()), (2, "two".into())]);
    }

    #[test]
    fn journal_records_replay_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("j.bin");
        write_journal(
            &path,
            &[Record::Put(1, "a".into()), Record::Remove(1), Record::Put(2, "b".into())],
        );
        let records: Vec<Record<u32, String>> = read_journal(&path, FORMAT).unwrap();
        assert_eq!(
            records,
            vec![Record::Put(1, "a".into()), Record::Remove(1), Record::Put(2, "b".into())]
        );
    }

    #[test]
    fn version_mismatch_is_incompatible_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.bin");
        let mut writer = SnapshotWriter::new(StoreFormat { version: 9, ..FORMAT });
        writer.put(&1u32, "x").unwrap();
        writer.commit(&path).unwrap();

        let err = read_snapshot::<u32, String>(&path, FORMAT).unwrap_err();
        assert!(matches!(
            err,
            CacheError::IncompatibleFormat {
                expected: 3,
                actual: 9,
                ..
            }
        ));
    }

    #[test]
    fn wrong_magic_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.bin");
        let mut writer = SnapshotWriter::new(StoreFormat { magic: *b"NOPE", ..FORMAT });
        writer.put(&1u32, "x").unwrap();
        writer.commit(&path).unwrap();
        assert!(matches!(
            read_snapshot::<u32, String>(&path, FORMAT),
            Err(CacheError::Corrupted { .. })
        ));
    }

    #[test]
    fn flipped_payload_byte_fails_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.bin");
        let mut writer = SnapshotWriter::new(FORMAT);
        writer.put(&7u32, "seven").unwrap();
        writer.commit(&path).unwrap();

        let mut raw = fs::read(&path).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        fs::write(&path, raw).unwrap();

        let err = read_snapshot::<u32, String>(&path, FORMAT).unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn journal_read_as_snapshot_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("j.bin");
        write_journal(&path, &[Record::Put(1, "a".into())]);
        assert!(matches!(
            read_snapshot::<u32, String>(&path, FORMAT),
            Err(CacheError::Corrupted { .. })
        ));
    }

    #[test]
    fn truncated_journal_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("j.bin");
        write_journal(&path, &[Record::Put(1, "a long enough value".into())]);
        let raw = fs::read(&path).unwrap();
        fs::write(&path, &raw[..raw.len() - 3]).unwrap();
        assert!(matches!(
            read_journal::<u32, String>(&path, FORMAT),
            Err(CacheError::Corrupted { .. })
        ));
    }

    #[test]
    fn oversized_string_length_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("j.bin");
        let mut raw = journal_header(FORMAT).unwrap();
        // Put, key 0, then a u64 varint string length of 2^40.
        raw.extend_from_slice(&[0, 0, 253]);
        raw.extend_from_slice(&(1u64 << 40).to_le_bytes());
        raw.extend_from_slice(b"abc");
        fs::write(&path, raw).unwrap();

        let err = read_journal::<u32, String>(&path, FORMAT).unwrap_err();
        assert!(matches!(err, CacheError::Corrupted { .. }), "{err}");
    }

    #[test]
    fn short_file_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.bin");
        fs::write(&path, [1u8, 0]).unwrap();
        assert!(read_snapshot::<u32, String>(&path, FORMAT).is_err());
    }
}
