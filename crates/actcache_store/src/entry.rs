//! In-memory shape of a cached action result.
//!
//! An [`ActionEntry`] records what an action looked like the last time it ran
//! (its key, input and property digests, discovered inputs) together with the
//! remote metadata of every output file and output tree it produced. Only
//! remote metadata is kept: local outputs are re-checked against the
//! filesystem on every build and never trusted from the cache.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use actcache_common::Digest;

/// Metadata of an output file stored in remote execution storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFileMetadata {
    /// Content digest of the file.
    pub digest: Digest,
    /// Size of the file in bytes.
    pub size: u64,
    /// Index of the remote location holding the file.
    pub location_index: u32,
    /// When the remote copy may be evicted. Kept to millisecond precision.
    pub expiration: Option<SystemTime>,
    /// Real path of the file if the output was a resolved symlink.
    pub resolved_path: Option<String>,
}

impl RemoteFileMetadata {
    /// Creates metadata with no expiration and no resolved path.
    pub fn new(digest: Digest, size: u64, location_index: u32) -> Self {
        Self {
            digest,
            size,
            location_index,
            expiration: None,
            resolved_path: None,
        }
    }

    /// Sets the expiration, truncated to whole milliseconds.
    pub fn with_expiration(mut self, expiration: SystemTime) -> Self {
        self.expiration = Some(truncate_to_millis(expiration));
        self
    }

    /// Sets the resolved real path.
    pub fn with_resolved_path(mut self, path: impl Into<String>) -> Self {
        self.resolved_path = Some(path.into());
        self
    }
}

impl fmt::Display for RemoteFileMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "digest={} size={} location={}",
            self.digest, self.size, self.location_index
        )?;
        if let Some(expiration) = self.expiration {
            let millis = expiration
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or_default();
            write!(f, " expires={millis}ms")?;
        }
        if let Some(path) = &self.resolved_path {
            write!(f, " resolved={path}")?;
        }
        Ok(())
    }
}

/// Metadata of an output directory tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeMetadata {
    /// Files in the tree, keyed by path relative to the tree root.
    pub children: BTreeMap<String, RemoteFileMetadata>,
    /// The tree as a single archive, when one was produced.
    pub archived: Option<RemoteFileMetadata>,
    /// Real path of the tree root if it was a resolved symlink.
    pub resolved_path: Option<String>,
}

impl TreeMetadata {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a child file.
    pub fn with_child(mut self, path: impl Into<String>, metadata: RemoteFileMetadata) -> Self {
        self.children.insert(path.into(), metadata);
        self
    }

    /// Sets the archived representation.
    pub fn with_archived(mut self, metadata: RemoteFileMetadata) -> Self {
        self.archived = Some(metadata);
        self
    }

    /// Sets the resolved real path of the tree root.
    pub fn with_resolved_path(mut self, path: impl Into<String>) -> Self {
        self.resolved_path = Some(path.into());
        self
    }
}

/// The cached record of one action execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionEntry {
    /// Fingerprint identity of the action. Must be single-byte characters.
    pub action_key: String,
    /// Digest of the action's declared inputs and configuration.
    pub file_digest: Digest,
    /// Inputs discovered while running the action; `None` when the action
    /// does not discover inputs, which is distinct from discovering none.
    pub discovered_inputs: Option<Vec<String>>,
    /// Digest of environment and properties relevant to cache validity.
    pub action_properties_digest: Digest,
    /// Remote metadata of each output file.
    pub output_files: BTreeMap<String, RemoteFileMetadata>,
    /// Metadata of each output tree.
    pub output_trees: BTreeMap<String, TreeMetadata>,
}

impl ActionEntry {
    /// Creates an entry with no discovered inputs and no outputs.
    pub fn new(
        action_key: impl Into<String>,
        file_digest: Digest,
        action_properties_digest: Digest,
    ) -> Self {
        Self {
            action_key: action_key.into(),
            file_digest,
            discovered_inputs: None,
            action_properties_digest,
            output_files: BTreeMap::new(),
            output_trees: BTreeMap::new(),
        }
    }

    /// Records the inputs discovered during execution.
    pub fn with_discovered_inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.discovered_inputs = Some(inputs.into_iter().map(Into::into).collect());
        self
    }

    /// Adds an output file.
    pub fn add_output_file(mut self, path: impl Into<String>, metadata: RemoteFileMetadata) -> Self {
        self.output_files.insert(path.into(), metadata);
        self
    }

    /// Adds an output tree.
    pub fn add_output_tree(mut self, path: impl Into<String>, tree: TreeMetadata) -> Self {
        self.output_trees.insert(path.into(), tree);
        self
    }
}

impl fmt::Display for ActionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "      actionKey = {}", self.action_key)?;
        writeln!(f, "      digestKey = {}", self.file_digest)?;
        writeln!(f, "      propertiesDigest = {}", self.action_properties_digest)?;
        match &self.discovered_inputs {
            None => writeln!(f, "      discoveredInputs = (none)")?,
            Some(inputs) => {
                writeln!(f, "      discoveredInputs ({}):", inputs.len())?;
                for input in inputs {
                    writeln!(f, "        {input}")?;
                }
            }
        }
        if !self.output_files.is_empty() {
            writeln!(f, "      outputFiles ({}):", self.output_files.len())?;
            for (path, metadata) in &self.output_files {
                writeln!(f, "        {path}: {metadata}")?;
            }
        }
        if !self.output_trees.is_empty() {
            writeln!(f, "      outputTrees ({}):", self.output_trees.len())?;
            for (path, tree) in &self.output_trees {
                writeln!(f, "        {path}:")?;
                for (child, metadata) in &tree.children {
                    writeln!(f, "          {child}: {metadata}")?;
                }
                if let Some(archived) = &tree.archived {
                    writeln!(f, "          (archived): {archived}")?;
                }
                if let Some(resolved) = &tree.resolved_path {
                    writeln!(f, "          (resolved): {resolved}")?;
                }
            }
        }
        Ok(())
    }
}

/// A value read back from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedEntry {
    /// A successfully decoded entry.
    Entry(ActionEntry),
    /// The stored bytes could not be decoded. Callers treat this as a miss.
    Corrupted,
}

impl CachedEntry {
    /// Returns `true` for the corruption sentinel.
    pub fn is_corrupted(&self) -> bool {
        matches!(self, CachedEntry::Corrupted)
    }

    /// Returns the decoded entry, if any.
    pub fn as_entry(&self) -> Option<&ActionEntry> {
        match self {
            CachedEntry::Entry(entry) => Some(entry),
            CachedEntry::Corrupted => None,
        }
    }

    /// Consumes the value and returns the decoded entry, if any.
    pub fn into_entry(self) -> Option<ActionEntry> {
        match self {
            CachedEntry::Entry(entry) => Some(entry),
            CachedEntry::Corrupted => None,
        }
    }
}

impl fmt::Display for CachedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CachedEntry::Entry(entry) => entry.fmt(f),
            CachedEntry::Corrupted => writeln!(f, "      (corrupted)"),
        }
    }
}

fn truncate_to_millis(time: SystemTime) -> SystemTime {
    match time.duration_since(UNIX_EPOCH) {
        Ok(since) => {
            let millis = u64::try_from(since.as_millis()).unwrap_or(u64::MAX);
            UNIX_EPOCH + Duration::from_millis(millis)
        }
        // Pre-epoch times are rejected by the codec; leave them untouched.
        Err(_) => time,
    }
}
