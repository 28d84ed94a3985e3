//! Hit and miss accounting.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Why an action could not be served from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MissReason {
    /// The stored entry belongs to a different action key.
    DifferentActionKey,
    /// The declared inputs changed.
    DifferentDeps,
    /// The client environment or action properties changed.
    DifferentEnvironment,
    /// An output file changed or went missing.
    DifferentFiles,
    /// The stored entry could not be decoded.
    CorruptedCacheEntry,
    /// There is no entry for the action.
    NotCached,
    /// The action must run regardless of the cache.
    UnconditionalExecution,
}

impl MissReason {
    /// Every reason, in reporting order.
    pub const ALL: [MissReason; 7] = [
        MissReason::DifferentActionKey,
        MissReason::DifferentDeps,
        MissReason::DifferentEnvironment,
        MissReason::DifferentFiles,
        MissReason::CorruptedCacheEntry,
        MissReason::NotCached,
        MissReason::UnconditionalExecution,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for MissReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MissReason::DifferentActionKey => "DIFFERENT_ACTION_KEY",
            MissReason::DifferentDeps => "DIFFERENT_DEPS",
            MissReason::DifferentEnvironment => "DIFFERENT_ENVIRONMENT",
            MissReason::DifferentFiles => "DIFFERENT_FILES",
            MissReason::CorruptedCacheEntry => "CORRUPTED_CACHE_ENTRY",
            MissReason::NotCached => "NOT_CACHED",
            MissReason::UnconditionalExecution => "UNCONDITIONAL_EXECUTION",
        };
        f.write_str(name)
    }
}

/// Miss count for one reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MissDetail {
    /// The reason.
    pub reason: MissReason,
    /// How many misses had this reason.
    pub count: u64,
}

/// Summary of cache usage for one build invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActionCacheStatistics {
    /// Total size of the cache files on disk.
    pub size_in_bytes: u64,
    /// Time spent loading the cache, when this invocation loaded it.
    pub load_time_ms: Option<u64>,
    /// Time spent saving the cache, when this invocation saved it.
    pub save_time_ms: Option<u64>,
    /// Number of hits.
    pub hits: u64,
    /// Total number of misses.
    pub misses: u64,
    /// Per-reason miss counts, one per [`MissReason`].
    pub miss_details: Vec<MissDetail>,
}

impl fmt::Display for ActionCacheStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "size:   {} bytes", self.size_in_bytes)?;
        if let Some(ms) = self.load_time_ms {
            writeln!(f, "load:   {ms} ms")?;
        }
        if let Some(ms) = self.save_time_ms {
            writeln!(f, "save:   {ms} ms")?;
        }
        writeln!(f, "hits:   {}", self.hits)?;
        writeln!(f, "misses: {}", self.misses)?;
        for detail in &self.miss_details {
            writeln!(f, "  {}: {}", detail.reason, detail.count)?;
        }
        Ok(())
    }
}

/// Lock-free hit and per-reason miss counters.
#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    hits: AtomicU64,
    misses: [AtomicU64; MissReason::ALL.len()],
}

impl CacheCounters {
    pub(crate) fn account_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn account_miss(&self, reason: MissReason) {
        self.misses[reason.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn merge_into(&self, stats: &mut ActionCacheStatistics) {
        stats.hits = self.hits.load(Ordering::Relaxed);
        stats.miss_details = MissReason::ALL
            .iter()
            .map(|&reason| MissDetail {
                reason,
                count: self.misses[reason.index()].load(Ordering::Relaxed),
            })
            .collect();
        stats.misses = stats.miss_details.iter().map(|d| d.count).sum();
    }

    pub(crate) fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        for counter in &self.misses {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
