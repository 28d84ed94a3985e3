//! Configuration types deserialized from `actcache.toml`.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// The top-level configuration.
#[derive(Debug, Default, Deserialize)]
pub struct ActcacheConfig {
    /// Cache location and persistence cadence.
    #[serde(default)]
    pub cache: CacheSection,
    /// Logging settings.
    #[serde(default)]
    pub log: LogSection,
}

/// The `[cache]` section.
#[derive(Debug, Deserialize)]
pub struct CacheSection {
    /// The live cache directory.
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
    /// Where a corrupted cache is moved aside. Defaults to a `.corrupted`
    /// sibling of [`dir`](Self::dir).
    #[serde(default)]
    pub corrupted_dir: Option<PathBuf>,
    /// Minimum time between journal checkpoints, in milliseconds.
    #[serde(default = "default_journal_interval_ms")]
    pub journal_interval_ms: u64,
    /// The journal is kept, rather than compacted into a new snapshot, while
    /// its size stays below this percentage of the snapshot size.
    #[serde(default = "default_compaction_percent")]
    pub compaction_percent: u64,
}

impl CacheSection {
    /// Returns the quarantine directory, falling back to `<dir>.corrupted`.
    pub fn corrupted_dir(&self) -> PathBuf {
        if let Some(dir) = &self.corrupted_dir {
            return dir.clone();
        }
        let mut name = self
            .dir
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "action_cache".into());
        name.push(".corrupted");
        self.dir.with_file_name(name)
    }

    /// Returns the journal interval as a [`Duration`].
    pub fn journal_interval(&self) -> Duration {
        Duration::from_millis(self.journal_interval_ms)
    }
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            corrupted_dir: None,
            journal_interval_ms: default_journal_interval_ms(),
            compaction_percent: default_compaction_percent(),
        }
    }
}

/// The `[log]` section.
#[derive(Debug, Deserialize)]
pub struct LogSection {
    /// A `tracing` env-filter directive such as `"warn"` or `"actcache_store=debug"`.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".actcache/action_cache")
}

fn default_journal_interval_ms() -> u64 {
    3_000
}

fn default_compaction_percent() -> u64 {
    1
}

fn default_log_filter() -> String {
    "warn".to_string()
}
