//! `actcache stats`: usage summary of an on-disk cache.

use std::error::Error;

use actcache_store::{ActionCache, ActionCacheStatistics};
use serde::Serialize;

use crate::session::Session;
use crate::{GlobalArgs, ReportFormat, StatsArgs};

/// Statistics plus entry counts, as printed by `stats`.
#[derive(Debug, Serialize)]
pub struct StatsReport {
    /// Number of action entries.
    pub entries: usize,
    /// Number of interned paths.
    pub paths: usize,
    /// Hit, miss, size and timing figures.
    #[serde(flatten)]
    pub statistics: ActionCacheStatistics,
}

impl StatsReport {
    /// Collects a report from an open cache.
    pub fn collect(cache: &ActionCache) -> Result<Self, Box<dyn Error>> {
        let mut statistics = ActionCacheStatistics {
            size_in_bytes: cache.size_on_disk()?,
            load_time_ms: cache.take_load_time().map(|d| d.as_millis() as u64),
            save_time_ms: cache.take_save_time().map(|d| d.as_millis() as u64),
            ..Default::default()
        };
        cache.merge_into_statistics(&mut statistics);
        Ok(Self {
            entries: cache.entry_count(),
            paths: cache.interner().size(),
            statistics,
        })
    }
}

/// Runs the `actcache stats` command.
pub fn run(args: &StatsArgs, session: &Session, global: &GlobalArgs) -> Result<i32, Box<dyn Error>> {
    let opened = session.open(global)?;
    let report = StatsReport::collect(&opened.cache)?;
    match args.format {
        ReportFormat::Text => {
            println!("entries: {}", report.entries);
            println!("paths:  {}", report.paths);
            print!("{}", report.statistics);
        }
        ReportFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use actcache_common::{Digest, ManualClock};
    use actcache_diagnostics::DiagnosticSink;
    use actcache_store::{ActionEntry, CacheLayout, CacheOptions};
    use std::sync::Arc;

    #[test]
    fn report_counts_entries_and_serializes_flat() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ActionCache::open(
            CacheLayout::new(dir.path().join("c"), dir.path().join("c.corrupted")),
            CacheOptions::default(),
            Arc::new(ManualClock::new()),
            &DiagnosticSink::new(),
        )
        .unwrap();
        cache.put(
            "//a",
            &ActionEntry::new("//a", Digest::from_bytes(&[1]), Digest::from_bytes(&[2])),
        );
        cache.save().unwrap();

        let report = StatsReport::collect(&cache).unwrap();
        assert_eq!(report.entries, 1);
        assert_eq!(report.paths, 1);
        assert!(report.statistics.size_in_bytes > 0);
        assert_eq!(report.statistics.load_time_ms, Some(0));
        assert_eq!(report.statistics.save_time_ms, Some(0));

        let json: serde_json::Value = serde_json::to_value(&report).unwrap();
        assert_eq!(json["entries"], 1);
        assert_eq!(json["hits"], 0);
        assert_eq!(json["miss_details"].as_array().unwrap().len(), 7);

        let again = StatsReport::collect(&cache).unwrap();
        assert_eq!(again.statistics.load_time_ms, None);
        assert_eq!(again.statistics.save_time_ms, None);
    }
}
