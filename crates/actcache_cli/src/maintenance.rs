//! `actcache check` and `actcache clear`.

use std::error::Error;

use tracing::info;

use crate::session::Session;
use crate::stats::StatsReport;
use crate::GlobalArgs;

/// Runs the `actcache check` command.
///
/// Loading already validates the cache and resets it when it is unreadable.
/// Returns exit code 1 when that happened, 0 otherwise.
pub fn check(session: &Session, global: &GlobalArgs) -> Result<i32, Box<dyn Error>> {
    let opened = session.open(global)?;
    let cache = &opened.cache;

    let written = cache.save()?;
    let report = StatsReport::collect(cache)?;
    info!(
        bytes = written,
        elapsed_ms = report.statistics.save_time_ms.unwrap_or_default(),
        "saved action cache"
    );

    if !global.quiet {
        eprintln!(
            "    Checked {} entries, {} paths in {} (saved in {} ms)",
            report.entries,
            report.paths,
            session.layout.root.display(),
            report.statistics.save_time_ms.unwrap_or_default()
        );
    }
    Ok(if opened.warnings > 0 { 1 } else { 0 })
}

/// Runs the `actcache clear` command.
pub fn clear(session: &Session, global: &GlobalArgs) -> Result<i32, Box<dyn Error>> {
    let opened = session.open(global)?;
    let removed = opened.cache.entry_count();
    opened.cache.clear();
    opened.cache.save()?;
    if !global.quiet {
        eprintln!(
            "    Cleared {removed} entries from {}",
            session.layout.root.display()
        );
    }
    Ok(0)
}
