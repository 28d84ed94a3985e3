//! When to append to the journal and when to compact.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use actcache_common::Clock;

/// Decides when a journaled structure writes to disk.
pub trait JournalPolicy: Send + Sync {
    /// Called after every mutation. Returning `true` writes pending
    /// mutations to the journal now.
    fn update_journal(&self) -> bool;

    /// Called by `save` once the journal is up to date. Returning `true`
    /// keeps the journal instead of folding it into a new snapshot.
    fn keep_journal(&self, _journal_bytes: u64, _snapshot_bytes: u64) -> bool {
        false
    }

    /// Journal writes slower than this are logged.
    fn slow_write_threshold(&self) -> Option<Duration> {
        None
    }
}

/// Fires at most once per interval of monotonic time.
///
/// The first firing happens one interval after the gate is created. A zero
/// interval fires on every check.
pub struct IntervalGate {
    clock: Arc<dyn Clock>,
    interval: Duration,
    next_fire: AtomicU64,
}

impl IntervalGate {
    /// Creates a gate over `clock`.
    pub fn new(clock: Arc<dyn Clock>, interval: Duration) -> Self {
        let next_fire = AtomicU64::new(clock.nano_time().saturating_add(nanos(interval)));
        Self {
            clock,
            interval,
            next_fire,
        }
    }

    /// Returns the configured interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns `true` for exactly one caller once the interval has elapsed.
    pub fn try_fire(&self) -> bool {
        let now = self.clock.nano_time();
        let due = self.next_fire.load(Ordering::Acquire);
        if now < due {
            return false;
        }
        self.next_fire
            .compare_exchange(
                due,
                now.saturating_add(nanos(self.interval)),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

fn nanos(interval: Duration) -> u64 {
    u64::try_from(interval.as_nanos()).unwrap_or(u64::MAX)
}

/// Time-gated policy that always compacts on save.
pub struct IntervalPolicy {
    gate: IntervalGate,
}

impl IntervalPolicy {
    /// Creates a policy that journals at most once per `interval`.
    pub fn new(clock: Arc<dyn Clock>, interval: Duration) -> Self {
        Self {
            gate: IntervalGate::new(clock, interval),
        }
    }
}

impl JournalPolicy for IntervalPolicy {
    fn update_journal(&self) -> bool {
        self.gate.try_fire()
    }
}
