//! Compact persistent action cache.
//!
//! An [`ActionCache`] maps action keys to [`ActionEntry`] records describing
//! the outputs an action produced. Entries are packed into small byte strings
//! by [`EntryCodec`], with every path replaced by an id from a
//! [`PersistentInterner`]. Both structures are kept durable by a snapshot
//! plus an append-only journal, and the cache recovers from a corrupted or
//! outdated directory by starting over.

#![warn(missing_docs)]

pub mod codec;
pub mod engine;
pub mod entry;
pub mod error;
mod format;
pub mod interner;
pub mod journal;
mod map;
pub mod policy;
pub mod stats;
mod wire;

pub use codec::EntryCodec;
pub use engine::{ActionCache, CacheLayout, CacheOptions, CACHE_INITIALIZATION_WARNING};
pub use entry::{ActionEntry, CachedEntry, RemoteFileMetadata, TreeMetadata};
pub use error::CacheError;
pub use interner::PersistentInterner;
pub use journal::LogFiles;
pub use policy::{IntervalGate, IntervalPolicy, JournalPolicy};
pub use stats::{ActionCacheStatistics, MissDetail, MissReason};
