//! Shared foundational types for the action cache.
//!
//! This crate provides the interned path identifier used as the compact key
//! space, content checksums for persisted files, opaque action digests, and
//! the clock abstraction that drives journal cadence.

#![warn(missing_docs)]

pub mod clock;
pub mod digest;
pub mod hash;
pub mod ident;

pub use clock::{Clock, ManualClock, SystemClock};
pub use digest::Digest;
pub use hash::ContentHash;
pub use ident::PathId;
