//! Parsing and validation of `actcache.toml`.
//!
//! The file is optional: every setting has a default, so a project without
//! one gets a cache under `.actcache/` with the standard journal cadence.

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod types;

pub use error::ConfigError;
pub use loader::{load_config, load_config_file, load_config_from_str, CONFIG_FILE_NAME};
pub use types::*;
