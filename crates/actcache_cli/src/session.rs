//! Configuration resolution and cache opening shared by all commands.

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use actcache_common::SystemClock;
use actcache_config::ActcacheConfig;
use actcache_diagnostics::{DiagnosticRenderer, DiagnosticSink, TerminalRenderer};
use actcache_store::{ActionCache, CacheLayout, CacheOptions};

use crate::GlobalArgs;

/// Everything a command needs to open the cache.
#[derive(Debug)]
pub struct Session {
    /// Live and quarantine directories.
    pub layout: CacheLayout,
    /// Durability settings.
    pub options: CacheOptions,
    /// Log filter from the configuration.
    pub log_filter: String,
}

/// Result of opening the cache.
pub struct Opened {
    /// The loaded cache.
    pub cache: ActionCache,
    /// How many initialization warnings were reported while loading.
    pub warnings: usize,
}

impl Session {
    /// Loads the configuration named by `--config`, or `actcache.toml` in the
    /// current directory if present. Relative cache paths resolve against
    /// the configuration file's directory.
    pub fn load(global: &GlobalArgs) -> Result<Self, Box<dyn Error>> {
        let (config, base) = match &global.config {
            Some(path) => {
                let config = actcache_config::load_config_file(path)?;
                let base = path
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from("."));
                (config, base)
            }
            None => {
                let cwd = std::env::current_dir()?;
                (actcache_config::load_config(&cwd)?, cwd)
            }
        };
        Ok(Self::from_config(config, &base, global.cache_dir.clone()))
    }

    /// Builds a session from an already-loaded configuration.
    pub fn from_config(mut config: ActcacheConfig, base: &Path, cache_dir: Option<PathBuf>) -> Self {
        if let Some(dir) = cache_dir {
            config.cache.dir = dir;
            config.cache.corrupted_dir = None;
        }
        let layout = CacheLayout::new(
            base.join(&config.cache.dir),
            base.join(config.cache.corrupted_dir()),
        );
        let options = CacheOptions {
            journal_interval: config.cache.journal_interval(),
            compaction_percent: config.cache.compaction_percent,
        };
        Self {
            layout,
            options,
            log_filter: config.log.filter,
        }
    }

    /// Opens the cache and prints any initialization diagnostics.
    pub fn open(&self, global: &GlobalArgs) -> Result<Opened, Box<dyn Error>> {
        let sink = DiagnosticSink::new();
        let cache = ActionCache::open(
            self.layout.clone(),
            self.options,
            Arc::new(SystemClock::new()),
            &sink,
        )?;

        let diagnostics = sink.take_all();
        if !global.quiet {
            let renderer = TerminalRenderer::new(global.color);
            for diag in &diagnostics {
                eprintln!("{}", renderer.render(diag));
            }
        }
        Ok(Opened {
            cache,
            warnings: diagnostics.len(),
        })
    }
}
