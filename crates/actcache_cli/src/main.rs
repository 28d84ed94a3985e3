//! actcache CLI: inspection and maintenance of an on-disk action cache.
//!
//! Provides `actcache dump` to print every entry, `actcache stats` for a usage
//! summary, `actcache check` to load, validate and re-save a cache, and
//! `actcache clear` to empty it.

#![warn(missing_docs)]

mod dump;
mod logging;
mod maintenance;
mod session;
mod stats;

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};

/// actcache: inspect and maintain a persistent action cache.
#[derive(Parser, Debug)]
#[command(name = "actcache", version, about = "Action cache inspection tool")]
pub struct Cli {
    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose (debug-level) output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Control colored output.
    #[arg(long, global = true, value_enum, default_value_t = ColorChoice::Auto)]
    pub color: ColorChoice,

    /// Path to a custom `actcache.toml` configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Cache directory, overriding `cache.dir` from the configuration.
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the path index and every decoded entry.
    Dump,
    /// Print hit, miss and size statistics.
    Stats(StatsArgs),
    /// Load and validate the cache, then save it. Fails if it had to be reset.
    Check,
    /// Remove every entry from the cache.
    Clear,
}

/// Arguments for the `actcache stats` subcommand.
#[derive(Parser, Debug)]
pub struct StatsArgs {
    /// Output format.
    #[arg(short, long, value_enum, default_value_t = ReportFormat::Text)]
    pub format: ReportFormat,
}

/// Controls whether colored output is produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ColorChoice {
    /// Detect from terminal capabilities.
    Auto,
    /// Always produce colored output.
    Always,
    /// Never produce colored output.
    Never,
}

/// Report output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    /// Human-readable terminal output.
    Text,
    /// Machine-readable JSON output.
    Json,
}

/// Global settings derived from CLI flags.
pub struct GlobalArgs {
    /// Whether to suppress non-error output.
    pub quiet: bool,
    /// Whether to print verbose/debug information.
    pub verbose: bool,
    /// Whether to use colored output.
    pub color: bool,
    /// Optional path to a custom config file.
    pub config: Option<PathBuf>,
    /// Optional cache directory override.
    pub cache_dir: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    let color = match cli.color {
        ColorChoice::Auto => std::io::stderr().is_terminal(),
        ColorChoice::Always => true,
        ColorChoice::Never => false,
    };

    let global = GlobalArgs {
        quiet: cli.quiet,
        verbose: cli.verbose,
        color,
        config: cli.config,
        cache_dir: cli.cache_dir,
    };

    let result = session::Session::load(&global).and_then(|session| {
        logging::init(&global, &session.log_filter);
        match cli.command {
            Command::Dump => dump::run(&session, &global),
            Command::Stats(ref args) => stats::run(args, &session, &global),
            Command::Check => maintenance::check(&session, &global),
            Command::Clear => maintenance::clear(&session, &global),
        }
    });

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}
