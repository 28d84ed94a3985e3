//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::GlobalArgs;

/// Picks the filter directive: `-v` and `-q` beat the configured filter.
/// `RUST_LOG`, when set, beats all of them.
fn default_directive<'a>(global: &GlobalArgs, configured: &'a str) -> &'a str {
    if global.verbose {
        "debug"
    } else if global.quiet {
        "error"
    } else {
        configured
    }
}

/// Installs a stderr `fmt` subscriber.
pub fn init(global: &GlobalArgs, configured: &str) {
    let directive = default_directive(global, configured);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directive))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(global.color)
        .with_target(false)
        .try_init();
    if let Err(err) = installed {
        eprintln!("warning: failed to install tracing subscriber: {err}");
    }
}
