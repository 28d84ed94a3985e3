//! `actcache dump`: print the path index and every decoded entry.

use std::error::Error;
use std::io::{self, Write};

use crate::session::Session;
use crate::GlobalArgs;

/// Runs the `actcache dump` command.
pub fn run(session: &Session, global: &GlobalArgs) -> Result<i32, Box<dyn Error>> {
    let opened = session.open(global)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    opened.cache.dump(&mut out)?;
    out.flush()?;
    Ok(0)
}
