//! Fatal per-version logfiles
//!
//! When a state-change handler fails, the failure is written to the
//! version's logfile so it can be read next to the failed build.

use std::fs;
use std::io;
use std::path::Path;
use tracing::warn;

/// Write `FATAL ERROR: <prefix>: <error>` to `path`, replacing its contents.
///
/// Failures are logged and otherwise ignored.
pub fn write_fatal_logfile(path: &Path, prefix: &str, error: &str) {
    match write(path, prefix, error) {
        Ok(()) => warn!("FATAL ERROR: {}, logging to file: {:?}", prefix, path),
        Err(e) => warn!("Unable to log failure: {:?}: {}: {} ({})", path, prefix, error, e),
    }
}

fn write(path: &Path, prefix: &str, error: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, format!("FATAL ERROR: {prefix}: {error}\n"))
}
