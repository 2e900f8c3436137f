//! File logging for test runs.

use netrel_core::{NetrelError, Result};
use std::fs::File;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the filter directives for the test log.
pub const LOG_ENV: &str = "NETREL_LOG";

const DEFAULT_FILTER: &str = "netrel_core=debug,netrel_testkit=debug";

/// Truncate `path` and install a global subscriber writing to it.
///
/// Returns `false` when a global subscriber was already installed; the file
/// is truncated either way.
pub fn init_file_logging(path: &Path) -> Result<bool> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| NetrelError::Io(format!("cannot create {}: {}", parent.display(), e)))?;
    }
    let file = File::create(path)
        .map_err(|e| NetrelError::Io(format!("cannot create log {}: {}", path.display(), e)))?;

    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init()
        .is_ok();
    Ok(installed)
}
