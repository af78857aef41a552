//! Diagnostic logging for the injected payload.
//!
//! There is no console to write to inside the host process, so all tracing
//! output goes to a timestamped log file in the payload's data directory.

use std::fs::{self, File};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "maphack=debug,maphack_core=debug";

/// Install the global tracing subscriber writing into `dir`.
///
/// `MAPHACK_LOG` overrides the default filter when set.
pub fn init(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("creating log directory {}", dir.display()))?;

    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let path = dir.join(format!("maphack-{stamp}.log"));
    let file = File::create(&path)
        .with_context(|| format!("creating log file {}", path.display()))?;

    let filter = EnvFilter::try_from_env("MAPHACK_LOG")
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .try_init()
        .map_err(|e| anyhow::anyhow!("installing log subscriber: {e}"))?;
    Ok(())
}
