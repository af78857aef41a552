//! One-shot payload initialisation and the process-wide runtime state.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use maphack_core::offset::{self, slots};
use maphack_core::retcheck::{self, RetCheckData};
use maphack_core::{
    Automap, AutomapHost, IdentityHost, ImageSections, PlayerIdentity, Reveal, RevealHost,
};

use crate::diag;

const IDENTITY_CACHE_FILE: &str = "identity-constants.json";

/// Everything the bindings need, built once after injection.
pub struct Runtime {
    pub identity_host: IdentityHost,
    pub identity: Mutex<PlayerIdentity>,
    pub reveal: Reveal,
    pub automap: Automap,
    pub image: ImageSections,
}

// The embedded pointers all refer to process-global host state. The runtime
// itself is shared read-only; the identity state sits behind its own lock.
unsafe impl Send for Runtime {}
unsafe impl Sync for Runtime {}

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// The runtime, or `None` until initialisation has completed successfully.
pub fn runtime() -> Option<&'static Runtime> {
    RUNTIME.get()
}

/// Full startup sequence: logging, image snapshot, offset resolution,
/// bypass installation, host wiring.
///
/// Failures are logged and leave the runtime unset; every binding then
/// answers with its sentinel.
pub fn initialize(own_module: usize) {
    let dir = data_dir(own_module);
    // If logging cannot come up there is nowhere left to report to.
    let _ = diag::init(&dir);

    match build(&dir) {
        Ok(rt) => {
            if RUNTIME.set(rt).is_err() {
                warn!("runtime already initialised");
            } else {
                info!("maphack ready");
            }
        }
        Err(e) => error!("initialisation failed: {e:#}"),
    }
}

fn build(dir: &Path) -> Result<Runtime> {
    let image = snapshot().context("snapshotting the host image")?;
    image.log_summary();

    let complete = offset::initialize_offsets(&image, dir).context("resolving offsets")?;
    if !complete {
        warn!("some offsets are unresolved, dependent operations will refuse");
    }

    let data = slots::RET_CHECK_DATA
        .as_ptr::<RetCheckData>()
        .context("locating the return-address check state")?;
    retcheck::install_bypass(data, image.base).context("installing the bypass")?;

    Ok(Runtime {
        identity_host: IdentityHost::from_slots().context("wiring the identity host")?,
        identity: Mutex::new(PlayerIdentity::new(Some(dir.join(IDENTITY_CACHE_FILE)))),
        reveal: Reveal::new(RevealHost::from_slots().context("wiring the reveal host")?),
        automap: Automap::new(AutomapHost::from_slots().context("wiring the automap host")?),
        image,
    })
}

#[cfg(target_os = "windows")]
fn snapshot() -> maphack_core::Result<ImageSections> {
    offset::snapshot_current_module()
}

#[cfg(not(target_os = "windows"))]
fn snapshot() -> maphack_core::Result<ImageSections> {
    Err(maphack_core::Error::HostRejected(
        "live image snapshots are Windows-only",
    ))
}

/// Directory the payload writes into: next to the payload DLL itself, with
/// a temp-dir fallback when the module path cannot be read.
#[cfg(target_os = "windows")]
fn data_dir(own_module: usize) -> PathBuf {
    use windows::Win32::Foundation::HMODULE;
    use windows::Win32::System::LibraryLoader::GetModuleFileNameW;

    let module = HMODULE(own_module as *mut std::ffi::c_void);
    let mut buf = [0u16; 1024];
    let len = unsafe { GetModuleFileNameW(module, &mut buf) } as usize;
    if len > 0 && len < buf.len() {
        let path = PathBuf::from(String::from_utf16_lossy(&buf[..len]));
        if let Some(parent) = path.parent() {
            return parent.to_path_buf();
        }
    }
    std::env::temp_dir().join("maphack")
}

#[cfg(not(target_os = "windows"))]
fn data_dir(_own_module: usize) -> PathBuf {
    std::env::temp_dir().join("maphack")
}
