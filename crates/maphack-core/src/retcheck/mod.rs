//! Return-address integrity bypass: table replacement plus the call shim.

mod bypass;
mod obfuscate;
mod shim;

pub use bypass::{ImageRange, RetCheckData, RetcheckBypass, ReturnAddresses};
pub use obfuscate::{CONSTANT_OFFSET, deobfuscate, obfuscate};
pub use shim::RetcheckFn;

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};

static BYPASS: Mutex<Option<RetcheckBypass>> = Mutex::new(None);

fn holder() -> MutexGuard<'static, Option<RetcheckBypass>> {
    BYPASS.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Build the replacement table from the host state and make it available to
/// every [`RetcheckFn`]. Replaces any previous installation.
pub fn install_bypass(data: *mut RetCheckData, module_base: u64) -> Result<()> {
    let bypass = RetcheckBypass::install(data, module_base)?;
    *holder() = Some(bypass);
    Ok(())
}

/// Restore the host state and drop the replacement table.
pub fn uninstall_bypass() -> Result<()> {
    match holder().take() {
        Some(mut bypass) => bypass.swap_out(),
        None => Err(Error::Missing("installed bypass")),
    }
}

pub fn is_bypass_installed() -> bool {
    holder().is_some()
}

pub(crate) fn admit_return_address(retaddr: u64) -> bool {
    match holder().as_mut() {
        Some(bypass) => {
            bypass.add_address(retaddr);
            true
        }
        None => false,
    }
}

pub(crate) fn swap_in() -> bool {
    match holder().as_mut() {
        Some(bypass) => bypass.swap_in().is_ok(),
        None => false,
    }
}

pub(crate) fn swap_out() {
    if let Some(bypass) = holder().as_mut() {
        let _ = bypass.swap_out();
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    // Tests that touch the global holder serialize on this lock.
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    pub struct GlobalGuard {
        _lock: MutexGuard<'static, ()>,
        // Host structures the installed bypass points into.
        _entries: Vec<u32>,
        _addresses: Box<ReturnAddresses>,
        _range: Box<ImageRange>,
        _constants: Vec<u8>,
        _data: Box<RetCheckData>,
    }

    impl Drop for GlobalGuard {
        fn drop(&mut self) {
            *holder() = None;
        }
    }

    /// Install a bypass over fabricated host state and hold it for the
    /// duration of the guard.
    pub fn install_fixture() -> GlobalGuard {
        let lock = TEST_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        *holder() = None;

        const BASE: u64 = 0x7FF6_0000_0000;
        const CONSTANT: u32 = 0x1357_9BDF;
        let mut entries: Vec<u32> = (1..8u32)
            .map(|n| obfuscate(u64::from(n) * 0x1000, 0, CONSTANT))
            .collect();
        entries.sort_unstable();
        let mut addresses = Box::new(ReturnAddresses {
            ptr: entries.as_mut_ptr(),
            count: entries.len() as u32,
        });
        let mut range = Box::new(ImageRange {
            size: 0x0100_0000,
            base: BASE,
        });
        let mut constants = vec![0u8; CONSTANT_OFFSET + 4];
        constants[CONSTANT_OFFSET..].copy_from_slice(&CONSTANT.to_le_bytes());
        let mut data = Box::new(RetCheckData::new(
            constants.as_mut_ptr(),
            &mut *addresses,
            &mut *range,
        ));

        install_bypass(&mut *data, BASE).unwrap();
        GlobalGuard {
            _lock: lock,
            _entries: entries,
            _addresses: addresses,
            _range: range,
            _constants: constants,
            _data: data,
        }
    }

    pub struct UninstalledGuard {
        _lock: MutexGuard<'static, ()>,
    }

    /// Hold the global holder empty for the duration of the guard.
    pub fn lock_uninstalled() -> UninstalledGuard {
        let lock = TEST_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        *holder() = None;
        UninstalledGuard { _lock: lock }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_and_uninstall_global() {
        let guard = testing::install_fixture();
        assert!(is_bypass_installed());
        assert!(admit_return_address(0x1234_5678));
        assert!(swap_in());
        swap_out();
        drop(guard);
        assert!(uninstall_bypass().is_err());
    }

    #[test]
    fn test_helpers_fail_closed_when_uninstalled() {
        let _guard = testing::lock_uninstalled();
        assert!(!is_bypass_installed());
        assert!(!admit_return_address(0x1000));
        assert!(!swap_in());
        swap_out();
    }
}
