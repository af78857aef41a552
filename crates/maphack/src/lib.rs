//! Injected payload: library entry point, one-shot initialisation and the
//! script-facing binding surface.

mod bindings;
mod diag;
mod runtime;

pub use bindings::*;

#[cfg(target_os = "windows")]
mod entry {
    use std::ffi::c_void;
    use std::sync::Once;

    use windows::Win32::Foundation::{BOOL, HMODULE};
    use windows::Win32::System::SystemServices::DLL_PROCESS_ATTACH;

    static START: Once = Once::new();

    #[unsafe(no_mangle)]
    unsafe extern "system" fn DllMain(module: HMODULE, reason: u32, _reserved: *mut c_void) -> BOOL {
        if reason == DLL_PROCESS_ATTACH {
            let own_module = module.0 as usize;
            START.call_once(|| {
                // Initialisation scans the host image and touches the
                // filesystem; run it on a fresh thread, which the loader
                // only schedules after the loader lock is released.
                std::thread::spawn(move || crate::runtime::initialize(own_module));
            });
        }
        BOOL::from(true)
    }
}
