//! Call shim for host functions that verify their caller's return address.
//!
//! The first invocation runs a no-op stand-in through the exact indirect
//! call instruction the real target will later return to, captures that
//! instruction's address, and admits its return address into the replacement
//! table. Every invocation then runs the real target between a table
//! swap-in and swap-out.

use std::cell::Cell;
use std::marker::PhantomData;
use std::ptr;

use tracing::warn;

use crate::error::{Error, Result};
use crate::host::ptr::read_into;

/// Address of the 5-byte `call` instruction that invoked the caller of this
/// function. Meaningful only when the caller was reached by a rel32 call.
#[cfg(target_arch = "x86_64")]
#[unsafe(naked)]
unsafe extern "C" fn current_call_site() -> *const u8 {
    core::arch::naked_asm!("mov rax, qword ptr [rsp]", "sub rax, 5", "ret")
}

#[cfg(not(target_arch = "x86_64"))]
unsafe extern "C" fn current_call_site() -> *const u8 {
    ptr::null()
}

const PROBE_SPAN: usize = 16;

/// Backward scan for the indirect call instruction ending at or before
/// `site_index`, returning the index just past it (the host-visible return
/// address).
///
/// Recognized forms: `FF D0`..`FF D7` (call reg) and a REX-prefixed
/// variant.
// TODO: the REX arm accepts FF F0-F7 second bytes; verify against captured
// call sites and tighten the mask to the D0-D7 forms.
pub(crate) fn find_indirect_call(bytes: &[u8], site_index: usize) -> Option<usize> {
    for i in 0..=PROBE_SPAN {
        let Some(probe) = site_index.checked_sub(i) else {
            break;
        };
        let Some(w) = bytes.get(probe..) else {
            continue;
        };
        if w.len() >= 2 && w[0] == 0xFF && (w[1] & 0xF8) == 0xD0 {
            return Some(probe + 2);
        }
        if i >= 2
            && w.len() >= 3
            && (w[0] & 0xF0) == 0x40
            && w[1] == 0xFF
            && (w[2] & 0xF8) == 0xF0
        {
            return Some(probe + 3);
        }
    }
    None
}

fn probe_call_instruction(site: *const u8) -> Result<*const u8> {
    let start = (site as usize)
        .checked_sub(PROBE_SPAN)
        .ok_or(Error::ProbeFailed)?;
    let mut window = [0u8; PROBE_SPAN + 3];
    if !read_into(start as *const u8, &mut window) {
        return Err(Error::ProbeFailed);
    }
    let found = find_indirect_call(&window, PROBE_SPAN).ok_or(Error::ProbeFailed)?;
    Ok((start + found) as *const u8)
}

/// A host function pointer wrapped in the return-address shim.
///
/// `F` is the concrete `unsafe extern "C" fn` type; `call` is provided for
/// arities up to six.
pub struct RetcheckFn<F> {
    target: *const u8,
    call_site: Cell<*const u8>,
    real_call_site: Cell<*const u8>,
    _marker: PhantomData<F>,
}

// Captured sites are only read and written under the caller's lock.
unsafe impl<F> Send for RetcheckFn<F> {}

impl<F> RetcheckFn<F> {
    pub fn new(target: u64) -> Self {
        Self {
            target: target as *const u8,
            call_site: Cell::new(ptr::null()),
            real_call_site: Cell::new(ptr::null()),
            _marker: PhantomData,
        }
    }

    pub fn from_slot(slot: &crate::offset::OffsetSlot) -> crate::error::Result<Self> {
        Ok(Self::new(slot.require()?))
    }

    pub fn target(&self) -> u64 {
        self.target as u64
    }

    #[cfg(test)]
    pub(crate) fn preset_sites(&self, call_site: *const u8, real_call_site: *const u8) {
        self.call_site.set(call_site);
        self.real_call_site.set(real_call_site);
    }
}

macro_rules! impl_retcheck_fn {
    ($( $arg:ident : $ty:ident ),*) => {
        impl<R: Default $(, $ty: Copy)*> RetcheckFn<unsafe extern "C" fn($($ty),*) -> R> {
            /// Invoke the wrapped function with the table swapped in.
            ///
            /// Returns `R::default()` when the call site cannot be resolved
            /// or the bypass is not installed.
            ///
            /// # Safety
            ///
            /// The wrapped address must be a function with this exact
            /// signature, and its own preconditions must hold.
            pub unsafe fn call(&self $(, $arg: $ty)*) -> R {
                unsafe extern "C" fn stand_in<R: Default $(, $ty)*>($(_: $ty),*) -> R {
                    R::default()
                }

                let real = unsafe {
                    std::mem::transmute::<*const u8, unsafe extern "C" fn($($ty),*) -> R>(
                        self.target,
                    )
                };

                let result = loop {
                    let mut current: unsafe extern "C" fn($($ty),*) -> R =
                        stand_in::<R $(, $ty)*>;
                    let armed = !self.call_site.get().is_null();
                    if armed {
                        current = real;
                        if self.real_call_site.get().is_null() {
                            match probe_call_instruction(self.call_site.get()) {
                                Ok(site) => self.real_call_site.set(site),
                                Err(e) => {
                                    warn!("guarded call aborted: {e}");
                                    return R::default();
                                }
                            }
                        }
                        if !super::admit_return_address(self.real_call_site.get() as u64) {
                            warn!("guarded call aborted: could not admit return address");
                            return R::default();
                        }
                        super::swap_in();
                    }

                    // black_box keeps this an indirect call through a
                    // register, which is what the probe looks for.
                    let out = unsafe { (std::hint::black_box(current))($($arg),*) };
                    self.call_site.set(unsafe { current_call_site() });

                    if armed {
                        break out;
                    }
                    if self.call_site.get().is_null() {
                        warn!("guarded call aborted: call site capture unavailable");
                        return R::default();
                    }
                };
                super::swap_out();
                result
            }
        }
    };
}

impl_retcheck_fn!();
impl_retcheck_fn!(a0: A0);
impl_retcheck_fn!(a0: A0, a1: A1);
impl_retcheck_fn!(a0: A0, a1: A1, a2: A2);
impl_retcheck_fn!(a0: A0, a1: A1, a2: A2, a3: A3);
impl_retcheck_fn!(a0: A0, a1: A1, a2: A2, a3: A3, a4: A4);
impl_retcheck_fn!(a0: A0, a1: A1, a2: A2, a3: A3, a4: A4, a5: A5);
