//! Guarded reads of host memory.
//!
//! Pointers handed to us by the host are untrusted: they can be null, stale,
//! or point into decommitted pages. Every read goes through a readability
//! check first, so a bad pointer demotes to `None` instead of faulting.

/// True when `[ptr, ptr + len)` is committed, readable memory.
#[cfg(target_os = "windows")]
pub fn is_readable(ptr: *const u8, len: usize) -> bool {
    use windows::Win32::System::Memory::{
        MEM_COMMIT, MEMORY_BASIC_INFORMATION, PAGE_GUARD, PAGE_NOACCESS, VirtualQuery,
    };

    if ptr.is_null() || len == 0 {
        return false;
    }
    let mut at = ptr as usize;
    let Some(end) = at.checked_add(len) else {
        return false;
    };
    while at < end {
        let mut info = MEMORY_BASIC_INFORMATION::default();
        let written = unsafe {
            VirtualQuery(
                Some(at as *const core::ffi::c_void),
                &mut info,
                std::mem::size_of::<MEMORY_BASIC_INFORMATION>(),
            )
        };
        if written == 0 {
            return false;
        }
        if info.State != MEM_COMMIT {
            return false;
        }
        if (info.Protect & (PAGE_NOACCESS | PAGE_GUARD)).0 != 0 {
            return false;
        }
        let region_end = info.BaseAddress as usize + info.RegionSize;
        if region_end <= at {
            return false;
        }
        at = region_end;
    }
    true
}

#[cfg(not(target_os = "windows"))]
pub fn is_readable(ptr: *const u8, len: usize) -> bool {
    !ptr.is_null() && len > 0 && (ptr as usize).checked_add(len).is_some()
}

/// Copy `out.len()` bytes from `ptr`, or leave `out` untouched and return
/// `false` when the range is not readable.
pub fn read_into(ptr: *const u8, out: &mut [u8]) -> bool {
    if out.is_empty() {
        return true;
    }
    if !is_readable(ptr, out.len()) {
        return false;
    }
    unsafe { std::ptr::copy_nonoverlapping(ptr, out.as_mut_ptr(), out.len()) };
    true
}

/// Read a `T` by value, or `None` when the range is not readable.
pub fn try_read<T: Copy>(ptr: *const T) -> Option<T> {
    if !is_readable(ptr.cast(), std::mem::size_of::<T>()) {
        return None;
    }
    Some(unsafe { std::ptr::read_unaligned(ptr) })
}

/// Borrow a `T` in place, or `None` when the range is not readable.
///
/// # Safety
///
/// The caller picks the lifetime; the referent must stay valid for it.
pub unsafe fn try_deref<'a, T>(ptr: *const T) -> Option<&'a T> {
    if !is_readable(ptr.cast(), std::mem::size_of::<T>()) {
        return None;
    }
    Some(unsafe { &*ptr })
}

/// Mutable variant of [`try_deref`].
///
/// # Safety
///
/// Same as [`try_deref`], plus the usual aliasing rules.
pub unsafe fn try_deref_mut<'a, T>(ptr: *mut T) -> Option<&'a mut T> {
    if !is_readable(ptr.cast_const().cast(), std::mem::size_of::<T>()) {
        return None;
    }
    Some(unsafe { &mut *ptr })
}
