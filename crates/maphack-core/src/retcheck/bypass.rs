use std::ptr;

use tracing::{debug, trace};

use crate::error::{Error, Result};

use super::obfuscate::{CONSTANT_OFFSET, deobfuscate, obfuscate, sboxes_are_inverse};

/// Host-side descriptor of the valid return-address table.
#[repr(C)]
pub struct ReturnAddresses {
    pub ptr: *mut u32,
    pub count: u32,
}

/// Host-side image range the table entries are encoded against. `size`
/// precedes `base` in the host layout.
#[repr(C)]
pub struct ImageRange {
    pub size: i64,
    pub base: u64,
}

/// Root of the host's return-address integrity state.
#[repr(C)]
pub struct RetCheckData {
    pub constants: *mut u8,
    pub addresses: *mut ReturnAddresses,
    pad_0010: [u8; 8],
    pub range: *mut ImageRange,
}

impl RetCheckData {
    pub fn new(constants: *mut u8, addresses: *mut ReturnAddresses, range: *mut ImageRange) -> Self {
        Self {
            constants,
            addresses,
            pad_0010: [0; 8],
            range,
        }
    }
}

struct Saved {
    addresses: *mut ReturnAddresses,
    base: u64,
    size: i64,
}

/// Replacement valid-return-address table.
///
/// At install time the host table is decoded once, rebased onto the live
/// module base and re-encoded against an image base of zero, so that entries
/// stay valid while [`swap_in`](Self::swap_in) also widens the checked range
/// to the whole address space. Our own return addresses are then just more
/// entries in the same table.
pub struct RetcheckBypass {
    data: *mut RetCheckData,
    constant: u32,
    table: Vec<u32>,
    descriptor: Box<ReturnAddresses>,
    saved: Option<Saved>,
}

// The raw pointers target host memory that is only touched while the caller
// holds the global bypass lock.
unsafe impl Send for RetcheckBypass {}

impl RetcheckBypass {
    /// Decode the host table and prepare the replacement. Performed once;
    /// the host table never changes after startup.
    pub fn install(data: *mut RetCheckData, module_base: u64) -> Result<Self> {
        if !sboxes_are_inverse() {
            return Err(Error::Corruption);
        }
        if data.is_null() {
            return Err(Error::Missing("RetCheckData"));
        }
        let (constants, addresses, range) = unsafe {
            let d = &*data;
            (d.constants, d.addresses, d.range)
        };
        if constants.is_null() {
            return Err(Error::Missing("retcheck constant block"));
        }
        if addresses.is_null() {
            return Err(Error::Missing("retcheck address table"));
        }
        if range.is_null() {
            return Err(Error::Missing("retcheck image range"));
        }

        let constant =
            unsafe { ptr::read_unaligned(constants.add(CONSTANT_OFFSET).cast::<u32>()) };

        let (host_ptr, host_count) = unsafe {
            let a = &*addresses;
            (a.ptr, a.count)
        };
        if host_ptr.is_null() {
            return Err(Error::Missing("retcheck table entries"));
        }

        let mut table = Vec::with_capacity(host_count as usize + 16);
        for i in 0..host_count as usize {
            let entry = unsafe { ptr::read(host_ptr.add(i)) };
            let offset = deobfuscate(entry, constant);
            table.push(obfuscate(module_base + u64::from(offset), 0, constant));
        }
        table.sort_unstable();

        let mut descriptor = Box::new(ReturnAddresses {
            ptr: ptr::null_mut(),
            count: 0,
        });
        descriptor.ptr = table.as_mut_ptr();
        descriptor.count = table.len() as u32;

        debug!(
            "integrity table decoded: {} entries, constant {constant:#010x}",
            table.len()
        );

        Ok(Self {
            data,
            constant,
            table,
            descriptor,
            saved: None,
        })
    }

    pub fn is_swapped_in(&self) -> bool {
        self.saved.is_some()
    }

    /// Point the host at the replacement table and widen its image range.
    /// Idempotent.
    pub fn swap_in(&mut self) -> Result<()> {
        if self.saved.is_some() {
            return Ok(());
        }
        let d = unsafe { &mut *self.data };
        if d.addresses.is_null() || d.range.is_null() {
            return Err(Error::Missing("retcheck state"));
        }
        let saved = unsafe {
            Saved {
                addresses: d.addresses,
                base: (*d.range).base,
                size: (*d.range).size,
            }
        };
        unsafe {
            ptr::write_volatile(&mut (*d.range).base, 0);
            ptr::write_volatile(&mut (*d.range).size, i64::MAX);
            ptr::write_volatile(&mut d.addresses, &mut *self.descriptor);
        }
        self.saved = Some(saved);
        trace!("integrity table swapped in ({} entries)", self.descriptor.count);
        Ok(())
    }

    /// Restore the host table exactly as captured by the last swap-in.
    pub fn swap_out(&mut self) -> Result<()> {
        let Some(saved) = self.saved.take() else {
            return Ok(());
        };
        let d = unsafe { &mut *self.data };
        unsafe {
            ptr::write_volatile(&mut d.addresses, saved.addresses);
            ptr::write_volatile(&mut (*d.range).base, saved.base);
            ptr::write_volatile(&mut (*d.range).size, saved.size);
        }
        trace!("integrity table restored");
        Ok(())
    }

    /// Admit `retaddr` as a valid return address. No-op if already present.
    pub fn add_address(&mut self, retaddr: u64) {
        let obf = obfuscate(retaddr, 0, self.constant);
        if let Err(at) = self.table.binary_search(&obf) {
            self.table.insert(at, obf);
            // The insert may reallocate; refresh the descriptor either way.
            self.descriptor.ptr = self.table.as_mut_ptr();
            self.descriptor.count = self.table.len() as u32;
            trace!("admitted return address {retaddr:#x}");
        }
    }

    /// True when `retaddr` is already admitted.
    pub fn contains(&self, retaddr: u64) -> bool {
        self.table
            .binary_search(&obfuscate(retaddr, 0, self.constant))
            .is_ok()
    }

    /// Diagnostic probe: encode `retaddr` against whatever descriptor the
    /// host currently sees and report whether its checker would accept it.
    ///
    /// The table is consulted both linearly and by binary search; the host
    /// only binary-searches, so a mismatch between the two means the table
    /// lost its sort order.
    pub fn validate_return_address(&self, retaddr: u64) -> bool {
        let d = unsafe { &*self.data };
        let Some(range) = (unsafe { d.range.as_ref() }) else {
            trace!("validate {retaddr:#x}: no image range");
            return false;
        };
        let calculated = obfuscate(retaddr, range.base, self.constant);
        trace!(
            "validate {retaddr:#x}: base {:#x}, offset {:#010x}, encoded {calculated:#010x}",
            range.base,
            retaddr.wrapping_sub(range.base) as u32
        );

        let Some(addresses) = (unsafe { d.addresses.as_ref() }) else {
            trace!("validate {retaddr:#x}: no address table");
            return false;
        };
        if addresses.ptr.is_null() || addresses.count == 0 {
            trace!("validate {retaddr:#x}: empty address table");
            return false;
        }
        let entries =
            unsafe { std::slice::from_raw_parts(addresses.ptr, addresses.count as usize) };

        let linear = entries.iter().position(|&entry| entry == calculated);
        match linear {
            Some(at) => trace!("validate {retaddr:#x}: linear scan hit at {at}"),
            None => trace!("validate {retaddr:#x}: linear scan miss"),
        }
        match entries.binary_search(&calculated) {
            Ok(at) => trace!("validate {retaddr:#x}: binary search hit at {at}"),
            Err(_) if linear.is_some() => {
                trace!("validate {retaddr:#x}: binary search miss, table unsorted")
            }
            Err(_) => trace!("validate {retaddr:#x}: binary search miss"),
        }

        linear.is_some()
    }
}

impl Drop for RetcheckBypass {
    fn drop(&mut self) {
        let _ = self.swap_out();
    }
}
