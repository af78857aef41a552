use tracing::debug;

/// A copied-out image section.
#[derive(Debug, Clone)]
pub struct Section {
    pub name: String,
    /// Virtual address relative to the image base.
    pub rva: u64,
    pub executable: bool,
    pub data: Vec<u8>,
}

/// A snapshot of a loaded image's sections.
///
/// Section bytes are copied at snapshot time, so scanning never touches live
/// memory and the snapshot can just as well be built from a file on disk.
#[derive(Debug, Clone)]
pub struct ImageSections {
    /// Load address of the image the snapshot was taken from.
    pub base: u64,
    pub sections: Vec<Section>,
}

impl ImageSections {
    pub fn new(base: u64, sections: Vec<Section>) -> Self {
        Self { base, sections }
    }

    /// Executable sections only, in image order.
    pub fn executable(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter().filter(|s| s.executable)
    }

    /// Translate an absolute address within this image to an RVA.
    pub fn to_rva(&self, address: u64) -> Option<u64> {
        address.checked_sub(self.base)
    }
}

#[cfg(target_os = "windows")]
mod live {
    use super::{ImageSections, Section};
    use crate::error::{Error, Result};
    use crate::host::ptr::try_read;

    use windows::Win32::System::LibraryLoader::GetModuleHandleW;

    const DOS_MAGIC: u16 = 0x5A4D;
    const PE_MAGIC: u32 = 0x0000_4550;
    const SCN_MEM_EXECUTE: u32 = 0x2000_0000;

    #[repr(C)]
    #[derive(Clone, Copy)]
    struct SectionHeader {
        name: [u8; 8],
        virtual_size: u32,
        virtual_address: u32,
        size_of_raw_data: u32,
        pointer_to_raw_data: u32,
        pointer_to_relocations: u32,
        pointer_to_linenumbers: u32,
        number_of_relocations: u16,
        number_of_linenumbers: u16,
        characteristics: u32,
    }

    /// Snapshot the main module of the current process by walking its PE
    /// headers in place.
    pub fn snapshot_current_module() -> Result<ImageSections> {
        let module = unsafe { GetModuleHandleW(None) }
            .map_err(|_| Error::HostRejected("main module handle unavailable"))?;
        let base = module.0 as u64;

        let e_magic: u16 = try_read(base as *const u16).ok_or(Error::Corruption)?;
        if e_magic != DOS_MAGIC {
            return Err(Error::Corruption);
        }
        let e_lfanew: u32 = try_read((base + 0x3C) as *const u32).ok_or(Error::Corruption)?;
        let nt = base + e_lfanew as u64;
        let pe_magic: u32 = try_read(nt as *const u32).ok_or(Error::Corruption)?;
        if pe_magic != PE_MAGIC {
            return Err(Error::Corruption);
        }

        let number_of_sections: u16 = try_read((nt + 0x06) as *const u16).ok_or(Error::Corruption)?;
        let size_of_optional_header: u16 =
            try_read((nt + 0x14) as *const u16).ok_or(Error::Corruption)?;
        let first_section = nt + 0x18 + size_of_optional_header as u64;

        let mut sections = Vec::with_capacity(number_of_sections as usize);
        for i in 0..number_of_sections as u64 {
            let header_addr = first_section + i * size_of_header();
            let header: SectionHeader =
                try_read(header_addr as *const SectionHeader).ok_or(Error::Corruption)?;

            let len = header.name.iter().position(|&b| b == 0).unwrap_or(8);
            let name = String::from_utf8_lossy(&header.name[..len]).into_owned();
            let executable = header.characteristics & SCN_MEM_EXECUTE != 0;

            let start = base + header.virtual_address as u64;
            let size = header.virtual_size as usize;
            let mut data = vec![0u8; size];
            if !crate::host::ptr::read_into(start as *const u8, &mut data) {
                return Err(Error::AccessViolation);
            }

            sections.push(Section {
                name,
                rva: header.virtual_address as u64,
                executable,
                data,
            });
        }

        Ok(ImageSections::new(base, sections))
    }

    const fn size_of_header() -> u64 {
        std::mem::size_of::<SectionHeader>() as u64
    }
}

#[cfg(target_os = "windows")]
pub use live::snapshot_current_module;

impl ImageSections {
    /// Debug-log a one-line summary of the snapshot.
    pub fn log_summary(&self) {
        for s in &self.sections {
            debug!(
                "section {:8} rva={:#x} len={:#x} exec={}",
                s.name,
                s.rva,
                s.data.len(),
                s.executable
            );
        }
    }
}
