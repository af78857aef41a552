//! Signature scan against a dumped executable image.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use goblin::pe::PE;
use owo_colors::OwoColorize;
use tracing::info;

use maphack_core::offset::{
    ImageSections, Section, builtin_signatures, clear_slots, scan, signature_hash,
};

const SCN_MEM_EXECUTE: u32 = 0x2000_0000;

/// Parse the image with goblin, run every built-in signature over its
/// executable sections and report per-signature results.
pub fn run(path: &Path, json: bool) -> Result<()> {
    let bytes =
        fs::read(path).with_context(|| format!("reading image {}", path.display()))?;
    let pe = PE::parse(&bytes).with_context(|| format!("parsing {}", path.display()))?;

    let image = image_from_pe(&pe, &bytes);
    info!(
        "image base {:#x}, {} sections ({} executable)",
        image.base,
        image.sections.len(),
        image.executable().count()
    );

    let signatures = builtin_signatures();
    clear_slots(&signatures);
    let outcome = scan(&image, &signatures)?;

    if json {
        let report: Vec<serde_json::Value> = signatures
            .iter()
            .map(|sig| {
                serde_json::json!({
                    "name": sig.name,
                    "pattern": sig.pattern,
                    "address": sig.slot.get(),
                    "rva": sig.slot.get().and_then(|a| image.to_rva(a)),
                })
            })
            .collect();
        let doc = serde_json::json!({
            "image": path.display().to_string(),
            "base": image.base,
            "signature_hash": signature_hash(&signatures),
            "resolved": outcome.resolved,
            "total": outcome.total,
            "signatures": report,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    for sig in &signatures {
        match sig.slot.get() {
            Some(address) => {
                let rva = image.to_rva(address).unwrap_or(0);
                println!(
                    "{:40} {} {:#014x} (rva {:#x})",
                    sig.name,
                    "resolved".green(),
                    address,
                    rva
                );
            }
            None => println!("{:40} {}", sig.name, "unresolved".red()),
        }
    }
    println!();
    if outcome.resolved == outcome.total {
        println!("{} {}/{}", "resolved".green(), outcome.resolved, outcome.total);
    } else {
        println!("{} {}/{}", "resolved".yellow(), outcome.resolved, outcome.total);
    }
    Ok(())
}

fn image_from_pe(pe: &PE, bytes: &[u8]) -> ImageSections {
    let sections = pe
        .sections
        .iter()
        .map(|sec| {
            let name = sec
                .name()
                .map(str::to_owned)
                .unwrap_or_else(|_| String::from_utf8_lossy(&sec.name).into_owned());
            let size = sec.virtual_size as usize;
            let start = sec.pointer_to_raw_data as usize;
            let take = (sec.size_of_raw_data as usize).min(size);

            // Sections are mapped at virtual_size; raw data beyond it is
            // alignment padding, the rest is zero-filled.
            let mut data = vec![0u8; size];
            if let Some(raw) = start
                .checked_add(take)
                .and_then(|end| bytes.get(start..end))
            {
                data[..take].copy_from_slice(raw);
            }

            Section {
                name,
                rva: sec.virtual_address as u64,
                executable: sec.characteristics & SCN_MEM_EXECUTE != 0,
                data,
            }
        })
        .collect();
    ImageSections::new(pe.image_base as u64, sections)
}
