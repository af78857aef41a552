//! Offset cache inspection.

use std::path::Path;

use anyhow::{Context, Result};
use owo_colors::OwoColorize;

use maphack_core::offset::OffsetCache;

pub fn run(path: &Path, json: bool) -> Result<()> {
    let cache = OffsetCache::read_from(path)
        .with_context(|| format!("reading cache {}", path.display()))?;

    if json {
        let doc = serde_json::json!({
            "exe_hash": format!("{:016x}", cache.exe_hash),
            "signature_hash": format!("{:08x}", cache.signature_hash),
            "entries": cache
                .entries
                .iter()
                .map(|(name, offset)| serde_json::json!({ "name": name, "offset": offset }))
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    println!("exe hash:       {:016x}", cache.exe_hash);
    println!("signature hash: {:08x}", cache.signature_hash);
    println!("entries:        {}", cache.entries.len());
    println!();
    for (name, offset) in &cache.entries {
        if *offset == 0 {
            println!("{name:40} {}", "null".red());
        } else {
            println!("{name:40} {offset:#x}");
        }
    }
    Ok(())
}
