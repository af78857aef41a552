//! Offset resolution: pattern DSL, image scanner, registry and cache.

mod cache;
mod image;
mod pattern;
mod registry;
mod scanner;

pub use cache::*;
pub use image::*;
pub use pattern::*;
pub use registry::*;
pub use scanner::*;

use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::Result;

/// Resolve every registered signature, preferring the on-disk cache.
///
/// The cache is keyed on both the executable's content hash and the hash of
/// the signature set; any mismatch, missing entry or null slot after applying
/// falls back to a full scan, after which a fresh cache is written.
///
/// Returns `true` iff every signature ended up resolved.
pub fn initialize_offsets(image: &ImageSections, cache_dir: &Path) -> Result<bool> {
    let signatures = builtin_signatures();
    if signatures.is_empty() {
        warn!("no signatures registered");
        return Ok(true);
    }
    debug!("{} offsets to resolve", signatures.len());

    let sig_hash = signature_hash(&signatures);
    let exe_hash = exe_hash();
    if exe_hash.is_none() {
        warn!("failed to hash the running executable, offset caching disabled");
    }

    if let Some(exe_hash) = exe_hash {
        let path = cache_path(cache_dir, exe_hash);
        match OffsetCache::read_from(&path) {
            Ok(cache) => {
                if cache.exe_hash == exe_hash
                    && cache.signature_hash == sig_hash
                    && cache.apply(image.base, &signatures)
                {
                    info!("loaded {} offsets from cache", signatures.len());
                    return Ok(true);
                }
                debug!("cache validation failed, rescanning");
                clear_slots(&signatures);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!("ignoring unreadable offset cache: {e}"),
        }
    }

    debug!("performing full pattern scan");
    let outcome = scan(image, &signatures)?;
    info!("resolved {}/{} offsets", outcome.resolved, outcome.total);

    if outcome.resolved > 0
        && let Some(exe_hash) = exe_hash
    {
        let cache = OffsetCache::build(exe_hash, sig_hash, image.base, &signatures);
        let path = cache_path(cache_dir, exe_hash);
        match cache.write_atomic(&path) {
            Ok(()) => debug!("offsets cached at {}", path.display()),
            Err(e) => warn!("failed to write offset cache: {e}"),
        }
    }

    Ok(outcome.resolved == outcome.total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_signatures_parse_and_hash() {
        let sigs = builtin_signatures();
        assert!(!sigs.is_empty());
        for sig in &sigs {
            Pattern::parse(sig.pattern)
                .unwrap_or_else(|e| panic!("signature {} has a bad pattern: {e}", sig.name));
        }
        // The hash must be order- and content-sensitive but stable.
        assert_eq!(signature_hash(&sigs), signature_hash(&sigs));
    }
}
