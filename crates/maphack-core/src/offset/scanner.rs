use tracing::{trace, warn};

use crate::error::{Error, Result};

use super::{ImageSections, OffsetStrategy, Pattern, SignatureDef};

/// Tally of a full scan.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanOutcome {
    pub total: usize,
    pub resolved: usize,
}

/// Scan the image's executable sections for every signature and fill the
/// matching slots. A signature resolves only when it matches exactly once
/// across all executable sections; misses and ambiguities are logged and the
/// slot is left empty.
pub fn scan(image: &ImageSections, signatures: &[SignatureDef]) -> Result<ScanOutcome> {
    let mut outcome = ScanOutcome {
        total: signatures.len(),
        ..Default::default()
    };

    for sig in signatures {
        match resolve_signature(image, sig)? {
            Ok(target) => {
                trace!("{} -> {target:#x}", sig.name);
                sig.slot.set(target);
                outcome.resolved += 1;
            }
            Err(e) => warn!("{e}"),
        }
    }

    Ok(outcome)
}

/// Resolve one signature. The inner error is the non-fatal per-signature
/// verdict; the outer one is a malformed pattern, which aborts the scan.
fn resolve_signature(
    image: &ImageSections,
    sig: &SignatureDef,
) -> Result<std::result::Result<u64, Error>> {
    let pattern = Pattern::parse(sig.pattern)?;
    let mut hits: Vec<u64> = Vec::new();
    for section in image.executable() {
        for at in pattern.find_all_in(&section.data) {
            let match_addr = image.base + section.rva + at as u64;
            match resolve(&pattern, &section.data, at, match_addr, sig.strategy) {
                Some(target) => hits.push(target),
                None => warn!("{}: capture out of bounds at {match_addr:#x}", sig.name),
            }
        }
    }

    Ok(match hits.as_slice() {
        [] => Err(Error::NotFound(sig.name.to_owned())),
        [target] => Ok(*target),
        many => Err(Error::Ambiguous {
            name: sig.name.to_owned(),
            matches: many.len(),
        }),
    })
}

fn resolve(
    pattern: &Pattern,
    data: &[u8],
    at: usize,
    match_addr: u64,
    strategy: OffsetStrategy,
) -> Option<u64> {
    let capture = pattern.capture(data, at)?;
    let capture_addr = match_addr + pattern.capture_offset() as u64;
    match strategy {
        OffsetStrategy::Relative32Add => {
            Some(capture_addr.wrapping_add(4).wrapping_add(capture as i64 as u64))
        }
        OffsetStrategy::Absolute => Some(capture as u32 as u64),
        OffsetStrategy::MatchStart => Some(match_addr),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offset::{ImageSections, OffsetSlot, Section};

    const BASE: u64 = 0x1_4000_0000;

    fn image(text: Vec<u8>) -> ImageSections {
        ImageSections::new(
            BASE,
            vec![Section {
                name: ".text".into(),
                rva: 0x1000,
                executable: true,
                data: text,
            }],
        )
    }

    fn sig(slot: &'static OffsetSlot, pattern: &'static str, strategy: OffsetStrategy) -> SignatureDef {
        SignatureDef {
            name: slot.name(),
            pattern,
            strategy,
            slot,
        }
    }

    #[test]
    fn test_relative32_resolution() {
        static SLOT: OffsetSlot = OffsetSlot::new("rel32");
        let mut text = vec![0u8; 256];
        // mov rax, [rip+0x20] at rva 0x1010
        text[0x10..0x13].copy_from_slice(&[0x48, 0x8B, 0x05]);
        text[0x13..0x17].copy_from_slice(&0x20_i32.to_le_bytes());
        text[0x17] = 0xC3;

        let sigs = [sig(&SLOT, "48 8B 05 ^ ? ? ? C3", OffsetStrategy::Relative32Add)];
        let outcome = scan(&image(text), &sigs).unwrap();
        assert_eq!(outcome.resolved, 1);
        // next-instruction address + displacement
        assert_eq!(SLOT.get(), Some(BASE + 0x1017 + 0x20));
    }

    #[test]
    fn test_relative32_negative_displacement() {
        static SLOT: OffsetSlot = OffsetSlot::new("rel32neg");
        let mut text = vec![0u8; 256];
        text[0x80..0x83].copy_from_slice(&[0x48, 0x8B, 0x05]);
        text[0x83..0x87].copy_from_slice(&(-0x40_i32).to_le_bytes());
        text[0x87] = 0xCC;

        let sigs = [sig(&SLOT, "48 8B 05 ^ ? ? ? CC", OffsetStrategy::Relative32Add)];
        scan(&image(text), &sigs).unwrap();
        assert_eq!(SLOT.get(), Some(BASE + 0x1087 - 0x40));
    }

    #[test]
    fn test_match_start_resolution() {
        static SLOT: OffsetSlot = OffsetSlot::new("prologue");
        let mut text = vec![0u8; 64];
        text[0x20..0x24].copy_from_slice(&[0x53, 0x55, 0x56, 0x57]);

        let sigs = [sig(&SLOT, "53 55 56 57 ^ ? ? ?", OffsetStrategy::MatchStart)];
        scan(&image(text), &sigs).unwrap();
        assert_eq!(SLOT.get(), Some(BASE + 0x1020));
    }

    #[test]
    fn test_ambiguous_match_leaves_slot_empty() {
        static SLOT: OffsetSlot = OffsetSlot::new("ambiguous");
        let mut text = vec![0u8; 64];
        text[0x08] = 0xE9;
        text[0x20] = 0xE9;

        let sigs = [sig(&SLOT, "E9 ^ ? ? ?", OffsetStrategy::Relative32Add)];
        let outcome = scan(&image(text), &sigs).unwrap();
        assert_eq!(outcome.resolved, 0);
        assert_eq!(SLOT.get(), None);
    }

    #[test]
    fn test_miss_leaves_slot_empty() {
        static SLOT: OffsetSlot = OffsetSlot::new("missing");
        let sigs = [sig(&SLOT, "DE AD BE EF ^ ? ? ?", OffsetStrategy::Relative32Add)];
        let outcome = scan(&image(vec![0u8; 64]), &sigs).unwrap();
        assert_eq!(outcome.total, 1);
        assert_eq!(outcome.resolved, 0);
        assert_eq!(SLOT.get(), None);
    }

    #[test]
    fn test_resolution_verdict_kinds() {
        static MISS: OffsetSlot = OffsetSlot::new("verdict_miss");
        static DUP: OffsetSlot = OffsetSlot::new("verdict_dup");
        let mut text = vec![0u8; 64];
        text[0x08] = 0xE9;
        text[0x20] = 0xE9;
        let image = image(text);

        let miss = sig(&MISS, "DE AD BE EF ^ ? ? ?", OffsetStrategy::Relative32Add);
        let verdict = resolve_signature(&image, &miss).unwrap();
        assert!(matches!(verdict, Err(crate::Error::NotFound(_))));

        let dup = sig(&DUP, "E9 ^ ? ? ?", OffsetStrategy::Relative32Add);
        let verdict = resolve_signature(&image, &dup).unwrap();
        assert!(matches!(
            verdict,
            Err(crate::Error::Ambiguous { matches: 2, .. })
        ));
    }

    #[test]
    fn test_non_executable_sections_ignored() {
        static SLOT: OffsetSlot = OffsetSlot::new("dataonly");
        let mut data = vec![0u8; 64];
        data[0] = 0xE9;
        let image = ImageSections::new(
            BASE,
            vec![Section {
                name: ".data".into(),
                rva: 0x2000,
                executable: false,
                data,
            }],
        );
        let sigs = [sig(&SLOT, "E9 ^ ? ? ?", OffsetStrategy::Relative32Add)];
        let outcome = scan(&image, &sigs).unwrap();
        assert_eq!(outcome.resolved, 0);
    }
}
