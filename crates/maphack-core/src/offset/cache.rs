use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::SignatureDef;

const MAGIC: [u8; 4] = *b"MHOC";
const VERSION: u32 = 1;

/// On-disk cache of resolved offsets, stored relative to the image base so
/// entries survive ASLR.
///
/// Layout (all integers little-endian):
/// ```text
/// magic "MHOC" | version u32 | exe_hash u64 | signature_hash u32
/// entry_count u32 | entries: name_len u16, name utf-8, offset u64
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetCache {
    pub exe_hash: u64,
    pub signature_hash: u32,
    pub entries: Vec<(String, u64)>,
}

impl OffsetCache {
    /// Capture the current slot values as base-relative offsets. Unresolved
    /// slots are skipped; [`apply`](Self::apply) will refuse such a cache.
    pub fn build(exe_hash: u64, signature_hash: u32, base: u64, signatures: &[SignatureDef]) -> Self {
        let entries = signatures
            .iter()
            .filter_map(|sig| {
                let address = sig.slot.get()?;
                Some((sig.name.to_owned(), address.wrapping_sub(base)))
            })
            .collect();
        Self {
            exe_hash,
            signature_hash,
            entries,
        }
    }

    /// Rebase the cached offsets onto `base` and fill the slots.
    ///
    /// Returns `false` without touching any slot if the cache does not cover
    /// every signature, names an unknown signature, or carries a null offset.
    pub fn apply(&self, base: u64, signatures: &[SignatureDef]) -> bool {
        for (name, _) in &self.entries {
            if !signatures.iter().any(|s| s.name == name) {
                warn!("cache names unknown signature {name}");
                return false;
            }
        }
        let mut resolved = Vec::with_capacity(signatures.len());
        for sig in signatures {
            let Some((_, offset)) = self.entries.iter().find(|(name, _)| name == sig.name) else {
                debug!("cache is missing {}", sig.name);
                return false;
            };
            if *offset == 0 {
                debug!("cache has a null offset for {}", sig.name);
                return false;
            }
            resolved.push((sig.slot, base.wrapping_add(*offset)));
        }
        for (slot, address) in resolved {
            slot.set(address);
        }
        true
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(24 + self.entries.len() * 32);
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&self.exe_hash.to_le_bytes());
        out.extend_from_slice(&self.signature_hash.to_le_bytes());
        out.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for (name, offset) in &self.entries {
            out.extend_from_slice(&(name.len() as u16).to_le_bytes());
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(&offset.to_le_bytes());
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor { bytes, at: 0 };
        let reject = |message: &str| Error::CacheRejected(message.to_owned());

        if cursor.take(4)? != MAGIC {
            return Err(reject("bad magic"));
        }
        if cursor.u32()? != VERSION {
            return Err(reject("unsupported version"));
        }
        let exe_hash = cursor.u64()?;
        let signature_hash = cursor.u32()?;
        let entry_count = cursor.u32()? as usize;

        let mut entries = Vec::with_capacity(entry_count.min(1024));
        for _ in 0..entry_count {
            let name_len = cursor.u16()? as usize;
            let name = std::str::from_utf8(cursor.take(name_len)?)
                .map_err(|_| reject("entry name is not UTF-8"))?
                .to_owned();
            let offset = cursor.u64()?;
            entries.push((name, offset));
        }
        if cursor.at != bytes.len() {
            return Err(reject("trailing bytes"));
        }

        Ok(Self {
            exe_hash,
            signature_hash,
            entries,
        })
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        Self::decode(&bytes)
    }

    /// Write via a sibling temp file and rename, so readers never observe a
    /// half-written cache.
    pub fn write_atomic(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, self.encode())?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    at: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .at
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| Error::CacheRejected("truncated".to_owned()))?;
        let slice = &self.bytes[self.at..end];
        self.at = end;
        Ok(slice)
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }
}

/// Content hash of the running executable, or `None` when it cannot be read.
pub fn exe_hash() -> Option<u64> {
    let path = std::env::current_exe().ok()?;
    let bytes = fs::read(path).ok()?;
    Some(fxhash::hash64(&bytes))
}

/// Cache file path for a given executable hash.
pub fn cache_path(dir: &Path, exe_hash: u64) -> PathBuf {
    dir.join(format!("offsets-{exe_hash:016x}.bin"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offset::{OffsetSlot, OffsetStrategy};

    fn sig(slot: &'static OffsetSlot) -> SignatureDef {
        SignatureDef {
            name: slot.name(),
            pattern: "E8 ^ ? ? ?",
            strategy: OffsetStrategy::Relative32Add,
            slot,
        }
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let cache = OffsetCache {
            exe_hash: 0xDEAD_BEEF_CAFE_F00D,
            signature_hash: 0x1234_5678,
            entries: vec![("Alpha".into(), 0x1000), ("Beta".into(), 0x2F40)],
        };
        let decoded = OffsetCache::decode(&cache.encode()).unwrap();
        assert_eq!(decoded, cache);
    }

    #[test]
    fn test_decode_rejects_bad_magic() {
        let mut bytes = OffsetCache {
            exe_hash: 0,
            signature_hash: 0,
            entries: vec![],
        }
        .encode();
        bytes[0] = b'X';
        assert!(OffsetCache::decode(&bytes).is_err());
    }

    #[test]
    fn test_decode_rejects_truncation() {
        let bytes = OffsetCache {
            exe_hash: 1,
            signature_hash: 2,
            entries: vec![("Gamma".into(), 3)],
        }
        .encode();
        for len in 0..bytes.len() {
            assert!(OffsetCache::decode(&bytes[..len]).is_err(), "len {len}");
        }
    }

    #[test]
    fn test_build_and_apply_rebases() {
        static A: OffsetSlot = OffsetSlot::new("CacheA");
        static B: OffsetSlot = OffsetSlot::new("CacheB");
        let sigs = [sig(&A), sig(&B)];

        A.set(0x1_4000_1000);
        B.set(0x1_4000_2F40);
        let cache = OffsetCache::build(7, 9, 0x1_4000_0000, &sigs);
        A.clear();
        B.clear();

        assert!(cache.apply(0x2_0000_0000, &sigs));
        assert_eq!(A.get(), Some(0x2_0000_1000));
        assert_eq!(B.get(), Some(0x2_0000_2F40));
    }

    #[test]
    fn test_apply_refuses_incomplete_cache() {
        static C: OffsetSlot = OffsetSlot::new("CacheC");
        static D: OffsetSlot = OffsetSlot::new("CacheD");
        let sigs = [sig(&C), sig(&D)];

        let cache = OffsetCache {
            exe_hash: 0,
            signature_hash: 0,
            entries: vec![("CacheC".into(), 0x10)],
        };
        assert!(!cache.apply(0x1000, &sigs));
        assert_eq!(C.get(), None);
        assert_eq!(D.get(), None);
    }

    #[test]
    fn test_apply_refuses_unknown_name() {
        static E: OffsetSlot = OffsetSlot::new("CacheE");
        let sigs = [sig(&E)];
        let cache = OffsetCache {
            exe_hash: 0,
            signature_hash: 0,
            entries: vec![("CacheE".into(), 0x10), ("Ghost".into(), 0x20)],
        };
        assert!(!cache.apply(0x1000, &sigs));
    }

    #[test]
    fn test_apply_refuses_null_offset() {
        static F: OffsetSlot = OffsetSlot::new("CacheF");
        let sigs = [sig(&F)];
        let cache = OffsetCache {
            exe_hash: 0,
            signature_hash: 0,
            entries: vec![("CacheF".into(), 0)],
        };
        assert!(!cache.apply(0x1000, &sigs));
    }

    #[test]
    fn test_write_atomic_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = cache_path(dir.path(), 0xABCD);
        let cache = OffsetCache {
            exe_hash: 0xABCD,
            signature_hash: 42,
            entries: vec![("Delta".into(), 0x7F0)],
        };
        cache.write_atomic(&path).unwrap();
        assert_eq!(OffsetCache::read_from(&path).unwrap(), cache);
    }

    #[test]
    fn test_read_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = OffsetCache::read_from(&cache_path(dir.path(), 1)).unwrap_err();
        assert!(err.is_not_found());
    }
}
