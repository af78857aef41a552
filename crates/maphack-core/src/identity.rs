//! Player identity recovery.
//!
//! Player IDs live in an encrypted per-slot table. The decode constants
//! change between host builds, so resolution is layered: a direct scan of
//! the unit table when it contains a single player, the current constants,
//! the known-good bootstrap pair, and finally re-deriving the constants from
//! the host's own decode instructions.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock;
use crate::host::ptr::{try_deref, try_read};
use crate::host::{MAX_PLAYER_SLOTS, UNIT_HASH_BUCKETS, Unit, UnitHashTable};
use crate::offset::ImageSections;
use crate::safety::LogLimiter;

const LEGACY_XOR: u32 = 0x8633_C320;
const LEGACY_ADD: u32 = 0x53D5_CDD3;

/// Byte offset of the table key within the encryption-keys block.
const KEY_OFFSET: u64 = 0x146;

const MAX_CHAIN_TRAVERSAL: usize = 8192;
const DIRECT_SCAN_INTERVAL_MS: u64 = 250;
const RECOVERY_INTERVAL_MS: u64 = 1000;
const CACHE_HIT_WINDOW_MS: u64 = 3000;
const CACHE_COMMIT_HITS: u32 = 3;

/// Resolved host locations the identity layer reads through.
#[derive(Clone, Copy)]
pub struct IdentityHost {
    /// Local player's slot index.
    pub player_unit_index: *const u32,
    /// Array of unit hash tables, indexed by unit type.
    pub unit_hash_tables: *const UnitHashTable,
    /// Pointer to the encryption-keys block base.
    pub encryption_keys: *const u64,
    /// Per-slot encrypted player IDs.
    pub id_table: *const u32,
    /// Host's ID finalization routine.
    pub transform: Option<unsafe extern "C" fn(*mut u32) -> u32>,
}

unsafe impl Send for IdentityHost {}

impl IdentityHost {
    /// Build the host view from resolved offset slots.
    pub fn from_slots() -> crate::Result<Self> {
        use crate::offset::slots;
        Ok(Self {
            player_unit_index: slots::PLAYER_UNIT_INDEX.require()? as *const u32,
            unit_hash_tables: slots::CLIENT_UNIT_HASH_TABLE.require()? as *const UnitHashTable,
            encryption_keys: slots::ENCRYPTION_KEYS.require()? as *const u64,
            id_table: slots::PLAYER_INDEX_TO_ID_ENCRYPTED_TABLE.require()? as *const u32,
            transform: Some(unsafe {
                std::mem::transmute::<usize, unsafe extern "C" fn(*mut u32) -> u32>(
                    slots::ENC_TRANSFORM_VALUE.require()? as usize,
                )
            }),
        })
    }

    pub fn local_slot(&self) -> Option<u32> {
        try_read(self.player_unit_index)
    }
}

/// Walk a unit hash table for `id`, starting at its home bucket.
///
/// The walk continues through later buckets as well; stale tables sometimes
/// hold units off their home bucket and a miss here is worse than the extra
/// scan.
pub fn get_unit(host: &IdentityHost, id: u32, unit_type: u32) -> *mut Unit {
    if unit_type as usize >= UNIT_HASH_BUCKETS {
        return std::ptr::null_mut();
    }
    let Some(table) =
        (unsafe { try_deref(host.unit_hash_tables.add(unit_type as usize)) })
    else {
        return std::ptr::null_mut();
    };

    static TRAVERSAL_LOG: LogLimiter = LogLimiter::new();
    for bucket in table.iter().skip((id & 0x7F) as usize) {
        let mut traversed = 0usize;
        let mut current = *bucket;
        while let Some(unit) = unsafe { try_deref(current.cast_const()) } {
            traversed += 1;
            if traversed > MAX_CHAIN_TRAVERSAL {
                if TRAVERSAL_LOG.should_log(5000) {
                    warn!("unit chain traversal limit hit (type={unit_type}, id={id})");
                }
                break;
            }
            if unit.id == id {
                return current;
            }
            if unit.next == current {
                break;
            }
            current = unit.next;
        }
    }
    std::ptr::null_mut()
}

/// True when the player-type table holds at least one unit.
pub fn has_any_player_units(host: &IdentityHost) -> bool {
    let Some(table) = (unsafe { try_deref(host.unit_hash_tables) }) else {
        return false;
    };
    table.iter().any(|bucket| !bucket.is_null())
}

/// True (with a throttled log) when the host state cannot support invasive
/// calls: missing tables, an out-of-range local slot, or no player units.
pub fn is_unsafe_for_invasive_call(host: &IdentityHost, caller: &'static str) -> bool {
    let unsafe_state = if unsafe { try_deref(host.unit_hash_tables) }.is_none() {
        true
    } else {
        match host.local_slot() {
            None => true,
            Some(slot) if slot >= MAX_PLAYER_SLOTS => true,
            Some(_) => !has_any_player_units(host),
        }
    };
    if unsafe_state {
        static LIMITER: LogLimiter = LogLimiter::new();
        if LIMITER.should_log(5000) {
            warn!("[{caller}] skipping invasive call in unsafe runtime state");
        }
    }
    unsafe_state
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
struct DecodeConstants {
    xor: u32,
    add: u32,
}

#[derive(Default)]
struct CandidateState {
    constants: Option<DecodeConstants>,
    hits: u32,
    last_hit_ms: u64,
    committed: bool,
}

#[derive(Default)]
struct LocalIdentityState {
    cached_id: u32,
    last_scan_ms: u64,
    logged_direct_path: bool,
}

/// Stateful resolver for player identities.
pub struct PlayerIdentity {
    constants: DecodeConstants,
    candidate: CandidateState,
    local: LocalIdentityState,
    last_recovery_ms: u64,
    local_player_observed: bool,
    cache_path: Option<PathBuf>,
}

impl PlayerIdentity {
    /// Start from cached constants when present, the bootstrap pair
    /// otherwise.
    pub fn new(cache_path: Option<PathBuf>) -> Self {
        let mut constants = DecodeConstants {
            xor: LEGACY_XOR,
            add: LEGACY_ADD,
        };
        if let Some(path) = &cache_path {
            match fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<DecodeConstants>(&bytes) {
                    Ok(cached) => {
                        debug!(
                            "loaded cached decode constants (xor={:#010x} add={:#010x})",
                            cached.xor, cached.add
                        );
                        constants = cached;
                    }
                    Err(e) => warn!("ignoring malformed constants cache: {e}"),
                },
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("ignoring unreadable constants cache: {e}"),
            }
        }
        Self {
            constants,
            candidate: CandidateState::default(),
            local: LocalIdentityState::default(),
            last_recovery_ms: 0,
            local_player_observed: false,
            cache_path,
        }
    }

    /// Player ID for `index`, zero when the slot is empty or unresolvable.
    pub fn player_id(
        &mut self,
        host: &IdentityHost,
        index: u32,
        image: Option<&ImageSections>,
    ) -> u32 {
        self.player_id_at(host, index, image, clock::now_ms())
    }

    /// The unit behind [`player_id`](Self::player_id), or null.
    pub fn player_unit(
        &mut self,
        host: &IdentityHost,
        index: u32,
        image: Option<&ImageSections>,
    ) -> *mut Unit {
        let id = self.player_id(host, index, image);
        if id == 0 {
            return std::ptr::null_mut();
        }
        get_unit(host, id, 0)
    }

    fn player_id_at(
        &mut self,
        host: &IdentityHost,
        index: u32,
        image: Option<&ImageSections>,
        now: u64,
    ) -> u32 {
        if index >= MAX_PLAYER_SLOTS {
            return 0;
        }

        let is_local_slot = host.local_slot() == Some(index);
        if !is_local_slot || unsafe { try_deref(host.unit_hash_tables) }.is_none() {
            return decode_with(host, index, self.constants).unwrap_or(0);
        }

        if let Some(direct) = self.direct_local_id(host, now) {
            self.local_player_observed = true;
            return direct;
        }

        let id = decode_with(host, index, self.constants).unwrap_or(0);
        if id != 0 && !get_unit(host, id, 0).is_null() {
            self.local_player_observed = true;
            self.remember_local_id(id);
            return id;
        }

        let legacy = DecodeConstants {
            xor: LEGACY_XOR,
            add: LEGACY_ADD,
        };
        let legacy_id = decode_with(host, index, legacy).unwrap_or(0);
        if legacy_id != 0 && !get_unit(host, legacy_id, 0).is_null() {
            self.local_player_observed = true;
            self.remember_local_id(legacy_id);
            if self.constants != legacy {
                warn!(
                    "decode constants failed validation (xor={:#010x} add={:#010x}), \
                     reverting to bootstrap pair",
                    self.constants.xor, self.constants.add
                );
                self.constants = legacy;
            }
            return legacy_id;
        }

        // Player units are transiently absent during loading and teardown;
        // skip expensive recovery there and once a local player has already
        // been observed this session.
        let has_units = has_any_player_units(host);
        if self.local_player_observed || !has_units {
            if !has_units {
                self.local.cached_id = 0;
            }
            return 0;
        }

        if self.last_recovery_ms == 0
            || now.wrapping_sub(self.last_recovery_ms) >= RECOVERY_INTERVAL_MS
        {
            self.last_recovery_ms = now.max(1);
            if let Some(image) = image
                && let Some(recovered) = self.recover_constants(host, index, image, now)
            {
                self.remember_local_id(recovered);
                return recovered;
            }
        }

        0
    }

    fn remember_local_id(&mut self, id: u32) {
        if id != 0 {
            self.local.cached_id = id;
        }
    }

    /// Fast path: the cached local ID while it stays resolvable, otherwise a
    /// throttled scan for a unit table holding exactly one player identity.
    fn direct_local_id(&mut self, host: &IdentityHost, now: u64) -> Option<u32> {
        if self.local.cached_id != 0 {
            if !get_unit(host, self.local.cached_id, 0).is_null() {
                return Some(self.local.cached_id);
            }
            self.local.cached_id = 0;
        }

        // last_scan_ms of zero means no scan has run yet.
        if self.local.last_scan_ms != 0
            && now.wrapping_sub(self.local.last_scan_ms) < DIRECT_SCAN_INTERVAL_MS
        {
            return None;
        }
        self.local.last_scan_ms = now.max(1);

        let direct = resolve_single_player_id(host)?;
        if get_unit(host, direct, 0).is_null() {
            return None;
        }
        self.local.cached_id = direct;
        if !self.local.logged_direct_path {
            self.local.logged_direct_path = true;
            info!("using direct local-player identity path");
        }
        Some(direct)
    }

    /// Two-pass scan of executable sections for the xor/add immediates in
    /// the host's own decode sequence. Candidates are validated by decoding
    /// and resolving a live unit before they are adopted.
    fn recover_constants(
        &mut self,
        host: &IdentityHost,
        index: u32,
        image: &ImageSections,
        now: u64,
    ) -> Option<u32> {
        let mut seen = fxhash::FxHashSet::default();
        let mut try_candidate = |me: &mut Self, pair: DecodeConstants, source: &str| {
            if !seen.insert((u64::from(pair.xor) << 32) | u64::from(pair.add)) {
                return None;
            }
            let id = decode_with(host, index, pair)?;
            if id == 0 || get_unit(host, id, 0).is_null() {
                return None;
            }
            me.constants = pair;
            me.observe_candidate(pair, now);
            info!(
                "recovered decode constants from {source} candidate \
                 (xor={:#010x} add={:#010x})",
                pair.xor, pair.add
            );
            Some(id)
        };

        // xor imm32 / add imm32 / rol eax,9 / rol eax,7
        for section in image.executable() {
            let data = &section.data;
            for at in memchr::memchr_iter(0x35, data) {
                let Some(window) = data.get(at..at + 16) else {
                    continue;
                };
                if window[5] != 0x05
                    || window[10] != 0xC1
                    || window[11] != 0xC0
                    || window[12] != 0x09
                    || window[13] != 0xC1
                    || window[14] != 0xC0
                    || window[15] != 0x07
                {
                    continue;
                }
                let pair = candidate_at(window);
                if let Some(id) = try_candidate(self, pair, "strict") {
                    return Some(id);
                }
            }
        }

        for section in image.executable() {
            let data = &section.data;
            for at in memchr::memchr_iter(0x35, data) {
                let Some(window) = data.get(at..at + 12) else {
                    continue;
                };
                if window[5] != 0x05 || window[10] != 0xC1 || window[11] != 0xC0 {
                    continue;
                }
                let pair = candidate_at(window);
                if let Some(id) = try_candidate(self, pair, "relaxed") {
                    return Some(id);
                }
            }
        }

        None
    }

    /// Track consecutive validations of a recovered pair; commit it to the
    /// on-disk cache once it has held up a few times in a row.
    fn observe_candidate(&mut self, pair: DecodeConstants, now: u64) {
        let same = self.candidate.constants == Some(pair)
            && now.wrapping_sub(self.candidate.last_hit_ms) <= CACHE_HIT_WINDOW_MS;
        if same {
            self.candidate.hits += 1;
        } else {
            self.candidate.constants = Some(pair);
            self.candidate.hits = 1;
            self.candidate.committed = false;
        }
        self.candidate.last_hit_ms = now;

        if !self.candidate.committed && self.candidate.hits >= CACHE_COMMIT_HITS {
            self.candidate.committed = true;
            if let Some(path) = &self.cache_path {
                match serde_json::to_vec_pretty(&pair).map(|bytes| fs::write(path, bytes)) {
                    Ok(Ok(())) => {
                        info!("cached validated decode constants after {CACHE_COMMIT_HITS} confirmations")
                    }
                    Ok(Err(e)) => warn!("failed to write constants cache: {e}"),
                    Err(e) => warn!("failed to encode constants cache: {e}"),
                }
            }
        }
    }
}

fn candidate_at(window: &[u8]) -> DecodeConstants {
    DecodeConstants {
        xor: u32::from_le_bytes([window[1], window[2], window[3], window[4]]),
        add: u32::from_le_bytes([window[6], window[7], window[8], window[9]]),
    }
}

/// Decode the slot's encrypted ID with a specific constants pair. `None`
/// when any host pointer is unreadable.
fn decode_with(host: &IdentityHost, index: u32, constants: DecodeConstants) -> Option<u32> {
    let transform = host.transform?;
    let keys_base = try_read(host.encryption_keys)?;
    if keys_base == 0 {
        return None;
    }
    let key: u32 = try_read((keys_base + KEY_OFFSET) as *const u32)?;
    let encrypted: u32 = try_read(unsafe { host.id_table.add(index as usize) })?;

    let temp = (encrypted ^ key ^ constants.xor).wrapping_add(constants.add);
    let mut v = temp.rotate_left(9).rotate_left(7);
    let id = unsafe { transform(&mut v) };
    Some(if id == u32::MAX { 0 } else { id })
}

/// Scan the player-type table; `Some(id)` when every unit in it shares one
/// nonzero ID.
fn resolve_single_player_id(host: &IdentityHost) -> Option<u32> {
    let table = unsafe { try_deref(host.unit_hash_tables) }?;
    let mut single: Option<u32> = None;
    for bucket in table.iter() {
        let mut traversed = 0usize;
        let mut current = *bucket;
        while let Some(unit) = unsafe { try_deref(current.cast_const()) } {
            traversed += 1;
            if traversed > MAX_CHAIN_TRAVERSAL {
                break;
            }
            if unit.id != 0 {
                match single {
                    None => single = Some(unit.id),
                    Some(existing) if existing != unit.id => return None,
                    Some(_) => {}
                }
            }
            if unit.next == current {
                break;
            }
            current = unit.next;
        }
    }
    single
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offset::Section;
    use std::mem::MaybeUninit;

    unsafe extern "C" fn identity_transform(v: *mut u32) -> u32 {
        unsafe { *v }
    }

    fn blank_unit(id: u32) -> Box<Unit> {
        // Units are plain data; zero-fill and set what the walk reads.
        let mut unit: Box<Unit> = unsafe { Box::new(MaybeUninit::zeroed().assume_init()) };
        unit.id = id;
        unit
    }

    struct Fixture {
        tables: Box<[UnitHashTable; 2]>,
        units: Vec<Box<Unit>>,
        player_index: Box<u32>,
        keys_block: Box<[u8; 0x200]>,
        keys_base: Box<u64>,
        id_table: Box<[u32; 8]>,
    }

    const KEY: u32 = 0xCAFE_1234;

    impl Fixture {
        fn new() -> Self {
            let mut keys_block = Box::new([0u8; 0x200]);
            keys_block[KEY_OFFSET as usize..KEY_OFFSET as usize + 4]
                .copy_from_slice(&KEY.to_le_bytes());
            let keys_base = Box::new(keys_block.as_ptr() as u64);
            Self {
                tables: Box::new([[std::ptr::null_mut(); UNIT_HASH_BUCKETS]; 2]),
                units: Vec::new(),
                player_index: Box::new(0),
                keys_block,
                keys_base,
                id_table: Box::new([0; 8]),
            }
        }

        fn add_player(&mut self, id: u32) -> *mut Unit {
            let mut unit = blank_unit(id);
            let ptr: *mut Unit = &mut *unit;
            let bucket = (id & 0x7F) as usize;
            unit.next = self.tables[0][bucket];
            self.tables[0][bucket] = ptr;
            self.units.push(unit);
            ptr
        }

        fn encode(&mut self, index: usize, id: u32, constants: DecodeConstants) {
            // Inverse of the decode chain.
            let temp = id.rotate_right(16);
            self.id_table[index] = temp.wrapping_sub(constants.add) ^ constants.xor ^ KEY;
        }

        fn host(&self) -> IdentityHost {
            IdentityHost {
                player_unit_index: &*self.player_index,
                unit_hash_tables: self.tables.as_ptr(),
                encryption_keys: &*self.keys_base,
                id_table: self.id_table.as_ptr(),
                transform: Some(identity_transform),
            }
        }
    }

    const CURRENT: DecodeConstants = DecodeConstants {
        xor: 0x1111_2222,
        add: 0x3333_4444,
    };
    const LEGACY: DecodeConstants = DecodeConstants {
        xor: LEGACY_XOR,
        add: LEGACY_ADD,
    };

    #[test]
    fn test_get_unit_finds_by_bucket() {
        let mut fx = Fixture::new();
        let a = fx.add_player(0x81);
        let b = fx.add_player(0x101);
        let host = fx.host();
        // Both hash to bucket 1; the chain walk must distinguish them.
        assert_eq!(get_unit(&host, 0x81, 0), a);
        assert_eq!(get_unit(&host, 0x101, 0), b);
        assert!(get_unit(&host, 0x555, 0).is_null());
        assert!(get_unit(&host, 0x81, 999).is_null());
    }

    #[test]
    fn test_get_unit_self_link_terminates() {
        let mut fx = Fixture::new();
        let a = fx.add_player(7);
        unsafe { (*a).next = a };
        let host = fx.host();
        assert!(get_unit(&host, 8, 0).is_null());
        assert_eq!(get_unit(&host, 7, 0), a);
    }

    #[test]
    fn test_has_any_player_units() {
        let mut fx = Fixture::new();
        let host = fx.host();
        assert!(!has_any_player_units(&host));
        fx.add_player(1);
        assert!(has_any_player_units(&fx.host()));
    }

    #[test]
    fn test_unsafe_state_checks() {
        let mut fx = Fixture::new();
        fx.add_player(1);
        assert!(!is_unsafe_for_invasive_call(&fx.host(), "test"));

        *fx.player_index = 9;
        assert!(is_unsafe_for_invasive_call(&fx.host(), "test"));
        *fx.player_index = 0;

        let mut host = fx.host();
        host.unit_hash_tables = std::ptr::null();
        assert!(is_unsafe_for_invasive_call(&host, "test"));
    }

    #[test]
    fn test_decode_round_trip() {
        let mut fx = Fixture::new();
        fx.encode(2, 0xABCD, CURRENT);
        let host = fx.host();
        assert_eq!(decode_with(&host, 2, CURRENT), Some(0xABCD));
        // Wrong constants produce garbage but not an error.
        assert_ne!(decode_with(&host, 2, LEGACY), Some(0xABCD));
    }

    #[test]
    fn test_decode_maps_sentinel_to_zero() {
        let mut fx = Fixture::new();
        fx.encode(0, u32::MAX, CURRENT);
        assert_eq!(decode_with(&fx.host(), 0, CURRENT), Some(0));
    }

    #[test]
    fn test_resolve_single_player_id() {
        let mut fx = Fixture::new();
        assert_eq!(resolve_single_player_id(&fx.host()), None);
        fx.add_player(42);
        assert_eq!(resolve_single_player_id(&fx.host()), Some(42));
        fx.add_player(43);
        assert_eq!(resolve_single_player_id(&fx.host()), None);
    }

    #[test]
    fn test_player_id_non_local_uses_current_constants() {
        let mut fx = Fixture::new();
        *fx.player_index = 0;
        fx.encode(3, 0x1234, LEGACY);
        let host = fx.host();
        let mut identity = PlayerIdentity::new(None);
        assert_eq!(identity.player_id_at(&host, 3, None, 0), 0x1234);
        assert_eq!(identity.player_id_at(&host, 99, None, 0), 0);
    }

    #[test]
    fn test_player_id_local_direct_path() {
        let mut fx = Fixture::new();
        fx.add_player(77);
        let host = fx.host();
        let mut identity = PlayerIdentity::new(None);
        assert_eq!(identity.player_id_at(&host, 0, None, 1000), 77);
        // Cached afterwards, no rescan needed.
        assert_eq!(identity.player_id_at(&host, 0, None, 1001), 77);
    }

    #[test]
    fn test_player_id_local_falls_back_to_legacy_and_reverts() {
        let mut fx = Fixture::new();
        fx.add_player(5);
        fx.add_player(6); // two players defeat the direct path
        fx.encode(0, 5, LEGACY);
        let host = fx.host();

        let mut identity = PlayerIdentity::new(None);
        identity.constants = CURRENT;
        assert_eq!(identity.player_id_at(&host, 0, None, 0), 5);
        assert_eq!(identity.constants, LEGACY);
    }

    #[test]
    fn test_recovery_from_image_scan() {
        let mut fx = Fixture::new();
        fx.add_player(0x99);
        fx.add_player(0x9A); // defeat the direct path
        let recovered = DecodeConstants {
            xor: 0xDEAD_0001,
            add: 0xBEEF_0002,
        };
        fx.encode(0, 0x99, recovered);
        let host = fx.host();

        // xor eax, imm32 / add eax, imm32 / rol eax, 9 / rol eax, 7
        let mut text = vec![0x90u8; 64];
        text[20] = 0x35;
        text[21..25].copy_from_slice(&recovered.xor.to_le_bytes());
        text[25] = 0x05;
        text[26..30].copy_from_slice(&recovered.add.to_le_bytes());
        text[30..36].copy_from_slice(&[0xC1, 0xC0, 0x09, 0xC1, 0xC0, 0x07]);
        let image = ImageSections::new(
            0x1_4000_0000,
            vec![Section {
                name: ".text".into(),
                rva: 0x1000,
                executable: true,
                data: text,
            }],
        );

        let mut identity = PlayerIdentity::new(None);
        identity.constants = CURRENT; // wrong on purpose
        let id = identity.player_id_at(&host, 0, Some(&image), 5000);
        assert_eq!(id, 0x99);
        assert_eq!(identity.constants, recovered);
    }

    #[test]
    fn test_recovery_attempts_are_throttled() {
        let mut fx = Fixture::new();
        fx.add_player(0x10);
        fx.add_player(0x11);
        let host = fx.host();
        let mut identity = PlayerIdentity::new(None);
        identity.constants = CURRENT;
        identity.last_recovery_ms = 10_000;
        // No image provided; what matters is that the attempt timestamp
        // gates re-entry.
        assert_eq!(identity.player_id_at(&host, 0, None, 10_500), 0);
        assert_eq!(identity.last_recovery_ms, 10_000);
        assert_eq!(identity.player_id_at(&host, 0, None, 11_000), 0);
        assert_eq!(identity.last_recovery_ms, 11_000);
    }

    #[test]
    fn test_constants_cache_commit_after_three_hits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("constants.json");
        let pair = DecodeConstants {
            xor: 0xA,
            add: 0xB,
        };

        let mut identity = PlayerIdentity::new(Some(path.clone()));
        identity.observe_candidate(pair, 100);
        identity.observe_candidate(pair, 200);
        assert!(!path.exists());
        identity.observe_candidate(pair, 300);
        assert!(path.exists());

        let reloaded = PlayerIdentity::new(Some(path));
        assert_eq!(reloaded.constants, pair);
    }

    #[test]
    fn test_candidate_streak_resets_outside_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("constants.json");
        let pair = DecodeConstants { xor: 1, add: 2 };

        let mut identity = PlayerIdentity::new(Some(path.clone()));
        identity.observe_candidate(pair, 0);
        identity.observe_candidate(pair, CACHE_HIT_WINDOW_MS + 1000);
        identity.observe_candidate(pair, CACHE_HIT_WINDOW_MS + 1100);
        assert!(!path.exists());
    }
}
