use std::hash::Hasher;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};

/// How a pattern match is turned into an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
pub enum OffsetStrategy {
    /// The capture is a RIP-relative displacement: the target is the address
    /// just past the 4 captured bytes plus the sign-extended capture.
    Relative32Add,
    /// The capture is the low 32 bits of an absolute pointer.
    Absolute,
    /// The match start itself is the target; the capture is ignored.
    MatchStart,
}

/// A resolved-address slot, written once by the scanner or cache loader and
/// read by the rest of the crate.
pub struct OffsetSlot {
    name: &'static str,
    address: AtomicU64,
}

impl OffsetSlot {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            address: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn get(&self) -> Option<u64> {
        match self.address.load(Ordering::Acquire) {
            0 => None,
            addr => Some(addr),
        }
    }

    /// Like [`get`](Self::get) but with a named error for logging.
    pub fn require(&self) -> Result<u64> {
        self.get().ok_or(Error::Unresolved(self.name))
    }

    pub fn set(&self, address: u64) {
        self.address.store(address, Ordering::Release);
    }

    pub fn clear(&self) {
        self.address.store(0, Ordering::Release);
    }

    /// Resolved address as a typed pointer.
    pub fn as_ptr<T>(&self) -> Result<*mut T> {
        Ok(self.require()? as *mut T)
    }
}

/// A signature: a named pattern plus the strategy to decode its match.
#[derive(Clone, Copy)]
pub struct SignatureDef {
    pub name: &'static str,
    pub pattern: &'static str,
    pub strategy: OffsetStrategy,
    pub slot: &'static OffsetSlot,
}

macro_rules! offset_registry {
    ($( $slot:ident, $name:literal, $pattern:literal, $strategy:ident; )*) => {
        pub mod slots {
            use super::OffsetSlot;
            $( pub static $slot: OffsetSlot = OffsetSlot::new($name); )*
        }

        /// Every signature the crate knows how to resolve.
        pub fn builtin_signatures() -> Vec<SignatureDef> {
            vec![
                $( SignatureDef {
                    name: $name,
                    pattern: $pattern,
                    strategy: OffsetStrategy::$strategy,
                    slot: &slots::$slot,
                }, )*
            ]
        }
    };
}

// Function-prologue signatures have no displacement to capture, so they end
// in a throwaway `^ ? ? ?` window and resolve to the match start.
offset_registry! {
    GAME_ALLOCATOR, "GameAllocator", "48 8B 0D ^ ? ? ? 8B F8 48 85 C9", Relative32Add;
    BC_ALLOCATOR, "BcAllocator", "E8 ^ ? ? ? 33 DB 48 89 05", Relative32Add;
    RET_CHECK_DATA, "RetCheckData", "48 8B 05 ^ ? ? ? 41 80 F0", Relative32Add;

    DRLG_ALLOC_LEVEL, "DRLG_AllocLevel", "E8 ^ ? ? ? 48 8B D8 83 3B", Relative32Add;
    DRLG_INIT_LEVEL, "DRLG_InitLevel", "E8 ^ ? ? ? 44 8B 8C 24 ? ? ? ? 41 83 F9", Relative32Add;
    ROOMS_ADD_ROOM_DATA, "ROOMS_AddRoomData", "E8 ^ ? ? ? 49 BB ? ? ? ? ? ? ? ? FF C6", Relative32Add;
    GET_LEVEL_DEF, "GetLevelDef", "E8 ^ ? ? ? 44 0F B6 90", Relative32Add;
    AUTOMAP_LAYER_LINK, "AutomapLayerLink", "48 8B 05 ^ ? ? ? 49 89 86", Relative32Add;
    CURRENT_AUTOMAP_LAYER, "CurrentAutomapLayer", "48 8B 05 ^ ? ? ? 8B 08", Relative32Add;
    AUTOMAP_NEW_AUTOMAP_CELL, "AUTOMAP_NewAutomapCell", "E8 ^ ? ? ? 48 8B 75 ? 48 85 F6 0F 84 ? ? ? ? E8 ? ? ? ? 8D 57", Relative32Add;
    AUTOMAP_ADD_AUTOMAP_CELL, "AUTOMAP_AddAutomapCell", "E8 ^ ? ? ? 4D 89 1F", Relative32Add;

    WIDGET_GET_SCALED_POSITION, "Widget_GetScaledPosition", "E8 ^ ? ? ? 8B 10 8B 48", Relative32Add;
    WIDGET_GET_SCALED_SIZE, "Widget_GetScaledSize", "E8 ^ ? ? ? 41 3B F3", Relative32Add;
    PANEL_MANAGER_GET_SCREEN_SIZE_X, "PanelManager_GetScreenSizeX", "E8 ^ ? ? ? 0F 57 C0 0F 57 FF", Relative32Add;
    PANEL_MANAGER, "PanelManager", "0F 84 ? ? ? ? 48 8B 05 ^ ? ? ? 0F 57 C9", Relative32Add;
    AUTOMAP_PANEL_GET_MODE, "AutoMapPanel_GetMode", "E8 ^ ? ? ? 83 F8 ? 75 ? 33 D2 48 8B CF", Relative32Add;
    AUTOMAP_PANEL_CREATE_AUTOMAP_DATA, "AutoMapPanel_CreateAutoMapData", "4C 89 44 24 ? 53 55 56 57 41 54 41 56 ^ ? ? ?", MatchStart;
    AUTOMAP_PANEL_PRECISION_TO_AUTOMAP, "AutoMapPanel_PrecisionToAutomap", "48 89 5C 24 ? 55 56 57 48 8B EC 48 83 EC ? 49 8B D8 ^ ? ? ?", MatchStart;
    AUTOMAP_PANEL_SPDW_SHIFT, "AutoMapPanel_spdwShift", "8B 0D ^ ? ? ? 8B 35", Relative32Add;

    DATATBLS_GET_AUTOMAP_CELL_ID, "DATATBLS_GetAutomapCellId", "48 89 5C 24 ? 48 89 74 24 ? 57 48 83 EC ? 48 63 D9 45 8B D9 ^ ? ? ?", MatchStart;

    PLAYER_UNIT_INDEX, "PlayerUnitIndex", "8B 0D ^ ? ? ? 48 8B 58 18", Relative32Add;
    CLIENT_UNIT_HASH_TABLE, "ClientUnitHashTable", "48 63 C1 48 8D 0D ^ ? ? ? 48 C1 E0", Relative32Add;
    GET_CLIENT_SIDE_UNIT_HASH_TABLE_BY_TYPE, "GetClientSideUnitHashTableByType", "E8 ^ ? ? ? 8B D5 41 B9", Relative32Add;
    GET_SERVER_SIDE_UNIT_HASH_TABLE_BY_TYPE, "GetServerSideUnitHashTableByType", "E8 ^ ? ? ? 45 8B C1 41 83 E0", Relative32Add;
    ENC_TRANSFORM_VALUE, "EncTransformValue", "E8 ^ ? ? ? 44 39 45", Relative32Add;
    ENCRYPTION_KEYS, "EncryptionKeys", "48 8B 05 ^ ? ? ? 8B 80", Relative32Add;
    PLAYER_INDEX_TO_ID_ENCRYPTED_TABLE, "PlayerIndexToIDEncryptedTable", "48 8D 15 ^ ? ? ? 8B DF", Relative32Add;
}

/// Hash of the signature set, in registration order. Any edit to a name,
/// pattern or the set itself invalidates cached offsets.
pub fn signature_hash(signatures: &[SignatureDef]) -> u32 {
    let mut hasher = fxhash::FxHasher32::default();
    for sig in signatures {
        hasher.write(sig.name.as_bytes());
        hasher.write(sig.pattern.as_bytes());
    }
    hasher.finish() as u32
}

/// Clear every slot in the set, forcing the next lookup to fail loudly.
pub fn clear_slots(signatures: &[SignatureDef]) {
    for sig in signatures {
        sig.slot.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_get_set() {
        static SLOT: OffsetSlot = OffsetSlot::new("Test");
        assert_eq!(SLOT.get(), None);
        assert!(SLOT.require().is_err());
        SLOT.set(0x1234);
        assert_eq!(SLOT.get(), Some(0x1234));
        assert_eq!(SLOT.require().ok(), Some(0x1234));
        SLOT.clear();
        assert_eq!(SLOT.get(), None);
    }

    #[test]
    fn test_signature_names_unique() {
        let sigs = builtin_signatures();
        let mut names: Vec<_> = sigs.iter().map(|s| s.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), sigs.len());
    }

    #[test]
    fn test_signature_hash_sensitive_to_content() {
        let mut sigs = builtin_signatures();
        let base = signature_hash(&sigs);
        sigs[0].pattern = "90 ^ ? ? ?";
        assert_ne!(signature_hash(&sigs), base);
        sigs.truncate(sigs.len() - 1);
        assert_ne!(signature_hash(&sigs), base);
    }
}
