//! In-memory layouts of the host structures this crate walks.
//!
//! Offsets are fixed by the host binary; the `const` asserts at the bottom
//! pin the sizes and the handful of offsets everything else depends on.

pub mod ptr;
mod widget;

pub use widget::{HostString, HostVector, PanelManager, RectI, Vec2i, Widget};

use core::ffi::c_void;

pub const UNIT_HASH_BUCKETS: usize = 128;
pub const MAX_PLAYER_SLOTS: u32 = 8;

/// One hash table of unit chains, bucketed by `id & 0x7F`.
pub type UnitHashTable = [*mut Unit; UNIT_HASH_BUCKETS];

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct Seed {
    pub low: u32,
    pub high: u32,
}

/// Intrusive doubly linked list of automap cells, with a sentinel node
/// convention inherited from the host.
#[repr(C)]
pub struct CellList {
    pub head: *mut AutomapCell,
    pub sentinel: *mut CellList,
    pub tail: *mut CellList,
    _unk18: u8,
    _pad19: [u8; 7],
    pub count: u64,
}

#[repr(C)]
pub struct AutomapCell {
    pub tail: *mut AutomapCell,
    pub head: *mut AutomapCell,
    pub next: *mut AutomapCell,
    pub reserved18: u64,
    pub saved: i16,
    pub cell_no: i16,
    pub x_pixel: i32,
    pub y_pixel: i32,
    _pad2c: [u8; 4],
}

#[repr(C)]
pub struct AutomapLayer {
    pub layer_id: i32,
    _unk04: i32,
    pub floors: CellList,
    pub walls: CellList,
    pub objects: CellList,
    pub extras: CellList,
    pub prev: *mut AutomapLayer,
}

#[repr(C)]
pub struct LevelDef {
    pub quest_flag: u32,
    pub quest_flag_ex: u32,
    pub layer: i32,
    pub size_x: [u32; 3],
    pub size_y: [u32; 3],
    pub offset_x: i32,
    pub offset_y: i32,
    pub depend: u32,
    pub drlg_type: u32,
    pub level_type: u32,
    pub sub_type: i32,
    pub sub_theme: i32,
    pub sub_waypoint: i32,
    pub sub_shrine: i32,
    pub vis: [u32; 8],
    pub warp: [i32; 8],
    pub intensity: u8,
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub portal: u32,
    pub position: u32,
    pub save_monsters: u32,
    pub los_draw: u32,
}

/// Tile rectangle of a generated room or level, in tile units.
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct DrlgCoord {
    pub back_corner_x: i32,
    pub back_corner_y: i32,
    pub size_x: i32,
    pub size_y: i32,
}

#[repr(C)]
pub struct DrlgRoom {
    _pad00: [u8; 8],
    pub init_seed: u32,
    _pad0c: [u8; 4],
    pub rooms_near: HostVector<*mut DrlgRoom>,
    _pad28: [u8; 8],
    pub seed: Seed,
    pub status_next: *mut DrlgRoom,
    _maze: u64,
    pub next: *mut DrlgRoom,
    pub flags: u32,
    _pad54: [u8; 4],
    pub active: *mut ActiveRoom,
    pub coords: DrlgCoord,
    pub status: u8,
    _pad71: [u8; 3],
    pub kind: i32,
    _room_tiles: u64,
    pub dt1_mask: u32,
    _pad84: [u8; 12],
    pub level: *mut DrlgLevel,
    _preset_units: *mut c_void,
    _pada0: [u8; 16],
    _tiles: [[u8; 8]; 32],
    pub status_prev: *mut DrlgRoom,
    pub unique_id: u64,
}

#[repr(C)]
pub struct TileLibraryEntry {
    pub light_direction: i32,
    pub roof_height: i16,
    pub flags: i16,
    pub total_height: i32,
    pub width: i32,
    pub height_to_bottom: i32,
    pub kind: i32,
    pub style: i32,
    pub sequence: i32,
    pub rarity_frame: i32,
    pub transparent_rgb: i32,
    pub tile_flags: [u8; 4],
    _pad2c: [u8; 84],
}

#[repr(C)]
pub struct TileData {
    pub width: i32,
    pub height: i32,
    pub pos_x: i32,
    pub pos_y: i32,
    _pad10: [u8; 8],
    pub flags: u32,
    _pad1c: [u8; 4],
    pub tile: *mut TileLibraryEntry,
    pub tile_count: i32,
    _pad2c: [u8; 28],
}

#[repr(C)]
pub struct RoomTiles {
    pub walls: *mut TileData,
    pub wall_count: u64,
    _pad10: [u8; 16],
    pub floors: *mut TileData,
    pub floor_count: u64,
    _pad30: [u8; 16],
    pub roofs: *mut TileData,
    pub roof_count: u64,
    _pad50: [u8; 24],
}

#[repr(C)]
pub struct ActiveRoom {
    pub room_list: *mut *mut ActiveRoom,
    pub tiles: *mut RoomTiles,
    _pad10: [u8; 8],
    pub drlg_room: *mut DrlgRoom,
    _pad20: [u8; 24],
    _collision_grid: *mut c_void,
    pub num_rooms: u32,
    pub num_units: u32,
    pub act: *mut DrlgAct,
    _pad50: [u8; 4],
    pub flags: u32,
    _pad58: [u8; 40],
    pub coords: [i32; 8],
    pub seed: Seed,
    pub unit_first: *mut Unit,
    pub next: *mut ActiveRoom,
    _padb8: [u8; 8],
}

#[repr(C)]
pub struct DrlgLevel {
    pub drlg_type: u32,
    pub flags: u32,
    pub room_count: i32,
    _pad0c: [u8; 4],
    pub room_first: *mut DrlgRoom,
    _preset_info: *mut c_void,
    _pad20: [u8; 8],
    pub coords: DrlgCoord,
    _tile_info: [[i32; 3]; 32],
    pub next: *mut DrlgLevel,
    _current_map: u64,
    pub drlg: *mut Drlg,
    _pad1d0: [u8; 16],
    pub level_type: u32,
    pub seed: Seed,
    _pad1ec: [u8; 12],
    pub level_id: i32,
    _pad1fc: [u8; 12],
    pub warp_x: [i32; 9],
    pub warp_y: [i32; 9],
    pub center_warps: u32,
    _pad254: [u8; 44],
}

#[repr(C)]
pub struct DrlgAct {
    pub update: u32,
    _pad04: [u8; 4],
    _environment: u64,
    pub init_seed: Seed,
    pub room: *mut ActiveRoom,
    pub act_id: u32,
    _pad24: [u8; 36],
    _tile_data: u64,
    _pad50: [u8; 32],
    pub drlg: *mut Drlg,
    _act_callback: *mut c_void,
    _pad80: [u8; 16],
}

#[repr(C)]
pub struct Drlg {
    pub seed: Seed,
    pub allocated_rooms: u32,
    _pad0c: [u8; 4],
    _tiles: [*mut c_void; 32],
    pub flags: u32,
    _pad114: [u8; 4],
    _warp: *mut c_void,
    pub staff_level_offset: u32,
    _pad124: [u8; 4],
    _game: u64,
    _status_rooms: [DrlgRoom; 4],
    pub difficulty: u8,
    _pad831: [u8; 7],
    /// Per-room automap refresh callback; guarded by a return-address check.
    pub automap_fn: *mut c_void,
    pub init_seed: u32,
    pub jungle_interlink: u32,
    pub drlg_room: *mut DrlgRoom,
    _pad850: [u8; 8],
    pub act: *mut DrlgAct,
    pub start_seed: u32,
    _pad864: [u8; 4],
    pub level: *mut DrlgLevel,
    pub act_no: u8,
    _pad871: [u8; 3],
    pub boss_level_offset: u32,
    _town_automap_fn: *mut c_void,
}

#[repr(C)]
pub struct Unit {
    pub unit_type: u32,
    pub class_id: u32,
    pub id: u32,
    pub mode: u32,
    pub data: *mut c_void,
    pub act: u64,
    pub drlg_act: *mut DrlgAct,
    pub seed: Seed,
    pub init_seed: Seed,
    pub path: *mut c_void,
    _pad40: [u8; 0x94],
    pub pos_x: u16,
    pub pos_y: u16,
    pub resource_id: u64,
    _pade0: [u8; 0x70],
    pub change_next: *mut Unit,
    pub next: *mut Unit,
    pub room_next: *mut Unit,
    _pad168: [u8; 0x55],
    pub data_tbls_index: u8,
    _pad1be: [u8; 2],
}

/// Opaque projection state filled by the host's automap panel.
#[repr(C, packed(4))]
#[derive(Clone, Copy, Default)]
pub struct AutoMapData {
    pub raw: [u64; 6],
    pub raw_f: [f32; 3],
}

const _: () = {
    use std::mem::{offset_of, size_of};

    assert!(size_of::<CellList>() == 0x28);
    assert!(size_of::<AutomapCell>() == 0x30);
    assert!(size_of::<AutomapLayer>() == 0xB0);
    assert!(offset_of!(AutomapLayer, prev) == 0xA8);
    assert!(size_of::<LevelDef>() == 0x9C);
    assert!(offset_of!(LevelDef, level_type) == 0x34);
    assert!(size_of::<DrlgRoom>() == 0x1C0);
    assert!(offset_of!(DrlgRoom, active) == 0x58);
    assert!(offset_of!(DrlgRoom, level) == 0x90);
    assert!(size_of::<TileLibraryEntry>() == 0x80);
    assert!(size_of::<TileData>() == 0x48);
    assert!(offset_of!(TileData, tile_count) == 0x28);
    assert!(size_of::<RoomTiles>() == 0x68);
    assert!(size_of::<ActiveRoom>() == 0xC0);
    assert!(offset_of!(ActiveRoom, unit_first) == 0xA8);
    assert!(size_of::<DrlgLevel>() == 0x280);
    assert!(offset_of!(DrlgLevel, level_id) == 0x1F8);
    assert!(size_of::<DrlgAct>() == 0x90);
    assert!(size_of::<Drlg>() == 0x880);
    assert!(offset_of!(Drlg, automap_fn) == 0x838);
    assert!(size_of::<Unit>() == 0x1C0);
    assert!(offset_of!(Unit, next) == 0x158);
    assert!(offset_of!(Unit, data_tbls_index) == 0x1BD);
    assert!(size_of::<AutoMapData>() == 0x3C);
};
