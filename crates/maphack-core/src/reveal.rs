//! Automap reveal.
//!
//! Two entry points: revealing a whole level by ID (forcing generation of
//! its rooms when needed) and revealing the room a player currently
//! occupies. Both mutate the host's automap cell lists, so they sit behind
//! the runtime-mode gate, a per-feature circuit breaker, and the unsafe
//! state check.

use core::ffi::c_void;

use tracing::{debug, warn};

use crate::error::Error;
use crate::host::ptr::{try_deref, try_deref_mut, try_read};
use crate::host::{
    ActiveRoom, AutomapCell, AutomapLayer, CellList, Drlg, DrlgAct, DrlgLevel, DrlgRoom, LevelDef,
    TileData, Unit,
};
use crate::identity::{self, IdentityHost, PlayerIdentity};
use crate::offset::slots;
use crate::retcheck::RetcheckFn;
use crate::safety::{self, CircuitBreaker};

/// Level IDs are dense and end before this bound.
const LEVEL_ID_LIMIT: u32 = 137;

/// First level ID of each act; the last entry closes act 4's range.
const ACT_LEVEL_STARTS: [u32; 6] = [1, 40, 75, 103, 109, 137];

const TILE_FLAG_NO_MAP: u32 = 0x8;
const TILE_FLAG_DISCOVERED: u32 = 0x2_0000;
const TILE_FLAG_REVEALED: u32 = 0x4_0000;

/// Walk caps for host-owned linked structures; a chain this long means
/// corruption, not data.
const MAX_LEVEL_WALK: usize = 512;
const MAX_ROOM_WALK: usize = 4096;
const MAX_LAYER_WALK: usize = 256;

/// Per-room automap refresh entry point, guarded by the return-address
/// check.
pub type AutomapRoomFn = unsafe extern "C" fn(*mut ActiveRoom);

/// Insertion point returned by the host's cell lookup: the predecessor cell
/// and the link slot the new cell must be stored through.
#[repr(C)]
pub struct CellLink {
    pub tail: *mut AutomapCell,
    pub head: *mut *mut AutomapCell,
}

/// Seed values for a new automap cell.
#[repr(C, packed)]
pub struct CellInit {
    pub saved: u16,
    pub cell_no: u16,
    pub packed: u64,
}

/// Resolved host functions and globals the reveal paths call through.
#[derive(Clone, Copy)]
pub struct RevealHost {
    pub drlg_alloc_level: unsafe extern "C" fn(u8, *mut Drlg, u32) -> *mut DrlgLevel,
    pub drlg_init_level: unsafe extern "C" fn(u8, *mut DrlgLevel),
    pub rooms_add_room_data: unsafe extern "C" fn(u8, *mut DrlgAct, i32, u32, u32, *mut ActiveRoom),
    pub get_level_def: unsafe extern "C" fn(u8, u32) -> *mut LevelDef,
    pub get_automap_cell_id: unsafe extern "C" fn(i32, i32, i32, i32) -> u32,
    pub new_automap_cell:
        unsafe extern "C" fn(*mut CellList, *mut CellLink, *const CellInit) -> *mut CellLink,
    pub add_automap_cell: unsafe extern "C" fn(*mut CellList, *mut AutomapCell),
    pub bc_allocator: unsafe extern "C" fn() -> *mut c_void,
    pub automap_layer_link: *const *mut AutomapLayer,
    pub current_automap_layer: *mut *mut AutomapLayer,
}

unsafe impl Send for RevealHost {}

impl RevealHost {
    /// Build the host view from resolved offset slots.
    pub fn from_slots() -> crate::Result<Self> {
        unsafe {
            Ok(Self {
                drlg_alloc_level: std::mem::transmute::<
                    usize,
                    unsafe extern "C" fn(u8, *mut Drlg, u32) -> *mut DrlgLevel,
                >(slots::DRLG_ALLOC_LEVEL.require()? as usize),
                drlg_init_level: std::mem::transmute::<
                    usize,
                    unsafe extern "C" fn(u8, *mut DrlgLevel),
                >(slots::DRLG_INIT_LEVEL.require()? as usize),
                rooms_add_room_data: std::mem::transmute::<
                    usize,
                    unsafe extern "C" fn(u8, *mut DrlgAct, i32, u32, u32, *mut ActiveRoom),
                >(slots::ROOMS_ADD_ROOM_DATA.require()? as usize),
                get_level_def: std::mem::transmute::<
                    usize,
                    unsafe extern "C" fn(u8, u32) -> *mut LevelDef,
                >(slots::GET_LEVEL_DEF.require()? as usize),
                get_automap_cell_id: std::mem::transmute::<
                    usize,
                    unsafe extern "C" fn(i32, i32, i32, i32) -> u32,
                >(slots::DATATBLS_GET_AUTOMAP_CELL_ID.require()? as usize),
                new_automap_cell: std::mem::transmute::<
                    usize,
                    unsafe extern "C" fn(
                        *mut CellList,
                        *mut CellLink,
                        *const CellInit,
                    ) -> *mut CellLink,
                >(slots::AUTOMAP_NEW_AUTOMAP_CELL.require()? as usize),
                add_automap_cell: std::mem::transmute::<
                    usize,
                    unsafe extern "C" fn(*mut CellList, *mut AutomapCell),
                >(slots::AUTOMAP_ADD_AUTOMAP_CELL.require()? as usize),
                bc_allocator: std::mem::transmute::<usize, unsafe extern "C" fn() -> *mut c_void>(
                    slots::BC_ALLOCATOR.require()? as usize,
                ),
                automap_layer_link: slots::AUTOMAP_LAYER_LINK.require()?
                    as *const *mut AutomapLayer,
                current_automap_layer: slots::CURRENT_AUTOMAP_LAYER.require()?
                    as *mut *mut AutomapLayer,
            })
        }
    }
}

pub struct Reveal {
    host: RevealHost,
    circuit: CircuitBreaker,
}

impl Reveal {
    pub fn new(host: RevealHost) -> Self {
        Self {
            host,
            circuit: CircuitBreaker::new("reveal"),
        }
    }

    /// Reveal every room of a level on the automap, generating the level
    /// first when the host has not built it yet.
    ///
    /// Generation only works for levels in the player's current act; the
    /// host's room bookkeeping is per-act and adding rooms across acts
    /// corrupts it.
    pub fn reveal_level(
        &self,
        identity_host: &IdentityHost,
        identity: &mut PlayerIdentity,
        id: u32,
    ) -> bool {
        if id == 0 || id >= LEVEL_ID_LIMIT {
            return false;
        }
        if !self.gates_pass(identity_host, "reveal_level") {
            return false;
        }

        let Some(index) = identity_host.local_slot() else {
            return false;
        };
        let player_ptr = identity.player_unit(identity_host, index, None);
        let Some(player) = (unsafe { try_deref::<Unit>(player_ptr.cast_const()) }) else {
            warn!("reveal_level: no local player unit");
            return false;
        };
        let Some(act) = (unsafe { try_deref(player.drlg_act.cast_const()) }) else {
            warn!("reveal_level: player has no act");
            return false;
        };
        let Some(drlg) = (unsafe { try_deref_mut(act.drlg) }) else {
            warn!("reveal_level: act has no level generator");
            return false;
        };
        let idx = player.data_tbls_index;

        let mut level = self.find_generated_level(drlg, id);
        if level.is_null() {
            level = unsafe { (self.host.drlg_alloc_level)(idx, drlg, id) };
            if level.is_null() {
                warn!("reveal_level: failed to allocate level {id}");
                self.circuit.record_strike("level allocation failed");
                return false;
            }
        }
        let Some(level) = (unsafe { try_deref_mut(level) }) else {
            return false;
        };

        if level.room_first.is_null() {
            if !Self::level_in_act(id, act.act_id) {
                debug!("reveal_level: level {id} is outside act {}", act.act_id);
                return false;
            }
            unsafe { (self.host.drlg_init_level)(idx, level) };
            if level.room_first.is_null() {
                warn!("reveal_level: failed to init level {id}");
                self.circuit.record_strike("level init failed");
                return false;
            }
        }

        let automap =
            RetcheckFn::<AutomapRoomFn>::new(drlg.automap_fn as u64);
        let mut walked = 0usize;
        let mut room_ptr = level.room_first;
        while let Some(room) = unsafe { try_deref_mut(room_ptr) } {
            walked += 1;
            if walked > MAX_ROOM_WALK {
                warn!("reveal_level: room chain walk limit hit in level {id}");
                self.circuit.record_strike("room chain overrun");
                return false;
            }
            if room.active.is_null() {
                self.add_room_data(idx, room);
            }
            if room.active.is_null() {
                warn!("reveal_level: failed to add room data in level {id}");
                self.circuit.record_strike("room data failed");
                return false;
            }
            unsafe { automap.call(room.active) };
            room_ptr = room.next;
        }
        true
    }

    /// Force-reveal one active room on its level's automap layer, restoring
    /// the previously current layer afterwards.
    pub fn reveal_active_room(
        &self,
        identity_host: &IdentityHost,
        identity: &mut PlayerIdentity,
        room: *mut ActiveRoom,
    ) -> bool {
        if !self.gates_pass(identity_host, "reveal_active_room") {
            return false;
        }
        let Some(room) = (unsafe { try_deref(room.cast_const()) }) else {
            return false;
        };
        let Some(drlg_room) = (unsafe { try_deref(room.drlg_room.cast_const()) }) else {
            return false;
        };
        let Some(level) = (unsafe { try_deref(drlg_room.level.cast_const()) }) else {
            return false;
        };

        let Some(index) = identity_host.local_slot() else {
            return false;
        };
        let player_ptr = identity.player_unit(identity_host, index, None);
        let Some(player) = (unsafe { try_deref::<Unit>(player_ptr.cast_const()) }) else {
            return false;
        };
        let has_act = unsafe { try_deref(player.drlg_act.cast_const()) }
            .is_some_and(|act| !act.drlg.is_null());
        if !has_act {
            return false;
        }
        let idx = player.data_tbls_index;

        let previous_layer_id = try_read(self.host.current_automap_layer.cast_const())
            .and_then(|current| unsafe { try_deref(current.cast_const()) })
            .map(|current| current.layer_id);

        let level_def_ptr = unsafe { (self.host.get_level_def)(idx, level.level_id as u32) };
        let Some(level_def) = (unsafe { try_deref(level_def_ptr.cast_const()) }) else {
            warn!("reveal_active_room: no level definition for {}", level.level_id);
            return false;
        };
        let Some(layer) = self.activate_layer(level_def.layer) else {
            return false;
        };

        self.reveal_room(idx, room, true, layer);

        if let Some(previous) = previous_layer_id {
            self.activate_layer(previous);
        }
        true
    }

    fn gates_pass(&self, identity_host: &IdentityHost, caller: &'static str) -> bool {
        match self.check_gates(identity_host, caller) {
            Ok(()) => true,
            Err(e) => {
                debug!("{caller}: {e}");
                false
            }
        }
    }

    fn check_gates(
        &self,
        identity_host: &IdentityHost,
        caller: &'static str,
    ) -> crate::Result<()> {
        if safety::mutation_blocked(caller) {
            return Err(Error::Blocked("runtime mode"));
        }
        if self.circuit.is_tripped() {
            return Err(Error::Blocked("circuit breaker"));
        }
        if identity::is_unsafe_for_invasive_call(identity_host, caller) {
            self.circuit.record_strike("unsafe runtime state");
            return Err(Error::UnsafeState);
        }
        Ok(())
    }

    /// A level already generated with real coordinates, or null.
    fn find_generated_level(&self, drlg: &Drlg, id: u32) -> *mut DrlgLevel {
        let mut walked = 0usize;
        let mut level_ptr = drlg.level;
        while let Some(level) = unsafe { try_deref(level_ptr.cast_const()) } {
            walked += 1;
            if walked > MAX_LEVEL_WALK {
                break;
            }
            if level.level_id == id as i32 && level.coords.back_corner_x > 0 {
                return level_ptr;
            }
            level_ptr = level.next;
        }
        std::ptr::null_mut()
    }

    /// Pixel coordinates travel as signed 16-bit values and the cell ID as
    /// an unsigned one; anything wider cannot be stored in a cell.
    fn cell_in_range(packed: u64, cell_id: u32) -> crate::Result<()> {
        let x_pixel = packed as u32 as i32;
        let y_pixel = (packed >> 32) as u32 as i32;
        if x_pixel.wrapping_add(0x8000) > 0xFFFF || y_pixel.wrapping_add(0x8000) > 0xFFFF {
            return Err(Error::Bounds);
        }
        if cell_id.wrapping_add(0x8000) > 0xFFFF {
            return Err(Error::Bounds);
        }
        Ok(())
    }

    fn level_in_act(id: u32, act_id: u32) -> bool {
        let Some(act) = ACT_LEVEL_STARTS.get(act_id as usize) else {
            return false;
        };
        let Some(next_act) = ACT_LEVEL_STARTS.get(act_id as usize + 1) else {
            return false;
        };
        (*act..*next_act).contains(&id)
    }

    fn add_room_data(&self, idx: u8, room: &mut DrlgRoom) {
        // The host locates the room through the act and coordinates and
        // links its active counterpart in.
        let act = unsafe { try_deref(room.level.cast_const()) }
            .and_then(|level| unsafe { try_deref(level.drlg.cast_const()) })
            .map(|drlg| drlg.act);
        let Some(act) = act else {
            return;
        };
        let level_id = match unsafe { try_deref(room.level.cast_const()) } {
            Some(level) => level.level_id,
            None => return,
        };
        unsafe {
            (self.host.rooms_add_room_data)(
                idx,
                act,
                level_id,
                room.coords.back_corner_x as u32,
                room.coords.back_corner_y as u32,
                room.active,
            );
        }
    }

    /// Find the automap layer for `layer_id` in the host's layer list.
    ///
    /// Only the already-current layer is usable: swapping
    /// the current-layer global from outside the host's own layer switch
    /// corrupts its cell lists.
    fn activate_layer(&self, layer_id: i32) -> Option<&mut AutomapLayer> {
        let mut link_ptr = try_read(self.host.automap_layer_link)?;
        let current = try_read(self.host.current_automap_layer.cast_const())?;

        let mut walked = 0usize;
        while let Some(link) = unsafe { try_deref_mut(link_ptr) } {
            walked += 1;
            if walked > MAX_LAYER_WALK {
                return None;
            }
            if link.layer_id == layer_id {
                if link_ptr != current {
                    return None;
                }
                return unsafe { try_deref_mut(link_ptr) };
            }
            link_ptr = link.prev;
        }
        None
    }

    fn reveal_room(&self, idx: u8, room: &ActiveRoom, entire_room: bool, layer: &mut AutomapLayer) {
        let Some(tiles) = (unsafe { try_deref(room.tiles.cast_const()) }) else {
            return;
        };
        let Some(drlg_room) = (unsafe { try_deref(room.drlg_room.cast_const()) }) else {
            return;
        };

        for n in 0..tiles.floor_count as usize {
            let tile = unsafe { tiles.floors.add(n) };
            self.reveal_tile(idx, tile, drlg_room, entire_room, &mut layer.floors);
        }
        for n in 0..tiles.wall_count as usize {
            let tile = unsafe { tiles.walls.add(n) };
            self.reveal_tile(idx, tile, drlg_room, entire_room, &mut layer.walls);
        }
    }

    fn reveal_tile(
        &self,
        idx: u8,
        tile: *mut TileData,
        drlg_room: &DrlgRoom,
        entire_room: bool,
        cells: &mut CellList,
    ) {
        let Some(tile) = (unsafe { try_deref_mut(tile) }) else {
            return;
        };
        let wanted = (tile.flags & TILE_FLAG_NO_MAP) == 0
            && (tile.flags & TILE_FLAG_DISCOVERED) != 0;
        if !(wanted || entire_room) {
            return;
        }
        self.reveal_cell(idx, tile, drlg_room, cells);
    }

    /// Convert one tile to an automap cell and splice it into the layer's
    /// cell list, mirroring the host's own insertion bookkeeping.
    fn reveal_cell(&self, idx: u8, tile: &mut TileData, drlg_room: &DrlgRoom, cells: &mut CellList) {
        if tile.flags & TILE_FLAG_REVEALED != 0 {
            return;
        }
        tile.flags |= TILE_FLAG_REVEALED;

        let Some(level) = (unsafe { try_deref(drlg_room.level.cast_const()) }) else {
            return;
        };
        let level_def_ptr = unsafe { (self.host.get_level_def)(idx, level.level_id as u32) };
        let Some(level_def) = (unsafe { try_deref(level_def_ptr.cast_const()) }) else {
            return;
        };
        let Some(entry) = (unsafe { try_deref(tile.tile.cast_const()) }) else {
            return;
        };
        let cell_id = unsafe {
            (self.host.get_automap_cell_id)(
                level_def.level_type as i32,
                entry.kind,
                entry.style,
                entry.sequence,
            )
        };
        if cell_id == u32::MAX {
            return;
        }

        let x = tile.pos_x + drlg_room.coords.back_corner_x;
        let y = tile.pos_y + drlg_room.coords.back_corner_y;
        let mut abs_x = 80 * (x - y);
        let mut abs_y = (80 * (y + x)) >> 1;
        if tile.tile_count >= 16 {
            abs_x += 24;
            abs_y += 24;
        }

        let packed = (((abs_y / 10) as u32 as u64) << 32) | (abs_x / 10) as u32 as u64;
        if let Err(e) = Self::cell_in_range(packed, cell_id) {
            debug!("{e}: position ({abs_x}, {abs_y}), id {cell_id}");
            return;
        }

        let init = CellInit {
            saved: 0,
            cell_no: cell_id as u16,
            packed,
        };
        let mut link = CellLink {
            tail: std::ptr::null_mut(),
            head: std::ptr::null_mut(),
        };
        let ret = unsafe { (self.host.new_automap_cell)(cells, &mut link, &init) };
        if ret.is_null() {
            warn!("host rejected new automap cell");
            return;
        }
        let slot = unsafe { (*ret).head };
        if slot.is_null() {
            return;
        }

        let Some(cell) = self.allocate_cell() else {
            warn!("automap cell allocation failed");
            return;
        };
        cells.count += 1;

        cell.tail = link.tail;
        cell.head = std::ptr::null_mut();
        cell.next = std::ptr::null_mut();
        cell.reserved18 = 0;
        cell.saved = init.saved as i16;
        cell.cell_no = init.cell_no as i16;
        cell.x_pixel = abs_x / 10;
        cell.y_pixel = abs_y / 10;
        let cell: *mut AutomapCell = cell;

        // The list head doubles as a phantom cell; insertion at the front,
        // at the sentinel and at the tail each patch different links.
        let cells_ptr: *mut CellList = cells;
        let prev = link.tail;
        unsafe {
            if prev == cells_ptr.cast::<AutomapCell>() {
                cells.head = cell;
                cells.sentinel = cell.cast::<CellList>();
            } else {
                *slot = cell;
                if prev == cells.sentinel.cast::<AutomapCell>()
                    && slot == &raw mut (*prev).head
                {
                    cells.sentinel = cell.cast::<CellList>();
                }
                if prev != cells.tail.cast::<AutomapCell>() || slot != &raw mut (*prev).next {
                    (self.host.add_automap_cell)(cells_ptr, cell);
                    return;
                }
            }
            cells.tail = cell.cast::<CellList>();
            (self.host.add_automap_cell)(cells_ptr, cell);
        }
    }

    /// One cell from the host's own heap, 16-byte aligned; the host frees
    /// cells through the same allocator when layers are cleared.
    fn allocate_cell(&self) -> Option<&'static mut AutomapCell> {
        type AllocFn = unsafe extern "C" fn(*mut c_void, usize, usize) -> *mut c_void;
        unsafe {
            let allocator = (self.host.bc_allocator)();
            if allocator.is_null() {
                return None;
            }
            let vtable: *const *const c_void = try_read(allocator.cast())?;
            let alloc_raw: *const c_void = try_read(vtable.add(1))?;
            if alloc_raw.is_null() {
                return None;
            }
            let alloc = std::mem::transmute::<*const c_void, AllocFn>(alloc_raw);
            let cell = alloc(allocator, std::mem::size_of::<AutomapCell>(), 0x10);
            try_deref_mut(cell.cast::<AutomapCell>())
        }
    }
}
