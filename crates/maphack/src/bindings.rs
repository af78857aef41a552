//! The `extern "C"` surface the embedding script calls.
//!
//! Nothing here raises across the boundary: a missing runtime, a refused
//! operation or a panic all collapse to the sentinel value documented on
//! each call.

use std::ffi::{CStr, c_char};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard};

use tracing::info;

use maphack_core::PlayerIdentity;
use maphack_core::offset::{OffsetSlot, slots};
use maphack_core::safety::{self, RuntimeMode};

use crate::runtime::{Runtime, runtime};

const NO_PLAYER: u32 = 0;
const NO_INDEX: u32 = u32::MAX;
const MAX_PLAYERS: u32 = 8;

/// Screen-space coordinates handed back to the script.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScreenPoint {
    pub x: f32,
    pub y: f32,
}

const OFF_MAP: ScreenPoint = ScreenPoint { x: -1.0, y: -1.0 };

type TableByTypeFn = unsafe extern "C" fn(u32) -> u64;

fn guarded<T>(fallback: T, f: impl FnOnce(&'static Runtime) -> T) -> T {
    let Some(rt) = runtime() else {
        return fallback;
    };
    panic::catch_unwind(AssertUnwindSafe(|| f(rt))).unwrap_or(fallback)
}

fn lock(identity: &Mutex<PlayerIdentity>) -> MutexGuard<'_, PlayerIdentity> {
    identity.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Current automap display mode; 0 when unavailable.
#[unsafe(no_mangle)]
pub extern "C" fn mh_automap_get_mode() -> u32 {
    guarded(0, |rt| rt.automap.mode())
}

/// Project world coordinates onto the automap. `{-1, -1}` when the automap
/// panel is absent or hidden.
#[unsafe(no_mangle)]
pub extern "C" fn mh_world_to_automap(x: i32, y: i32) -> ScreenPoint {
    guarded(OFF_MAP, |rt| {
        let (sx, sy) = rt.automap.world_to_automap(x, y);
        ScreenPoint { x: sx, y: sy }
    })
}

/// Reveal a whole level on the automap. `false` when refused or failed.
#[unsafe(no_mangle)]
pub extern "C" fn mh_reveal_level(level_id: u32) -> bool {
    guarded(false, |rt| {
        let mut identity = lock(&rt.identity);
        rt.reveal.reveal_level(&rt.identity_host, &mut identity, level_id)
    })
}

/// Unit ID of the player in slot `index` (`[0, 8)`); 0 when empty or
/// unresolvable.
#[unsafe(no_mangle)]
pub extern "C" fn mh_get_player_id_by_index(index: u32) -> u32 {
    if index >= MAX_PLAYERS {
        return NO_PLAYER;
    }
    guarded(NO_PLAYER, |rt| {
        lock(&rt.identity).player_id(&rt.identity_host, index, Some(&rt.image))
    })
}

/// Slot index of the local player; `u32::MAX` when unknown.
#[unsafe(no_mangle)]
pub extern "C" fn mh_get_local_player_index() -> u32 {
    guarded(NO_INDEX, |rt| {
        rt.identity_host.local_slot().unwrap_or(NO_INDEX)
    })
}

/// Address of the client-side unit hash table, 0 when unresolved.
#[unsafe(no_mangle)]
pub extern "C" fn mh_get_client_side_unit_hash_table_address() -> u64 {
    guarded(0, |_| table_address(&slots::GET_CLIENT_SIDE_UNIT_HASH_TABLE_BY_TYPE))
}

/// Address of the server-side unit hash table, 0 when unresolved.
#[unsafe(no_mangle)]
pub extern "C" fn mh_get_server_side_unit_hash_table_address() -> u64 {
    guarded(0, |_| table_address(&slots::GET_SERVER_SIDE_UNIT_HASH_TABLE_BY_TYPE))
}

fn table_address(slot: &'static OffsetSlot) -> u64 {
    let Some(address) = slot.get() else {
        return 0;
    };
    let by_type =
        unsafe { std::mem::transmute::<usize, TableByTypeFn>(address as usize) };
    unsafe { by_type(0) }
}

/// Forward a script message into the diagnostic log. Null is ignored.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn mh_log(message: *const c_char) {
    if message.is_null() {
        return;
    }
    let text = unsafe { CStr::from_ptr(message) }.to_string_lossy();
    info!(target: "script", "{text}");
}

/// Switch the runtime mode: 0 read-only, 1 active mutation. `false` for any
/// other value.
#[unsafe(no_mangle)]
pub extern "C" fn mh_set_runtime_mode(mode: u32) -> bool {
    let mode = match mode {
        0 => RuntimeMode::ReadOnlySafe,
        1 => RuntimeMode::ActiveMutation,
        _ => return false,
    };
    safety::set_runtime_mode(mode);
    true
}

#[unsafe(no_mangle)]
pub extern "C" fn mh_get_runtime_mode() -> u32 {
    safety::runtime_mode() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    // The runtime is never initialised under test, so every runtime-backed
    // call must answer with its sentinel.

    #[test]
    fn test_sentinels_without_runtime() {
        assert_eq!(mh_automap_get_mode(), 0);
        assert_eq!(mh_world_to_automap(1234, -77), OFF_MAP);
        assert!(!mh_reveal_level(5));
        assert_eq!(mh_get_local_player_index(), u32::MAX);
        assert_eq!(mh_get_client_side_unit_hash_table_address(), 0);
        assert_eq!(mh_get_server_side_unit_hash_table_address(), 0);
    }

    #[test]
    fn test_player_index_range() {
        assert_eq!(mh_get_player_id_by_index(8), 0);
        assert_eq!(mh_get_player_id_by_index(u32::MAX), 0);
        assert_eq!(mh_get_player_id_by_index(0), 0);
    }

    #[test]
    fn test_log_ignores_null() {
        unsafe { mh_log(std::ptr::null()) };
        let message = c"hello from the script";
        unsafe { mh_log(message.as_ptr()) };
    }

    #[test]
    fn test_mode_switch_round_trip() {
        assert!(!mh_set_runtime_mode(2));
        assert!(mh_set_runtime_mode(1));
        assert_eq!(mh_get_runtime_mode(), 1);
        assert!(mh_set_runtime_mode(0));
        assert_eq!(mh_get_runtime_mode(), 0);
    }
}
